//! Backend client — the sole persistence and communication boundary for the
//! supervisor.
//!
//! Every method issues exactly one HTTP request, scoped by the project id,
//! and raises a `ClientError` naming the resource and status on any non-2xx
//! response. There is no partial success and no silent failure: if a write
//! did not round-trip, the caller finds out.
//!
//! The client is constructed once per process with an explicit base URL and
//! project id and passed by reference to the supervisor. There is no global
//! singleton and no init/reset dance; an unconstructed client is
//! unrepresentable.

use serde::{Deserialize, Serialize};

use crate::errors::ClientError;
use crate::models::{Run, Settings, Sprint};

#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
}

#[derive(Debug, Deserialize)]
struct CancellationResponse {
    canceled: bool,
}

#[derive(Debug, Serialize)]
struct LogEntryBody<'a> {
    entry: &'a str,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, project_id: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
            project_id: project_id.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `GET /runs/{runId}?projectId=…`
    pub async fn get_run(&self, run_id: &str) -> Result<Run, ClientError> {
        let resource = format!("runs/{}", run_id);
        let resp = self
            .http
            .get(self.url(&resource))
            .query(&[("projectId", self.project_id.as_str())])
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                resource: resource.clone(),
                source,
            })?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::RunNotFound {
                run_id: run_id.to_string(),
            });
        }
        let resp = Self::ensure_success(&resource, resp)?;
        resp.json::<Run>()
            .await
            .map_err(|source| ClientError::Decode { resource, source })
    }

    /// `PUT /runs/{runId}?projectId=…` with the full run record as the body.
    pub async fn put_run(&self, run: &Run) -> Result<(), ClientError> {
        let resource = format!("runs/{}", run.run_id);
        let resp = self
            .http
            .put(self.url(&resource))
            .query(&[("projectId", self.project_id.as_str())])
            .json(run)
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                resource: resource.clone(),
                source,
            })?;
        Self::ensure_success(&resource, resp)?;
        Ok(())
    }

    /// `GET /projects/{projectId}/settings`
    pub async fn get_settings(&self) -> Result<Settings, ClientError> {
        let resource = format!("projects/{}/settings", self.project_id);
        let resp = self
            .http
            .get(self.url(&resource))
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                resource: resource.clone(),
                source,
            })?;
        let resp = Self::ensure_success(&resource, resp)?;
        resp.json::<Settings>()
            .await
            .map_err(|source| ClientError::Decode { resource, source })
    }

    /// `GET /sprints/{sprintId}?projectId=…`
    pub async fn get_sprint(&self, sprint_id: &str) -> Result<Sprint, ClientError> {
        let resource = format!("sprints/{}", sprint_id);
        let resp = self
            .http
            .get(self.url(&resource))
            .query(&[("projectId", self.project_id.as_str())])
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                resource: resource.clone(),
                source,
            })?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::SprintNotFound {
                sprint_id: sprint_id.to_string(),
            });
        }
        let resp = Self::ensure_success(&resource, resp)?;
        resp.json::<Sprint>()
            .await
            .map_err(|source| ClientError::Decode { resource, source })
    }

    /// Legacy alias: "board" is an older name for "sprint". Same resource.
    pub async fn get_board(&self, board_id: &str) -> Result<Sprint, ClientError> {
        self.get_sprint(board_id).await
    }

    /// `GET /projects/{projectId}/sprints` — every sprint in the project,
    /// used by launch to pick the most recent non-archived one.
    pub async fn list_sprints(&self) -> Result<Vec<Sprint>, ClientError> {
        let resource = format!("projects/{}/sprints", self.project_id);
        let resp = self
            .http
            .get(self.url(&resource))
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                resource: resource.clone(),
                source,
            })?;
        let resp = Self::ensure_success(&resource, resp)?;
        resp.json::<Vec<Sprint>>()
            .await
            .map_err(|source| ClientError::Decode { resource, source })
    }

    /// `PUT /sprints/{sprintId}?projectId=…` with tasks embedded.
    pub async fn put_sprint(&self, sprint: &Sprint) -> Result<(), ClientError> {
        let resource = format!("sprints/{}", sprint.id);
        let resp = self
            .http
            .put(self.url(&resource))
            .query(&[("projectId", self.project_id.as_str())])
            .json(sprint)
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                resource: resource.clone(),
                source,
            })?;
        Self::ensure_success(&resource, resp)?;
        Ok(())
    }

    /// `GET /runs/{runId}/cancellation?projectId=…` → `{canceled: bool}`
    pub async fn is_cancellation_requested(&self, run_id: &str) -> Result<bool, ClientError> {
        let resource = format!("runs/{}/cancellation", run_id);
        let resp = self
            .http
            .get(self.url(&resource))
            .query(&[("projectId", self.project_id.as_str())])
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                resource: resource.clone(),
                source,
            })?;
        let resp = Self::ensure_success(&resource, resp)?;
        let body = resp
            .json::<CancellationResponse>()
            .await
            .map_err(|source| ClientError::Decode { resource, source })?;
        Ok(body.canceled)
    }

    /// `POST /runs/{runId}/logs?projectId=…` — appends one log line.
    pub async fn append_log(&self, run_id: &str, entry: &str) -> Result<(), ClientError> {
        let resource = format!("runs/{}/logs", run_id);
        let resp = self
            .http
            .post(self.url(&resource))
            .query(&[("projectId", self.project_id.as_str())])
            .json(&LogEntryBody { entry })
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                resource: resource.clone(),
                source,
            })?;
        Self::ensure_success(&resource, resp)?;
        Ok(())
    }

    fn ensure_success(
        resource: &str,
        resp: reqwest::Response,
    ) -> Result<reqwest::Response, ClientError> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            Err(ClientError::Http {
                resource: resource.to_string(),
                status: status.as_u16(),
            })
        }
    }
}
