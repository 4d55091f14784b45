//! Typed error hierarchy for the autopilot supervisor.
//!
//! Three top-level enums cover the three subsystems:
//! - `ClientError` — backend HTTP persistence failures
//! - `AgentError` — agent adapter construction and invocation failures
//! - `LaunchError` — run launch validation and process-spawn failures

use thiserror::Error;

/// Errors from the backend client. Any non-2xx response surfaces here with
/// the resource identifier and HTTP status; nothing fails silently.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Run {run_id} not found")]
    RunNotFound { run_id: String },

    #[error("Sprint {sprint_id} not found")]
    SprintNotFound { sprint_id: String },

    #[error("Backend returned {status} for {resource}")]
    Http { resource: String, status: u16 },

    #[error("Backend request for {resource} failed: {source}")]
    Transport {
        resource: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to decode backend response for {resource}: {source}")]
    Decode {
        resource: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Errors from the agent adapter.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Unsupported agent '{name}'. Supported agents: claude, codex")]
    UnsupportedAgent { name: String },

    #[error("Failed to spawn agent process '{binary}': {source}")]
    SpawnFailed {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Agent timed out after {seconds}s")]
    TimedOut { seconds: u64 },

    #[error("Agent stream error: {0}")]
    Stream(String),

    /// The log sink could not persist transcript text. Unlike agent process
    /// failures this is not classified into an exit code; it aborts the run.
    #[error("Failed to persist agent log: {0}")]
    Log(#[from] ClientError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from run launch and process management.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Invalid branch name '{name}': {reason}")]
    InvalidBranchName { name: String, reason: String },

    #[error("No sprint available: {0}")]
    NoSprint(String),

    #[error("Sprint {sprint_id} has no eligible tasks")]
    NoEligibleTasks { sprint_id: String },

    #[error("Run {run_id} is not in a retryable state ({status})")]
    NotRetryable { run_id: String, status: String },

    #[error("Failed to spawn supervisor process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_http_carries_resource_and_status() {
        let err = ClientError::Http {
            resource: "runs/run-7".to_string(),
            status: 500,
        };
        let msg = err.to_string();
        assert!(msg.contains("runs/run-7"));
        assert!(msg.contains("500"));
    }

    #[test]
    fn client_error_not_found_carries_id() {
        let err = ClientError::RunNotFound {
            run_id: "run-42".to_string(),
        };
        assert!(err.to_string().contains("run-42"));
        assert!(matches!(err, ClientError::RunNotFound { .. }));
    }

    #[test]
    fn agent_error_unsupported_names_the_agent() {
        let err = AgentError::UnsupportedAgent {
            name: "gemini".to_string(),
        };
        assert!(err.to_string().contains("gemini"));
    }

    #[test]
    fn agent_error_spawn_failed_is_matchable() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "claude not found");
        let err = AgentError::SpawnFailed {
            binary: "claude".to_string(),
            source: io_err,
        };
        match &err {
            AgentError::SpawnFailed { binary, source } => {
                assert_eq!(binary, "claude");
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("Expected SpawnFailed variant"),
        }
    }

    #[test]
    fn launch_error_converts_from_client_error() {
        let inner = ClientError::SprintNotFound {
            sprint_id: "sprint-9".to_string(),
        };
        let launch_err: LaunchError = inner.into();
        match &launch_err {
            LaunchError::Client(ClientError::SprintNotFound { sprint_id }) => {
                assert_eq!(sprint_id, "sprint-9");
            }
            _ => panic!("Expected LaunchError::Client(SprintNotFound)"),
        }
    }

    #[test]
    fn launch_error_invalid_branch_explains_itself() {
        let err = LaunchError::InvalidBranchName {
            name: "a..b".to_string(),
            reason: "must not contain '..'".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("a..b"));
        assert!(msg.contains(".."));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ClientError::RunNotFound { run_id: "x".into() });
        assert_std_error(&AgentError::TimedOut { seconds: 1800 });
        assert_std_error(&LaunchError::NoSprint("none".into()));
    }
}
