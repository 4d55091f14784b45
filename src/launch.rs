//! Run launch and process management.
//!
//! Translates a "start run" request into a persisted run record plus a
//! detached supervisor process. The launcher validates up front (bad branch
//! names and missing sprints fail before any record exists), creates the
//! record as `queued`, spawns `autopilot supervise` detached from its own
//! lifecycle, and stamps the child's pid on the record for later
//! force-kills. A spawn failure flips the record to `failed` with the error
//! captured — a run is never left dangling in `queued`.

use std::process::Stdio;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::BackendClient;
use crate::errors::LaunchError;
use crate::models::{ExecutorMode, Run, RunReason, RunStatus, Sprint};

/// Characters git refuses in ref names, plus backslash.
const VCS_UNSAFE_CHARS: &[char] = &['~', '^', ':', '?', '*', '[', '\\'];

/// External "start run" request. `board_id` is the legacy spelling of
/// `sprint_id`; either resolves the same resource.
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    pub sprint_id: Option<String>,
    pub board_id: Option<String>,
    pub branch_name: String,
    pub max_iterations: Option<u32>,
    pub sandbox_path: Option<String>,
    pub triggered_by: Option<String>,
}

/// Strict branch-name validation: the sandbox branch ends up in git
/// commands, so anything VCS-unsafe is rejected before a record exists.
pub fn validate_branch_name(name: &str) -> Result<(), LaunchError> {
    let invalid = |reason: &str| LaunchError::InvalidBranchName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.chars().any(|c| c.is_whitespace()) {
        return Err(invalid("must not contain whitespace"));
    }
    if name.contains("..") {
        return Err(invalid("must not contain '..'"));
    }
    if name.starts_with('/') || name.ends_with('/') {
        return Err(invalid("must not start or end with '/'"));
    }
    if name.contains("//") {
        return Err(invalid("must not contain '//'"));
    }
    if name.ends_with(".lock") {
        return Err(invalid("must not end with '.lock'"));
    }
    if name.starts_with('-') {
        return Err(invalid("must not start with '-'"));
    }
    if let Some(c) = name.chars().find(|c| VCS_UNSAFE_CHARS.contains(c)) {
        return Err(invalid(&format!("must not contain '{}'", c)));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/')))
    {
        return Err(invalid(&format!(
            "must contain only letters, digits, '.', '_', '-', '/' (found '{}')",
            c
        )));
    }
    Ok(())
}

/// Launch a run: resolve the sprint, freeze the eligible-task snapshot,
/// create the record, and spawn the detached supervisor.
pub async fn launch_run(
    client: &BackendClient,
    request: &LaunchRequest,
) -> Result<Run, LaunchError> {
    validate_branch_name(&request.branch_name)?;
    let sprint = resolve_sprint(client, request).await?;

    let selected_task_ids = snapshot_eligible_ids(&sprint);
    if selected_task_ids.is_empty() {
        return Err(LaunchError::NoEligibleTasks {
            sprint_id: sprint.id,
        });
    }

    let executor_mode = executor_mode_from_env()?;
    let sandbox_path = match &request.sandbox_path {
        Some(path) => path.clone(),
        None => std::env::var("AUTOPILOT_SANDBOX").map_err(|_| {
            LaunchError::Other(anyhow::anyhow!(
                "No sandbox path: pass --sandbox or set AUTOPILOT_SANDBOX"
            ))
        })?,
    };

    let mut run = Run {
        run_id: format!("run-{}", Uuid::new_v4()),
        project_id: client.project_id().to_string(),
        sprint_id: sprint.id.clone(),
        status: RunStatus::Queued,
        reason: None,
        // Zero means "not requested"; the supervisor resolves the effective
        // cap against automation settings at startup.
        max_iterations: request.max_iterations.unwrap_or(0),
        current_iteration: 0,
        executor_mode,
        sandbox_path,
        sandbox_branch: request.branch_name.clone(),
        selected_task_ids,
        last_task_id: None,
        last_message: None,
        last_command: None,
        last_command_exit_code: None,
        errors: vec![],
        pid: None,
        cancellation_requested_at: None,
        triggered_by_id: request.triggered_by.clone(),
        created_at: Utc::now(),
        started_at: None,
        finished_at: None,
        last_progress_at: None,
    };

    client.put_run(&run).await?;

    match spawn_supervisor(client, &run) {
        Ok(pid) => {
            run.pid = Some(pid);
            client.put_run(&run).await?;
            info!(run_id = %run.run_id, pid, sprint_id = %run.sprint_id, "Run launched");
            Ok(run)
        }
        Err(e) => {
            run.record_error(format!("Failed to spawn supervisor process: {}", e));
            run.finish(RunStatus::Failed, RunReason::SpawnFailed);
            client.put_run(&run).await?;
            Err(LaunchError::SpawnFailed(e))
        }
    }
}

/// Request cancellation of a run.
///
/// The first call stamps `cancellationRequestedAt`; the supervisor observes
/// the flag at its next iteration boundary and stops gracefully. A repeat
/// call while the stamp is already set is the operator's force-kill: the
/// supervisor process is terminated directly by its stored pid. Calls on an
/// already-terminal run are no-ops.
pub async fn cancel_run(client: &BackendClient, run_id: &str) -> Result<Run, LaunchError> {
    let mut run = client.get_run(run_id).await?;

    if run.status.is_terminal() {
        info!(run_id, status = %run.status, "Run already terminal; cancel is a no-op");
        return Ok(run);
    }

    if run.cancellation_requested_at.is_none() {
        run.cancellation_requested_at = Some(Utc::now());
        client.put_run(&run).await?;
        info!(run_id, "Graceful cancellation requested");
        return Ok(run);
    }

    // Second request: the supervisor cannot observe its own death, so the
    // record is finalized here. Cancellation is an outcome, not an error.
    match run.pid {
        Some(pid) => {
            force_kill(pid);
            info!(run_id, pid, "Force-killed supervisor process");
        }
        None => warn!(run_id, "No pid recorded; nothing to force-kill"),
    }
    run.last_message = Some("Run canceled: force-killed by operator".to_string());
    run.finish(RunStatus::Canceled, RunReason::Canceled);
    client.put_run(&run).await?;
    Ok(run)
}

/// Retry a terminal run by creating a fresh run against the same sprint.
/// Eligibility is re-snapshotted: task state may have moved on since the
/// original run, and a stale snapshot would re-attempt finished work.
pub async fn retry_run(client: &BackendClient, run_id: &str) -> Result<Run, LaunchError> {
    let old = client.get_run(run_id).await?;
    if !old.status.is_terminal() {
        return Err(LaunchError::NotRetryable {
            run_id: run_id.to_string(),
            status: old.status.to_string(),
        });
    }

    let request = LaunchRequest {
        sprint_id: Some(old.sprint_id.clone()),
        board_id: None,
        branch_name: old.sandbox_branch.clone(),
        max_iterations: Some(old.max_iterations),
        sandbox_path: Some(old.sandbox_path.clone()),
        triggered_by: old.triggered_by_id.clone(),
    };
    let run = launch_run(client, &request).await?;
    info!(old_run_id = %run_id, new_run_id = %run.run_id, "Retry launched as a new run");
    Ok(run)
}

async fn resolve_sprint(
    client: &BackendClient,
    request: &LaunchRequest,
) -> Result<Sprint, LaunchError> {
    if let Some(id) = &request.sprint_id {
        return Ok(client.get_sprint(id).await?);
    }
    if let Some(id) = &request.board_id {
        return Ok(client.get_board(id).await?);
    }
    let sprints = client.list_sprints().await?;
    sprints
        .into_iter()
        .filter(|s| !s.archived)
        .max_by_key(|s| s.created_at)
        .ok_or_else(|| LaunchError::NoSprint("project has no non-archived sprint".to_string()))
}

/// Snapshot of task ids currently eligible for selection. Frozen on the
/// run record for its lifetime even if the sprint changes afterwards.
pub fn snapshot_eligible_ids(sprint: &Sprint) -> Vec<String> {
    sprint
        .tasks
        .iter()
        .filter(|t| t.is_eligible())
        .map(|t| t.id.clone())
        .collect()
}

fn executor_mode_from_env() -> Result<ExecutorMode, LaunchError> {
    parse_executor_mode(std::env::var("AUTOPILOT_EXECUTOR").ok().as_deref())
}

fn parse_executor_mode(value: Option<&str>) -> Result<ExecutorMode, LaunchError> {
    match value {
        None => Ok(ExecutorMode::default()),
        Some(raw) => raw
            .parse::<ExecutorMode>()
            .map_err(|e| LaunchError::Other(anyhow::anyhow!("AUTOPILOT_EXECUTOR: {}", e))),
    }
}

/// Spawn the supervisor as a detached OS process: null stdio, its own
/// process group, and never waited on — the launcher returns as soon as the
/// pid is known, and the child outlives it.
fn spawn_supervisor(client: &BackendClient, run: &Run) -> Result<u32, std::io::Error> {
    let exe = std::env::current_exe()?;
    let mut cmd = std::process::Command::new(exe);
    cmd.args([
        "supervise",
        "--run-id",
        &run.run_id,
        "--backend-url",
        client.base_url(),
        "--project",
        client.project_id(),
    ])
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let child = cmd.spawn()?;
    // Dropping the handle without waiting is the detach: the child is
    // reparented when this process exits.
    Ok(child.id())
}

#[cfg(unix)]
fn force_kill(pid: u32) {
    // SIGKILL, not SIGTERM: the graceful path is the cancellation flag.
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn force_kill(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .status();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Task, TaskPriority, TaskStatus};

    #[test]
    fn test_branch_name_accepts_typical_names() {
        for name in &[
            "main",
            "feature/login",
            "autopilot/run-42",
            "release-1.2.3",
            "user_branch",
            "a",
        ] {
            assert!(validate_branch_name(name).is_ok(), "should accept {}", name);
        }
    }

    #[test]
    fn test_branch_name_rejects_whitespace() {
        assert!(validate_branch_name("my branch").is_err());
        assert!(validate_branch_name("tab\tname").is_err());
        assert!(validate_branch_name("newline\nname").is_err());
    }

    #[test]
    fn test_branch_name_rejects_dotdot() {
        assert!(validate_branch_name("a..b").is_err());
        assert!(validate_branch_name("..").is_err());
    }

    #[test]
    fn test_branch_name_rejects_leading_trailing_slash() {
        assert!(validate_branch_name("/leading").is_err());
        assert!(validate_branch_name("trailing/").is_err());
        assert!(validate_branch_name("double//slash").is_err());
    }

    #[test]
    fn test_branch_name_rejects_lock_suffix() {
        assert!(validate_branch_name("branch.lock").is_err());
        // ".lock" inside the name is fine
        assert!(validate_branch_name("branch.locked").is_ok());
    }

    #[test]
    fn test_branch_name_rejects_vcs_unsafe_chars() {
        for name in &[
            "bad~name", "bad^name", "bad:name", "bad?name", "bad*name", "bad[name",
            "bad\\name",
        ] {
            assert!(validate_branch_name(name).is_err(), "should reject {}", name);
        }
    }

    #[test]
    fn test_branch_name_rejects_empty_and_leading_dash() {
        assert!(validate_branch_name("").is_err());
        assert!(validate_branch_name("-flag-like").is_err());
    }

    #[test]
    fn test_branch_name_rejects_non_ascii() {
        assert!(validate_branch_name("brançh").is_err());
        assert!(validate_branch_name("branch@{upstream}").is_err());
    }

    #[test]
    fn test_parse_executor_mode() {
        assert_eq!(parse_executor_mode(None).unwrap(), ExecutorMode::Local);
        assert_eq!(
            parse_executor_mode(Some("local")).unwrap(),
            ExecutorMode::Local
        );
        assert_eq!(
            parse_executor_mode(Some("docker")).unwrap(),
            ExecutorMode::Docker
        );
        assert!(parse_executor_mode(Some("podman")).is_err());
    }

    #[test]
    fn test_snapshot_takes_only_eligible_tasks() {
        let task = |id: &str, status: TaskStatus, passes: bool| Task {
            id: id.to_string(),
            status,
            passes,
            description: String::new(),
            steps: vec![],
            priority: TaskPriority::Medium,
            estimate: None,
            files_touched: vec![],
            failure_notes: None,
            last_run: None,
        };
        let sprint = Sprint {
            id: "s1".into(),
            name: "Sprint 1".into(),
            goal: None,
            archived: false,
            created_at: Utc::now(),
            tasks: vec![
                task("t1", TaskStatus::Todo, false),
                task("t2", TaskStatus::Done, true),
                task("t3", TaskStatus::Backlog, false),
                task("t4", TaskStatus::Todo, true),
            ],
        };
        assert_eq!(snapshot_eligible_ids(&sprint), vec!["t1", "t3"]);
    }
}
