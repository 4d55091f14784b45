//! Run supervisor — the iteration loop and its state machine.
//!
//! One supervisor process owns one run for its whole lifetime:
//!
//! ```text
//! queued ──> running ──> completed   (no eligible tasks, or iteration cap)
//!                   ├──> failed      (agent construction, persistence, rate limit)
//!                   └──> stopped     (cancellation observed at an iteration boundary)
//! ```
//!
//! Terminal states are immutable; retry creates a new run rather than
//! resurrecting this one. Within the loop everything is strictly
//! sequential: one agent invocation at a time, and iteration N's task and
//! run writes are durably persisted through the backend client before
//! iteration N+1 starts. The supervisor is the sole writer of `status`,
//! `currentIteration`, and the log during execution.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::agent::{
    create_agent, AgentConfig, AgentContext, AgentRunner, EXIT_RATE_LIMITED, EXIT_SUCCESS,
};
use crate::client::BackendClient;
use crate::errors::AgentError;
use crate::logsink::BackendLogSink;
use crate::models::{Run, RunReason, RunStatus, Task, TaskStatus};

/// Conservative fallback when neither the launch request nor the project's
/// automation settings specify an iteration cap.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Cap on how much captured output is kept as a task's failure notes.
const FAILURE_NOTES_MAX_CHARS: usize = 2000;

type AgentFactory =
    Box<dyn Fn(&AgentConfig) -> Result<Box<dyn AgentRunner>, AgentError> + Send + Sync>;

pub struct Supervisor {
    client: BackendClient,
    agent_factory: AgentFactory,
}

impl Supervisor {
    pub fn new(client: BackendClient) -> Self {
        Self::with_agent_factory(client, Box::new(create_agent))
    }

    /// Inject a scripted agent factory. Production uses `create_agent`;
    /// scenario tests substitute deterministic outcomes here.
    pub fn with_agent_factory(client: BackendClient, agent_factory: AgentFactory) -> Self {
        Self {
            client,
            agent_factory,
        }
    }

    /// Drive one run to a terminal state. Returns the final status; `Err`
    /// only when even the terminal-state write could not be persisted.
    pub async fn run(&self, run_id: &str) -> Result<RunStatus> {
        let mut run = self
            .client
            .get_run(run_id)
            .await
            .context("Failed to load run record")?;

        if run.status.is_terminal() {
            warn!(run_id, status = %run.status, "Run is already terminal; nothing to do");
            return Ok(run.status);
        }

        let settings = match self.client.get_settings().await {
            Ok(s) => s,
            Err(e) => {
                return self
                    .fail_run(
                        &mut run,
                        RunReason::PersistenceFailed,
                        format!("Failed to load project settings: {}", e),
                    )
                    .await;
            }
        };

        let mut sprint = match self.client.get_sprint(&run.sprint_id).await {
            Ok(s) => s,
            Err(e) => {
                let message = format!("Failed to load sprint {}: {}", run.sprint_id, e);
                return self
                    .fail_run(&mut run, RunReason::PersistenceFailed, message)
                    .await;
            }
        };

        run.max_iterations =
            effective_max_iterations(run.max_iterations, settings.automation.max_iterations);

        let config = match AgentConfig::from_settings(
            &settings.automation.agent,
            settings.automation.coding_style.clone(),
        ) {
            Ok(c) => c,
            Err(e) => {
                return self
                    .fail_run(&mut run, RunReason::AgentFailed, e.to_string())
                    .await;
            }
        };
        let agent = match (self.agent_factory)(&config) {
            Ok(a) => a,
            Err(e) => {
                return self
                    .fail_run(&mut run, RunReason::AgentFailed, e.to_string())
                    .await;
            }
        };

        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        run.touch_progress();
        self.client
            .put_run(&run)
            .await
            .context("Failed to mark run as running")?;

        info!(
            run_id,
            sprint_id = %run.sprint_id,
            agent = %config.kind,
            max_iterations = run.max_iterations,
            "Supervisor starting"
        );

        // The agent works in the run's sandbox checkout, not in whatever
        // directory this process happens to run from.
        let sandbox_dir = PathBuf::from(&run.sandbox_path);

        loop {
            // Cancellation is cooperative, polled once per iteration
            // boundary. A force-kill arrives as SIGKILL from the operator,
            // never through this check.
            match self.client.is_cancellation_requested(&run.run_id).await {
                Ok(true) => {
                    info!(run_id, "Cancellation requested; stopping before next iteration");
                    run.last_message = Some("Run stopped: cancellation requested".to_string());
                    run.finish(RunStatus::Stopped, RunReason::Canceled);
                    self.client
                        .put_run(&run)
                        .await
                        .context("Failed to persist stopped run")?;
                    return Ok(RunStatus::Stopped);
                }
                Ok(false) => {}
                Err(e) => {
                    return self
                        .fail_run(
                            &mut run,
                            RunReason::PersistenceFailed,
                            format!("Cancellation check failed: {}", e),
                        )
                        .await;
                }
            }

            // Reaching the cap is a completion, not an error.
            if run.current_iteration >= run.max_iterations {
                run.last_message = Some(format!(
                    "Reached max iterations ({})",
                    run.max_iterations
                ));
                run.finish(RunStatus::Completed, RunReason::MaxIterations);
                self.client
                    .put_run(&run)
                    .await
                    .context("Failed to persist completed run")?;
                return Ok(RunStatus::Completed);
            }

            let Some(task_id) =
                select_next_task(&sprint.tasks, &run.selected_task_ids).map(|t| t.id.clone())
            else {
                run.last_message =
                    Some("All selected tasks are done or have passed".to_string());
                run.finish(RunStatus::Completed, RunReason::AllTasksDone);
                self.client
                    .put_run(&run)
                    .await
                    .context("Failed to persist completed run")?;
                return Ok(RunStatus::Completed);
            };

            let task_idx = sprint
                .tasks
                .iter()
                .position(|t| t.id == task_id)
                .context("Selected task vanished from sprint")?;

            sprint.tasks[task_idx].status = TaskStatus::InProgress;
            sprint.tasks[task_idx].last_run = Some(Utc::now());
            run.last_task_id = Some(task_id.clone());
            run.touch_progress();

            if let Err(e) = self.persist(&sprint, &run).await {
                return self
                    .fail_run(&mut run, RunReason::PersistenceFailed, e)
                    .await;
            }

            let iteration = run.current_iteration + 1;
            info!(run_id, iteration, task_id = %task_id, "Invoking agent");

            let mut sink = BackendLogSink::new(&self.client, &run.run_id);
            let ctx = AgentContext {
                sandbox_dir: &sandbox_dir,
                sink: &mut sink,
                iteration,
            };
            let outcome = match agent.run(ctx).await {
                Ok(o) => o,
                Err(AgentError::Log(e)) => {
                    return self
                        .fail_run(
                            &mut run,
                            RunReason::PersistenceFailed,
                            format!("Failed to persist agent log: {}", e),
                        )
                        .await;
                }
                Err(e) => {
                    return self
                        .fail_run(
                            &mut run,
                            RunReason::AgentFailed,
                            format!("Agent invocation failed: {}", e),
                        )
                        .await;
                }
            };

            run.current_iteration = iteration;
            run.last_command = Some(format!("{} iteration {}", config.kind, iteration));
            run.last_command_exit_code = Some(outcome.exit_code);
            run.touch_progress();

            match outcome.exit_code {
                EXIT_SUCCESS => {
                    sprint.tasks[task_idx].status = TaskStatus::Done;
                    sprint.tasks[task_idx].passes = true;
                    sprint.tasks[task_idx].failure_notes = None;
                    run.last_message = Some(format!("Task {} completed", task_id));
                    info!(run_id, iteration, task_id = %task_id, "Task completed");
                }
                EXIT_RATE_LIMITED => {
                    // Halt in the retryable terminal state. The task keeps
                    // its in-progress status so a retried run picks it up
                    // first; it is not marked done or sent to review.
                    run.record_error(
                        "Agent rate-limited by its provider; run halted, retry later"
                            .to_string(),
                    );
                    run.finish(RunStatus::Failed, RunReason::RateLimited);
                    warn!(run_id, iteration, "Agent rate-limited; halting run");
                    if let Err(e) = self.persist(&sprint, &run).await {
                        error!(run_id, error = %e, "Failed to persist rate-limited halt");
                        anyhow::bail!(e);
                    }
                    return Ok(RunStatus::Failed);
                }
                _ => {
                    sprint.tasks[task_idx].status = TaskStatus::Review;
                    sprint.tasks[task_idx].passes = false;
                    sprint.tasks[task_idx].failure_notes =
                        Some(derive_failure_notes(&outcome.output));
                    run.last_message = Some(format!(
                        "Task {} failed (exit {}); moving to next eligible task",
                        task_id, outcome.exit_code
                    ));
                    warn!(run_id, iteration, task_id = %task_id, exit_code = outcome.exit_code, "Task sent to review");
                }
            }

            // Iteration N's writes land before iteration N+1 starts. A
            // failed write means we no longer know what the store holds, so
            // the run aborts rather than continuing on stale assumptions.
            if let Err(e) = self.persist(&sprint, &run).await {
                return self
                    .fail_run(&mut run, RunReason::PersistenceFailed, e)
                    .await;
            }

            if outcome.is_success() && outcome.signals_no_more_work() {
                run.last_message = Some("Agent reports no remaining work".to_string());
                run.finish(RunStatus::Completed, RunReason::AllTasksDone);
                self.client
                    .put_run(&run)
                    .await
                    .context("Failed to persist completed run")?;
                return Ok(RunStatus::Completed);
            }
        }
    }

    /// Task write first, then the run record; a dashboard polling between
    /// the two sees eventual rather than atomic consistency by design.
    async fn persist(&self, sprint: &crate::models::Sprint, run: &Run) -> Result<(), String> {
        self.client
            .put_sprint(sprint)
            .await
            .map_err(|e| format!("Failed to persist sprint {}: {}", sprint.id, e))?;
        self.client
            .put_run(run)
            .await
            .map_err(|e| format!("Failed to persist run {}: {}", run.run_id, e))?;
        Ok(())
    }

    async fn fail_run(
        &self,
        run: &mut Run,
        reason: RunReason,
        message: String,
    ) -> Result<RunStatus> {
        error!(run_id = %run.run_id, reason = %reason, "{}", message);
        run.record_error(message);
        run.finish(RunStatus::Failed, reason);
        self.client
            .put_run(run)
            .await
            .context("Failed to persist run failure")?;
        Ok(RunStatus::Failed)
    }
}

/// Explicit request value wins, then the automation setting, then the
/// compiled-in default. Zero means "not specified".
pub fn effective_max_iterations(requested: u32, automation: Option<u32>) -> u32 {
    if requested > 0 {
        requested
    } else {
        automation
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_MAX_ITERATIONS)
    }
}

/// Pick the next task: first eligible `in_progress` task in stored order,
/// else first `todo`, else first `backlog`. Only tasks in the run's frozen
/// launch snapshot are considered; review tasks are never re-selected
/// automatically.
pub fn select_next_task<'a>(tasks: &'a [Task], selected_ids: &[String]) -> Option<&'a Task> {
    for bucket in [TaskStatus::InProgress, TaskStatus::Todo, TaskStatus::Backlog] {
        if let Some(task) = tasks.iter().find(|t| {
            t.status == bucket && t.is_eligible() && selected_ids.iter().any(|id| id == &t.id)
        }) {
            return Some(task);
        }
    }
    None
}

/// Failure notes carry the tail of the transcript — the end of the output
/// is where build and test failures actually say what went wrong.
pub fn derive_failure_notes(output: &str) -> String {
    let trimmed = output.trim();
    let char_count = trimmed.chars().count();
    if char_count <= FAILURE_NOTES_MAX_CHARS {
        trimmed.to_string()
    } else {
        let skip = char_count - FAILURE_NOTES_MAX_CHARS;
        trimmed.chars().skip(skip).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskPriority;

    fn task(id: &str, status: TaskStatus, passes: bool) -> Task {
        Task {
            id: id.to_string(),
            status,
            passes,
            description: format!("task {}", id),
            steps: vec![],
            priority: TaskPriority::Medium,
            estimate: None,
            files_touched: vec![],
            failure_notes: None,
            last_run: None,
        }
    }

    fn ids(tasks: &[Task]) -> Vec<String> {
        tasks.iter().map(|t| t.id.clone()).collect()
    }

    #[test]
    fn test_select_prefers_in_progress_over_todo_and_backlog() {
        let tasks = vec![
            task("backlog-1", TaskStatus::Backlog, false),
            task("todo-1", TaskStatus::Todo, false),
            task("wip-1", TaskStatus::InProgress, false),
        ];
        let selected = select_next_task(&tasks, &ids(&tasks)).unwrap();
        assert_eq!(selected.id, "wip-1");
    }

    #[test]
    fn test_select_prefers_todo_over_backlog() {
        let tasks = vec![
            task("backlog-1", TaskStatus::Backlog, false),
            task("todo-1", TaskStatus::Todo, false),
        ];
        let selected = select_next_task(&tasks, &ids(&tasks)).unwrap();
        assert_eq!(selected.id, "todo-1");
    }

    #[test]
    fn test_select_first_match_within_bucket_wins() {
        let tasks = vec![
            task("todo-a", TaskStatus::Todo, false),
            task("todo-b", TaskStatus::Todo, false),
        ];
        let selected = select_next_task(&tasks, &ids(&tasks)).unwrap();
        assert_eq!(selected.id, "todo-a");
    }

    #[test]
    fn test_select_ignores_done_and_passed_tasks() {
        let tasks = vec![
            task("done-1", TaskStatus::Done, true),
            task("passed-but-todo", TaskStatus::Todo, true),
            task("backlog-1", TaskStatus::Backlog, false),
        ];
        let selected = select_next_task(&tasks, &ids(&tasks)).unwrap();
        assert_eq!(selected.id, "backlog-1");
    }

    #[test]
    fn test_select_never_picks_review_tasks() {
        let tasks = vec![task("review-1", TaskStatus::Review, false)];
        assert!(select_next_task(&tasks, &ids(&tasks)).is_none());
    }

    #[test]
    fn test_select_respects_launch_snapshot() {
        let tasks = vec![
            task("outside", TaskStatus::InProgress, false),
            task("inside", TaskStatus::Backlog, false),
        ];
        let selected = select_next_task(&tasks, &["inside".to_string()]).unwrap();
        assert_eq!(selected.id, "inside");
    }

    #[test]
    fn test_select_returns_none_when_nothing_eligible() {
        let tasks = vec![
            task("done-1", TaskStatus::Done, true),
            task("review-1", TaskStatus::Review, false),
        ];
        assert!(select_next_task(&tasks, &ids(&tasks)).is_none());
        assert!(select_next_task(&[], &[]).is_none());
    }

    #[test]
    fn test_select_is_stable_regardless_of_other_bucket_order() {
        // Shuffling backlog entries must not affect which todo wins.
        let tasks = vec![
            task("backlog-z", TaskStatus::Backlog, false),
            task("todo-1", TaskStatus::Todo, false),
            task("backlog-a", TaskStatus::Backlog, false),
        ];
        let selected = select_next_task(&tasks, &ids(&tasks)).unwrap();
        assert_eq!(selected.id, "todo-1");
    }

    #[test]
    fn test_effective_max_iterations_request_wins() {
        assert_eq!(effective_max_iterations(5, Some(20)), 5);
    }

    #[test]
    fn test_effective_max_iterations_falls_back_to_automation() {
        assert_eq!(effective_max_iterations(0, Some(20)), 20);
    }

    #[test]
    fn test_effective_max_iterations_default() {
        assert_eq!(effective_max_iterations(0, None), DEFAULT_MAX_ITERATIONS);
        assert_eq!(effective_max_iterations(0, Some(0)), DEFAULT_MAX_ITERATIONS);
    }

    #[test]
    fn test_derive_failure_notes_short_output_passes_through() {
        assert_eq!(derive_failure_notes("  test failed: assertion  "), "test failed: assertion");
    }

    #[test]
    fn test_derive_failure_notes_keeps_tail_of_long_output() {
        let output = format!("{}THE ACTUAL ERROR", "x".repeat(5000));
        let notes = derive_failure_notes(&output);
        assert!(notes.ends_with("THE ACTUAL ERROR"));
        assert!(notes.chars().count() <= 2000);
    }
}
