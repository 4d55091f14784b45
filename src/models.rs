//! Shared data model for runs, sprints, tasks, and project settings.
//!
//! Everything here mirrors the backend's JSON wire format: struct fields are
//! camelCase on the wire, enum values are snake_case strings. Each enum
//! round-trips through `as_str`/`FromStr` so CLI flags, database columns,
//! and API payloads all agree on the same spelling.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a run.
///
/// Transitions are one-directional: `queued -> running -> ` one of the
/// terminal states. A terminal run is never resurrected; retry creates a
/// fresh run sharing the sprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Stopped,
    Canceled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::Canceled => "canceled",
        }
    }

    /// Terminal states are immutable once set.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Stopped | Self::Canceled
        )
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            "canceled" => Ok(Self::Canceled),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

/// Why a run reached its terminal status. Stored alongside `status` so an
/// operator can tell a clean finish from an iteration-cap finish, and a
/// retryable rate-limit halt from a hard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunReason {
    AllTasksDone,
    MaxIterations,
    RateLimited,
    Canceled,
    SpawnFailed,
    PersistenceFailed,
    AgentFailed,
}

impl RunReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllTasksDone => "all_tasks_done",
            Self::MaxIterations => "max_iterations",
            Self::RateLimited => "rate_limited",
            Self::Canceled => "canceled",
            Self::SpawnFailed => "spawn_failed",
            Self::PersistenceFailed => "persistence_failed",
            Self::AgentFailed => "agent_failed",
        }
    }

    /// A rate-limited halt is the one terminal state that invites an
    /// immediate external retry without operator investigation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

impl std::fmt::Display for RunReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all_tasks_done" => Ok(Self::AllTasksDone),
            "max_iterations" => Ok(Self::MaxIterations),
            "rate_limited" => Ok(Self::RateLimited),
            "canceled" => Ok(Self::Canceled),
            "spawn_failed" => Ok(Self::SpawnFailed),
            "persistence_failed" => Ok(Self::PersistenceFailed),
            "agent_failed" => Ok(Self::AgentFailed),
            _ => Err(format!("Invalid run reason: {}", s)),
        }
    }
}

/// Where the agent process executes. The docker executor is an external
/// collaborator; this flag is consumed at launch time only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorMode {
    #[default]
    Local,
    Docker,
}

impl ExecutorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Docker => "docker",
        }
    }
}

impl std::fmt::Display for ExecutorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "docker" => Ok(Self::Docker),
            _ => Err(format!("Invalid executor mode: {}", s)),
        }
    }
}

/// One execution of the iteration loop against a sprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub run_id: String,
    pub project_id: String,
    pub sprint_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub reason: Option<RunReason>,
    pub max_iterations: u32,
    pub current_iteration: u32,
    #[serde(default)]
    pub executor_mode: ExecutorMode,
    pub sandbox_path: String,
    pub sandbox_branch: String,
    /// Eligible task ids snapshotted at launch, frozen for the run's lifetime.
    #[serde(default)]
    pub selected_task_ids: Vec<String>,
    #[serde(default)]
    pub last_task_id: Option<String>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_command: Option<String>,
    #[serde(default)]
    pub last_command_exit_code: Option<i32>,
    /// Append-only; cancellation never writes here.
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub pid: Option<u32>,
    /// Presence signals a cancellation request. A second request while
    /// already set is the operator's force-kill signal.
    #[serde(default)]
    pub cancellation_requested_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub triggered_by_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_progress_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Append a plain-text error and mirror it into `lastMessage` so the
    /// record always explains why the run stopped progressing.
    pub fn record_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.last_message = Some(message.clone());
        self.errors.push(message);
    }

    pub fn touch_progress(&mut self) {
        self.last_progress_at = Some(Utc::now());
    }

    /// Move to a terminal status, stamping `finishedAt`. Does nothing if the
    /// run is already terminal.
    pub fn finish(&mut self, status: RunStatus, reason: RunReason) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.reason = Some(reason);
        self.finished_at = Some(Utc::now());
    }
}

/// Workflow status of a task on the sprint board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    Todo,
    InProgress,
    Review,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backlog" => Ok(Self::Backlog),
            "todo" => Ok(Self::Todo),
            "in_progress" => Ok(Self::InProgress),
            "review" => Ok(Self::Review),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid task priority: {}", s)),
        }
    }
}

/// A unit of work with acceptance criteria and a pass/fail outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    /// Acceptance verified. Once true the task is never selected again,
    /// even if `status` later reverts.
    #[serde(default)]
    pub passes: bool,
    pub description: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub estimate: Option<String>,
    #[serde(default)]
    pub files_touched: Vec<String>,
    #[serde(default)]
    pub failure_notes: Option<String>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
}

impl Task {
    /// A task is eligible for selection iff it is not done and has not
    /// already passed acceptance.
    pub fn is_eligible(&self) -> bool {
        self.status != TaskStatus::Done && !self.passes
    }
}

/// A named collection of tasks. "Board" is a legacy synonym at the client
/// layer; both resolve to this resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sprint {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// How aggressively the agent may apply edits without confirmation.
/// Passed straight through to the streaming agent's CLI flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    BypassPermissions,
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "accept_edits",
            Self::BypassPermissions => "bypass_permissions",
        }
    }

    /// Spelling the agent CLI expects for `--permission-mode`.
    pub fn as_cli_flag(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

impl std::fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "accept_edits" => Ok(Self::AcceptEdits),
            "bypass_permissions" => Ok(Self::BypassPermissions),
            _ => Err(format!("Invalid permission mode: {}", s)),
        }
    }
}

/// Agent portion of the project's automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSettings {
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub permission_mode: Option<PermissionMode>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Extra throttling phrases on top of the compiled-in defaults. The
    /// phrase match is a known false-negative risk for unlisted vendors.
    #[serde(default)]
    pub rate_limit_phrases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationConfig {
    #[serde(default)]
    pub max_iterations: Option<u32>,
    pub agent: AgentSettings,
    #[serde(default)]
    pub coding_style: Option<String>,
}

/// Project settings as returned by `GET /projects/{id}/settings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub automation: AutomationConfig,
}
