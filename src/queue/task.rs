//! Task data model for the orchestration DAG.
//!
//! Tasks are the atomic units of schedulable work. Each task tracks its
//! status, dependency edges, routing hints, assignment, and results.

use crate::agent::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identifier for one execution attempt of a task by a specific agent.
///
/// A fresh run id is generated every time a task is assigned, so late
/// events from an abandoned attempt can never be confused with the
/// current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task status in its lifecycle.
///
/// `Draft -> Queued <-> Blocked -> Running -> {Completed | Failed}`,
/// with `Cancelled` reachable from every non-terminal state. Terminal
/// states are closed: once entered, a task never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task created but not yet submitted for scheduling.
    Draft,
    /// Task submitted and every dependency satisfied.
    Queued,
    /// Task submitted but waiting on incomplete dependencies.
    Blocked,
    /// Task is currently being executed by an agent.
    Running,
    /// Task completed successfully.
    Completed,
    /// Task failed with an error.
    Failed,
    /// Task was cancelled before completing.
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Draft
    }
}

impl TaskStatus {
    /// Whether the status is one of the closed terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Draft => write!(f, "draft"),
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Blocked => write!(f, "blocked"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Routing hints attached to a task for capability-based assignment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingHints {
    /// Capabilities an agent must have to be considered. Hard filter.
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    /// Domains whose affinity weights contribute to the soft score.
    #[serde(default)]
    pub preferred_domains: Vec<String>,
    /// Routing priority override; falls back to the task's own priority.
    pub priority: Option<i64>,
    /// Constrain assignment to agents attached to this resource scope.
    pub scope_affinity: Option<String>,
}

/// A single task in the orchestration DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Human-readable title.
    pub title: String,
    /// Detailed description of what the task should accomplish.
    pub description: Option<String>,
    /// Scheduling priority; higher is more urgent.
    pub priority: i64,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Resource scope (e.g. a workspace) this task is associated with.
    pub scope: Option<String>,
    /// Free-form metadata bag.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Routing hints for capability-based assignment.
    pub routing: Option<RoutingHints>,
    /// Result payload recorded on completion.
    pub result: Option<serde_json::Value>,
    /// Error message recorded on failure or cascade.
    pub error: Option<String>,
    /// Task ids this task requires, in insertion order.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// Reverse index: tasks that list this one as a dependency.
    /// Derived; rebuilt from `dependencies` on load, never trusted.
    #[serde(default)]
    pub dependents: Vec<TaskId>,
    /// Subset of `dependencies` whose task is not yet completed. Derived.
    #[serde(default)]
    pub blocked_by: Vec<TaskId>,
    /// Agent currently (or last) assigned to this task.
    pub assigned_agent: Option<AgentId>,
    /// Run id of the current (or last) execution attempt.
    pub run_id: Option<RunId>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task was last updated.
    pub updated_at: DateTime<Utc>,
    /// When the task was first submitted for scheduling.
    pub queued_at: Option<DateTime<Utc>>,
    /// When the task first started execution.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Creation sequence number; tiebreak for equal timestamps.
    #[serde(default)]
    pub seq: u64,
}

/// Parameters for creating a new task.
#[derive(Debug, Clone, Default)]
pub struct TaskParams {
    pub title: String,
    pub description: Option<String>,
    pub priority: i64,
    pub scope: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub routing: Option<RoutingHints>,
    pub dependencies: Vec<TaskId>,
}

impl TaskParams {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Default::default()
        }
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn scope(mut self, scope: &str) -> Self {
        self.scope = Some(scope.to_string());
        self
    }

    pub fn depends_on(mut self, ids: &[TaskId]) -> Self {
        self.dependencies = ids.to_vec();
        self
    }

    pub fn routing(mut self, hints: RoutingHints) -> Self {
        self.routing = Some(hints);
        self
    }
}

/// Restricted field merge for `update_task`.
///
/// Identity, creation time, dependency edges, status, run fields, and all
/// derived fields are absent by construction and therefore immutable
/// through this path.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<i64>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub routing: Option<RoutingHints>,
}

impl Task {
    /// Create a new task in `Draft` with the given parameters.
    ///
    /// Dependency edges are copied verbatim; the queue is responsible for
    /// validating them and maintaining the derived fields.
    pub fn new(params: TaskParams, seq: u64) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            title: params.title,
            description: params.description,
            priority: params.priority,
            status: TaskStatus::Draft,
            scope: params.scope,
            metadata: params.metadata,
            routing: params.routing,
            result: None,
            error: None,
            dependencies: params.dependencies,
            dependents: Vec::new(),
            blocked_by: Vec::new(),
            assigned_agent: None,
            run_id: None,
            created_at: now,
            updated_at: now,
            queued_at: None,
            started_at: None,
            completed_at: None,
            seq,
        }
    }

    /// Whether the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the task is queued with every dependency satisfied.
    pub fn is_ready(&self) -> bool {
        self.status == TaskStatus::Queued && self.blocked_by.is_empty()
    }

    /// Stamp `queued_at` if it has never been set.
    pub(crate) fn stamp_queued(&mut self) {
        if self.queued_at.is_none() {
            self.queued_at = Some(Utc::now());
        }
    }

    /// Stamp `started_at` if it has never been set.
    pub(crate) fn stamp_started(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    /// Stamp `completed_at` if it has never been set.
    pub(crate) fn stamp_completed(&mut self) {
        if self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
    }

    /// Apply a restricted update and bump `updated_at`.
    pub(crate) fn apply_update(&mut self, update: TaskUpdate) {
        if let Some(title) = update.title {
            self.title = title;
        }
        if let Some(description) = update.description {
            self.description = Some(description);
        }
        if let Some(priority) = update.priority {
            self.priority = priority;
        }
        if let Some(metadata) = update.metadata {
            self.metadata = metadata;
        }
        if let Some(routing) = update.routing {
            self.routing = Some(routing);
        }
        self.updated_at = Utc::now();
    }
}

/// Filter for `list_tasks`.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Keep only tasks with this status.
    pub status: Option<TaskStatus>,
    /// Keep only tasks associated with this resource scope.
    pub scope: Option<String>,
    /// Keep only tasks assigned to this agent.
    pub assigned_agent: Option<AgentId>,
    /// `Some(true)` keeps only ready tasks; `Some(false)` only non-ready.
    pub ready: Option<bool>,
    /// Truncate the (sorted) result to at most this many tasks.
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(scope) = &self.scope {
            if task.scope.as_deref() != Some(scope.as_str()) {
                return false;
            }
        }
        if let Some(agent) = self.assigned_agent {
            if task.assigned_agent != Some(agent) {
                return false;
            }
        }
        if let Some(ready) = self.ready {
            if task.is_ready() != ready {
                return false;
            }
        }
        true
    }
}

/// Counts of tasks per lifecycle state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub draft: usize,
    pub queued: usize,
    pub blocked: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
}
