//! Task queue: the DAG store and lifecycle state machine.
//!
//! All mutation goes through [`TaskQueue`], which owns the in-memory task
//! map, keeps the derived edge indexes consistent, validates dependency
//! edges before committing them, and emits a [`TaskEvent`] for every
//! observable change. Persistence is write-behind through a
//! [`persist::DebouncedStore`]; `flush` forces a checkpoint.

pub mod graph;
pub mod persist;
pub mod task;

use crate::agent::AgentId;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{EventBus, TaskEvent};
use crate::{flog, flog_debug, flog_warn};
use persist::{DebouncedStore, JsonFileStore, MemoryStore, TaskStore};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use task::{RunId, Task, TaskFilter, TaskId, TaskParams, TaskStats, TaskStatus, TaskUpdate};
use tokio::sync::broadcast;

/// In-memory task DAG for one resource scope, backed by a store.
pub struct TaskQueue {
    tasks: HashMap<TaskId, Task>,
    scope: String,
    store: DebouncedStore,
    events: EventBus<TaskEvent>,
    next_seq: u64,
}

impl TaskQueue {
    /// Open the queue for a scope, loading and reconciling persisted tasks.
    pub fn open(store: Box<dyn TaskStore>, scope: &str, debounce: Duration) -> Result<Self> {
        let mut queue = Self {
            tasks: HashMap::new(),
            scope: scope.to_string(),
            store: DebouncedStore::new(store, debounce),
            events: EventBus::new(),
            next_seq: 0,
        };
        queue.load_scope()?;
        Ok(queue)
    }

    /// Open a scope against the configured state directory and debounce.
    pub fn open_with_config(config: &Config, scope: &str) -> Result<Self> {
        let store = JsonFileStore::new(config.state_dir()?);
        Self::open(Box::new(store), scope, config.save_debounce())
    }

    /// Ephemeral queue with no debounce, for tests and demos.
    pub fn in_memory(scope: &str) -> Self {
        Self::open(Box::new(MemoryStore::new()), scope, Duration::from_millis(0))
            .expect("memory store load cannot fail")
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Subscribe to the queue's lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    // ---- creation and edits ----

    /// Create a task in `Draft`. Dependencies must exist and must not
    /// introduce a cycle; the whole creation is rejected otherwise.
    pub fn create_task(&mut self, mut params: TaskParams) -> Result<Task> {
        // Dedupe the edge list while preserving first-mention order.
        let mut seen = HashSet::new();
        params.dependencies.retain(|d| seen.insert(*d));

        for dep in &params.dependencies {
            if !self.tasks.contains_key(dep) {
                return Err(Error::DependencyNotFound(*dep));
            }
        }

        let mut task = Task::new(params, self.next_seq);
        graph::validate_with_edges(&self.tasks, task.id, &task.dependencies)?;
        self.next_seq += 1;

        task.blocked_by = self.compute_blocked_by(&task.dependencies);
        let id = task.id;
        for dep in task.dependencies.clone() {
            if let Some(dep_task) = self.tasks.get_mut(&dep) {
                dep_task.dependents.push(id);
            }
        }
        flog!("Task {} created: {}", id.short(), task.title);
        self.tasks.insert(id, task.clone());
        self.events.publish(TaskEvent::Created { task_id: id });
        self.schedule_save()?;
        Ok(task)
    }

    pub fn get_task(&self, id: TaskId) -> Option<Task> {
        self.tasks.get(&id).cloned()
    }

    /// Merge a restricted field update into an existing task.
    pub fn update_task(&mut self, id: TaskId, update: TaskUpdate) -> Result<Task> {
        let task = self.tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
        task.apply_update(update);
        let updated = task.clone();
        self.schedule_save()?;
        Ok(updated)
    }

    /// Add a dependency edge `id -> dep`. Idempotent; only legal while the
    /// task is in `Draft`, `Queued`, or `Blocked`.
    pub fn add_dependency(&mut self, id: TaskId, dep: TaskId) -> Result<()> {
        let task = self.tasks.get(&id).ok_or(Error::TaskNotFound(id))?;
        if !self.tasks.contains_key(&dep) {
            return Err(Error::DependencyNotFound(dep));
        }
        if !matches!(
            task.status,
            TaskStatus::Draft | TaskStatus::Queued | TaskStatus::Blocked
        ) {
            return Err(Error::InvalidStateTransition {
                op: "add dependency to".to_string(),
                status: task.status.to_string(),
            });
        }
        if task.dependencies.contains(&dep) {
            return Ok(());
        }

        let mut proposed = task.dependencies.clone();
        proposed.push(dep);
        graph::validate_with_edges(&self.tasks, id, &proposed)?;

        if let Some(task) = self.tasks.get_mut(&id) {
            task.dependencies = proposed;
        }
        if let Some(dep_task) = self.tasks.get_mut(&dep) {
            dep_task.dependents.push(id);
        }
        self.refresh_blocking(id);
        flog_debug!("Dependency added: {} -> {}", id.short(), dep.short());
        self.schedule_save()?;
        Ok(())
    }

    /// Remove a dependency edge. Removing an absent edge is a no-op.
    pub fn remove_dependency(&mut self, id: TaskId, dep: TaskId) -> Result<()> {
        let task = self.tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
        if !task.dependencies.contains(&dep) {
            return Ok(());
        }
        task.dependencies.retain(|d| *d != dep);
        if let Some(dep_task) = self.tasks.get_mut(&dep) {
            dep_task.dependents.retain(|d| *d != id);
        }
        self.refresh_blocking(id);
        flog_debug!("Dependency removed: {} -> {}", id.short(), dep.short());
        self.schedule_save()?;
        Ok(())
    }

    /// Delete a task and detach it from both sides of the graph.
    pub fn delete_task(&mut self, id: TaskId) -> Result<()> {
        let status = self
            .tasks
            .get(&id)
            .ok_or(Error::TaskNotFound(id))?
            .status;
        if status == TaskStatus::Running {
            return Err(Error::InvalidStateTransition {
                op: "delete".to_string(),
                status: status.to_string(),
            });
        }
        let Some(removed) = self.tasks.remove(&id) else {
            return Err(Error::TaskNotFound(id));
        };
        for dep in &removed.dependencies {
            if let Some(dep_task) = self.tasks.get_mut(dep) {
                dep_task.dependents.retain(|d| *d != id);
            }
        }
        for dependent in removed.dependents.clone() {
            if let Some(task) = self.tasks.get_mut(&dependent) {
                task.dependencies.retain(|d| *d != id);
            }
            self.refresh_blocking(dependent);
        }
        flog!("Task {} deleted", id.short());
        self.events.publish(TaskEvent::Deleted { task_id: id });
        self.schedule_save()?;
        Ok(())
    }

    // ---- lifecycle transitions ----

    /// Submit a draft for scheduling; lands in `Queued` or `Blocked`
    /// depending on its dependencies.
    pub fn enqueue_task(&mut self, id: TaskId) -> Result<Task> {
        let task = self.tasks.get(&id).ok_or(Error::TaskNotFound(id))?;
        if task.status != TaskStatus::Draft {
            return Err(Error::InvalidStateTransition {
                op: "enqueue".to_string(),
                status: task.status.to_string(),
            });
        }
        let blocked_by = self.compute_blocked_by(&task.dependencies);
        let to = if blocked_by.is_empty() {
            TaskStatus::Queued
        } else {
            TaskStatus::Blocked
        };

        let Some(task) = self.tasks.get_mut(&id) else {
            return Err(Error::TaskNotFound(id));
        };
        task.blocked_by = blocked_by;
        task.stamp_queued();
        task.status = to;
        let enqueued = task.clone();
        flog!("Task {} enqueued as {}", id.short(), to);
        self.events.publish(TaskEvent::StateChanged {
            task_id: id,
            from: TaskStatus::Draft,
            to,
        });
        self.schedule_save()?;
        Ok(enqueued)
    }

    /// The highest-priority ready task, if any. Ties break on creation
    /// order, so the selection is deterministic. Pure read: the task is
    /// not mutated until `mark_running`.
    pub fn dequeue_next(&self) -> Option<Task> {
        let mut ready: Vec<&Task> = self.tasks.values().filter(|t| t.is_ready()).collect();
        ready.sort_by(dispatch_order);
        ready.first().map(|t| (*t).clone())
    }

    /// All ready tasks in dispatch order.
    pub fn ready_tasks(&self) -> Vec<Task> {
        let mut ready: Vec<&Task> = self.tasks.values().filter(|t| t.is_ready()).collect();
        ready.sort_by(dispatch_order);
        ready.into_iter().cloned().collect()
    }

    /// Record that an agent started executing a queued task.
    pub fn mark_running(&mut self, id: TaskId, agent_id: AgentId, run_id: RunId) -> Result<Task> {
        let task = self.tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
        if task.status != TaskStatus::Queued || !task.blocked_by.is_empty() {
            return Err(Error::InvalidStateTransition {
                op: "start".to_string(),
                status: task.status.to_string(),
            });
        }
        task.assigned_agent = Some(agent_id);
        task.run_id = Some(run_id);
        task.stamp_started();
        task.status = TaskStatus::Running;
        let running = task.clone();
        flog!(
            "Task {} running on agent {} (run {})",
            id.short(),
            agent_id.short(),
            run_id.short()
        );
        self.events.publish(TaskEvent::StateChanged {
            task_id: id,
            from: TaskStatus::Queued,
            to: TaskStatus::Running,
        });
        self.events.publish(TaskEvent::Assigned {
            task_id: id,
            agent_id,
            run_id,
        });
        self.schedule_save()?;
        Ok(running)
    }

    /// Complete a running task and unblock its dependents.
    pub fn mark_completed(&mut self, id: TaskId, result: Option<serde_json::Value>) -> Result<()> {
        let task = self.tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
        if task.status != TaskStatus::Running {
            return Err(Error::InvalidStateTransition {
                op: "complete".to_string(),
                status: task.status.to_string(),
            });
        }
        let agent_id = task.assigned_agent;
        task.status = TaskStatus::Completed;
        task.result = result;
        task.stamp_completed();
        let dependents = task.dependents.clone();
        flog!("Task {} completed", id.short());
        self.events.publish(TaskEvent::StateChanged {
            task_id: id,
            from: TaskStatus::Running,
            to: TaskStatus::Completed,
        });
        self.events
            .publish(TaskEvent::Completed { task_id: id, agent_id });

        for dependent in dependents {
            self.refresh_blocking(dependent);
        }
        self.schedule_save()?;
        Ok(())
    }

    /// Fail a running task and cascade failure to everything downstream.
    pub fn mark_failed(&mut self, id: TaskId, error: &str) -> Result<()> {
        let task = self.tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
        if task.status != TaskStatus::Running {
            return Err(Error::InvalidStateTransition {
                op: "fail".to_string(),
                status: task.status.to_string(),
            });
        }
        let agent_id = task.assigned_agent;
        task.status = TaskStatus::Failed;
        task.error = Some(error.to_string());
        task.stamp_completed();
        flog_warn!("Task {} failed: {}", id.short(), error);
        self.events.publish(TaskEvent::StateChanged {
            task_id: id,
            from: TaskStatus::Running,
            to: TaskStatus::Failed,
        });
        self.events.publish(TaskEvent::Failed {
            task_id: id,
            agent_id,
            error: error.to_string(),
        });
        self.cascade(id, TaskStatus::Failed);
        self.schedule_save()?;
        Ok(())
    }

    /// Cancel a task in any non-terminal state and cascade the
    /// cancellation downstream.
    pub fn cancel_task(&mut self, id: TaskId) -> Result<()> {
        let task = self.tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
        if task.is_terminal() {
            return Err(Error::InvalidStateTransition {
                op: "cancel".to_string(),
                status: task.status.to_string(),
            });
        }
        let from = task.status;
        let agent_id = task.assigned_agent;
        task.status = TaskStatus::Cancelled;
        task.stamp_completed();
        flog!("Task {} cancelled (was {})", id.short(), from);
        self.events.publish(TaskEvent::StateChanged {
            task_id: id,
            from,
            to: TaskStatus::Cancelled,
        });
        self.events
            .publish(TaskEvent::Cancelled { task_id: id, agent_id });
        self.cascade(id, TaskStatus::Cancelled);
        self.schedule_save()?;
        Ok(())
    }

    /// Propagate a terminal outcome from `root` to its transitive
    /// dependents. Each downstream task is visited exactly once even when
    /// it is reachable along multiple paths, and each is annotated with
    /// the immediate upstream that took it down. Best-effort: a dangling
    /// edge is logged and skipped, never an error.
    fn cascade(&mut self, root: TaskId, outcome: TaskStatus) {
        let verb = match outcome {
            TaskStatus::Cancelled => "cancelled",
            _ => "failed",
        };
        let mut visited: HashSet<TaskId> = HashSet::new();
        visited.insert(root);
        let mut pending: Vec<(TaskId, TaskId)> = self
            .tasks
            .get(&root)
            .map(|t| t.dependents.iter().map(|d| (root, *d)).collect())
            .unwrap_or_default();

        while let Some((upstream, id)) = pending.pop() {
            if !visited.insert(id) {
                continue;
            }
            let Some(task) = self.tasks.get_mut(&id) else {
                flog_warn!(
                    "Cascade from {} hit dangling dependent {}",
                    upstream.short(),
                    id.short()
                );
                continue;
            };
            if task.is_terminal() {
                continue;
            }
            let from = task.status;
            let agent_id = task.assigned_agent;
            let note = format!("upstream task {} {}", upstream.short(), verb);
            task.status = outcome;
            task.error = Some(note.clone());
            task.stamp_completed();
            let dependents = task.dependents.clone();

            flog!("Task {} {} via cascade: {}", id.short(), verb, note);
            self.events.publish(TaskEvent::StateChanged {
                task_id: id,
                from,
                to: outcome,
            });
            match outcome {
                TaskStatus::Cancelled => self
                    .events
                    .publish(TaskEvent::Cancelled { task_id: id, agent_id }),
                _ => self.events.publish(TaskEvent::Failed {
                    task_id: id,
                    agent_id,
                    error: note,
                }),
            }
            for dependent in dependents {
                pending.push((id, dependent));
            }
        }
    }

    // ---- queries ----

    /// Tasks matching a filter, in dispatch order, truncated to its limit.
    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().filter(|t| filter.matches(t)).collect();
        tasks.sort_by(dispatch_order);
        if let Some(limit) = filter.limit {
            tasks.truncate(limit);
        }
        tasks.into_iter().cloned().collect()
    }

    /// All blocked tasks with their unsatisfied dependencies.
    pub fn blocked_tasks(&self) -> Vec<Task> {
        self.list_tasks(&TaskFilter {
            status: Some(TaskStatus::Blocked),
            ..Default::default()
        })
    }

    /// Counts per lifecycle state.
    pub fn stats(&self) -> TaskStats {
        let mut stats = TaskStats::default();
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Draft => stats.draft += 1,
                TaskStatus::Queued => stats.queued += 1,
                TaskStatus::Blocked => stats.blocked += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats.total = self.tasks.len();
        stats
    }

    // ---- persistence ----

    /// Force a write of any pending changes.
    pub fn flush(&mut self) -> Result<()> {
        let tasks = self.snapshot();
        self.store.flush(&self.scope, &tasks)
    }

    /// Flush the current scope, then load and reconcile another.
    pub fn switch_scope(&mut self, scope: &str) -> Result<()> {
        self.flush()?;
        self.scope = scope.to_string();
        self.load_scope()
    }

    fn schedule_save(&mut self) -> Result<()> {
        let tasks = self.snapshot();
        self.store.schedule(&self.scope, &tasks)
    }

    /// Stable on-disk ordering: creation sequence.
    fn snapshot(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.seq);
        tasks
    }

    fn load_scope(&mut self) -> Result<()> {
        let loaded = self.store.load(&self.scope)?;
        flog!(
            "Loading scope '{}': {} persisted tasks",
            self.scope,
            loaded.len()
        );
        self.tasks = loaded.into_iter().map(|t| (t.id, t)).collect();
        self.reconcile();
        Ok(())
    }

    /// Rebuild every derived field after a load. Persisted data is never
    /// trusted: dangling edges are pruned with a warning, the reverse
    /// index is recomputed from scratch, and tasks found `Running` are
    /// demoted since no agent survives a restart.
    fn reconcile(&mut self) {
        let ids: HashSet<TaskId> = self.tasks.keys().copied().collect();

        for task in self.tasks.values_mut() {
            task.dependents.clear();
            let before = task.dependencies.len();
            task.dependencies.retain(|d| ids.contains(d));
            let pruned = before - task.dependencies.len();
            if pruned > 0 {
                flog_warn!(
                    "Task {}: pruned {} dangling dependencies",
                    task.id.short(),
                    pruned
                );
            }
        }

        for id in &ids {
            let deps = self.tasks[id].dependencies.clone();
            for dep in deps {
                if let Some(dep_task) = self.tasks.get_mut(&dep) {
                    dep_task.dependents.push(*id);
                }
            }
        }

        for id in &ids {
            let deps = self.tasks[id].dependencies.clone();
            let blocked_by = self.compute_blocked_by(&deps);
            let Some(task) = self.tasks.get_mut(id) else {
                continue;
            };
            task.blocked_by = blocked_by;

            // Keep the Queued <-> Blocked invariant after pruning
            match (task.status, task.blocked_by.is_empty()) {
                (TaskStatus::Blocked, true) => task.status = TaskStatus::Queued,
                (TaskStatus::Queued, false) => task.status = TaskStatus::Blocked,
                _ => {}
            }

            if task.status == TaskStatus::Running {
                // No agent survives a restart; hand the task back out.
                task.assigned_agent = None;
                task.run_id = None;
                task.started_at = None;
                task.status = if task.blocked_by.is_empty() {
                    TaskStatus::Queued
                } else {
                    TaskStatus::Blocked
                };
                flog_warn!(
                    "Task {} was running at shutdown; demoted to {}",
                    id.short(),
                    task.status
                );
            }
        }

        self.next_seq = self
            .tasks
            .values()
            .map(|t| t.seq + 1)
            .max()
            .unwrap_or(0);
    }

    // ---- derived-field helpers ----

    /// Dependencies whose task has not completed. A missing dependency at
    /// this point is corruption; it is logged and treated as satisfied.
    fn compute_blocked_by(&self, deps: &[TaskId]) -> Vec<TaskId> {
        deps.iter()
            .filter(|&&d| match self.tasks.get(&d) {
                Some(dep) => dep.status != TaskStatus::Completed,
                None => {
                    flog_warn!("Dependency {} missing during blocking check", d.short());
                    false
                }
            })
            .copied()
            .collect()
    }

    /// Recompute `blocked_by` for one task and apply any resulting
    /// `Queued <-> Blocked` transition.
    fn refresh_blocking(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get(&id) else {
            return;
        };
        let blocked_by = self.compute_blocked_by(&task.dependencies.clone());
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        task.blocked_by = blocked_by;

        let transition = match (task.status, task.blocked_by.is_empty()) {
            (TaskStatus::Blocked, true) => Some((TaskStatus::Blocked, TaskStatus::Queued)),
            (TaskStatus::Queued, false) => Some((TaskStatus::Queued, TaskStatus::Blocked)),
            _ => None,
        };
        if let Some((from, to)) = transition {
            task.status = to;
            flog_debug!("Task {} moved {} -> {}", id.short(), from, to);
            self.events.publish(TaskEvent::StateChanged {
                task_id: id,
                from,
                to,
            });
        }
    }
}

/// Dispatch ordering: priority descending, then creation time, then
/// creation sequence as the final deterministic tiebreak.
fn dispatch_order(a: &&Task, b: &&Task) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.seq.cmp(&b.seq))
}
