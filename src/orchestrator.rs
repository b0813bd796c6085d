//! The orchestrator: wires the queue, router, and availability store to
//! the external hosting layer.
//!
//! Every assignment mints a fresh run id and records the run -> task and
//! agent -> run correlations *before* the queue transition commits, so a
//! host event arriving mid-assignment can always be resolved. Events that
//! reference a run the queue no longer recognizes are stale echoes of an
//! abandoned attempt and are dropped.

use crate::agent::AgentId;
use crate::availability::AvailabilityStore;
use crate::error::{Error, Result};
use crate::events::{HostEvent, TaskEvent};
use crate::queue::task::{RunId, TaskFilter, TaskId};
use crate::queue::TaskQueue;
use crate::router::AgentRouter;
use crate::{flog, flog_debug, flog_warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};

/// Drives task assignment and reacts to host events.
pub struct TaskOrchestrator {
    queue: Arc<RwLock<TaskQueue>>,
    router: AgentRouter,
    availability: AvailabilityStore,
    task_rx: broadcast::Receiver<TaskEvent>,
    /// Which task each live run belongs to.
    run_tasks: HashMap<RunId, TaskId>,
    /// The current run of each busy agent.
    agent_runs: HashMap<AgentId, RunId>,
    /// Global cap on simultaneously running tasks.
    max_concurrent: usize,
    /// Reentrancy guard: an assignment pass triggered from within another
    /// pass is skipped, not nested.
    is_assigning: bool,
    disposed: bool,
}

impl TaskOrchestrator {
    pub async fn new(
        queue: Arc<RwLock<TaskQueue>>,
        router: AgentRouter,
        max_concurrent: usize,
    ) -> Self {
        let task_rx = queue.read().await.subscribe();
        Self {
            queue,
            router,
            availability: AvailabilityStore::new(),
            task_rx,
            run_tasks: HashMap::new(),
            agent_runs: HashMap::new(),
            max_concurrent,
            is_assigning: false,
            disposed: false,
        }
    }

    pub fn availability(&self) -> &AvailabilityStore {
        &self.availability
    }

    pub fn availability_mut(&mut self) -> &mut AvailabilityStore {
        &mut self.availability
    }

    /// Number of runs currently in flight.
    pub fn active_runs(&self) -> usize {
        self.run_tasks.len()
    }

    /// Consume host events until the channel closes or `dispose` runs.
    pub async fn run(&mut self, host_rx: &mut mpsc::Receiver<HostEvent>) -> Result<()> {
        while !self.disposed {
            let Some(event) = host_rx.recv().await else {
                break;
            };
            self.handle_host_event(event).await?;
        }
        Ok(())
    }

    /// Dispatch one host event.
    pub async fn handle_host_event(&mut self, event: HostEvent) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        match event {
            HostEvent::AgentStateChanged { agent_id, state } => {
                self.availability.record_state(agent_id, state);
                if state.is_available() {
                    self.drive_assignments().await?;
                }
                Ok(())
            }
            HostEvent::AgentCompleted { agent_id, payload } => {
                self.handle_agent_completed(agent_id, payload).await
            }
            HostEvent::AgentFailed { agent_id, error } => {
                self.handle_agent_failed(agent_id, &error).await
            }
            HostEvent::ResourceRemoved { scope } => self.handle_resource_removed(&scope).await,
        }
    }

    /// Assign ready tasks to eligible agents until either runs out.
    pub async fn drive_assignments(&mut self) -> Result<usize> {
        let mut assigned = 0;
        while self.assign_next_task().await?.is_some() {
            assigned += 1;
        }
        Ok(assigned)
    }

    /// Try to assign the next ready task. `Ok(None)` means nothing to do:
    /// no ready task, no eligible agent, the concurrency cap is reached,
    /// or a pass is already in progress.
    pub async fn assign_next_task(&mut self) -> Result<Option<(TaskId, AgentId, RunId)>> {
        if self.disposed || self.is_assigning {
            return Ok(None);
        }
        self.is_assigning = true;
        let result = self.try_assign().await;
        self.is_assigning = false;
        result
    }

    async fn try_assign(&mut self) -> Result<Option<(TaskId, AgentId, RunId)>> {
        self.pump_task_events();
        if self.run_tasks.len() >= self.max_concurrent {
            flog_debug!(
                "Concurrency cap reached ({}/{})",
                self.run_tasks.len(),
                self.max_concurrent
            );
            return Ok(None);
        }

        let mut queue = self.queue.write().await;
        let Some(task) = queue.dequeue_next() else {
            return Ok(None);
        };
        let hints = task.routing.clone().unwrap_or_default();
        // An agent already correlated with a run is off the table even if
        // it has spare capacity: a second run would overwrite its entry in
        // agent_runs and orphan the first.
        let routed = self
            .router
            .rank(&hints, &self.availability)
            .into_iter()
            .map(|scored| scored.agent_id)
            .find(|id| !self.agent_runs.contains_key(id))
            .or_else(|| {
                // Hint-less tasks may still go to an unregistered live agent
                if task.routing.is_none() {
                    self.router
                        .fallback_agent(task.scope.as_deref(), &self.availability)
                        .filter(|id| !self.agent_runs.contains_key(id))
                } else {
                    None
                }
            });
        let Some(agent_id) = routed else {
            flog_debug!("No eligible agent for task {}", task.id.short());
            return Ok(None);
        };

        // Correlate before committing, so an event racing the transition
        // still resolves to this run.
        let run_id = RunId::new();
        self.run_tasks.insert(run_id, task.id);
        self.agent_runs.insert(agent_id, run_id);

        match queue.mark_running(task.id, agent_id, run_id) {
            Ok(_) => {
                drop(queue);
                self.pump_task_events();
                flog!(
                    "Assigned task {} to agent {} (run {})",
                    task.id.short(),
                    agent_id.short(),
                    run_id.short()
                );
                Ok(Some((task.id, agent_id, run_id)))
            }
            Err(err) => {
                // Roll back the correlations and abort the pass; the task
                // is untouched and stays dispatchable.
                self.run_tasks.remove(&run_id);
                self.agent_runs.remove(&agent_id);
                flog_warn!("Could not start task {}: {}", task.id.short(), err);
                Ok(None)
            }
        }
    }

    async fn handle_agent_completed(
        &mut self,
        agent_id: AgentId,
        payload: Option<serde_json::Value>,
    ) -> Result<()> {
        let Some((run_id, task_id)) = self.current_run(agent_id) else {
            flog_debug!("Completion from agent {} with no run", agent_id.short());
            return Ok(());
        };
        {
            let mut queue = self.queue.write().await;
            if run_is_current(&queue, task_id, run_id) {
                match queue.mark_completed(task_id, payload) {
                    Ok(()) => {}
                    Err(Error::InvalidStateTransition { .. }) => {
                        flog_warn!("Late completion for task {} ignored", task_id.short());
                    }
                    Err(err) => return Err(err),
                }
            } else {
                flog_warn!(
                    "Stale completion for task {} (run {})",
                    task_id.short(),
                    run_id.short()
                );
            }
        }
        // Stale or not, the correlation is dead and the agent is free again
        self.clear_run(agent_id, run_id);
        self.pump_task_events();
        self.drive_assignments().await?;
        Ok(())
    }

    async fn handle_agent_failed(&mut self, agent_id: AgentId, error: &str) -> Result<()> {
        let Some((run_id, task_id)) = self.current_run(agent_id) else {
            flog_debug!("Failure from agent {} with no run", agent_id.short());
            return Ok(());
        };
        {
            let mut queue = self.queue.write().await;
            if run_is_current(&queue, task_id, run_id) {
                match queue.mark_failed(task_id, error) {
                    Ok(()) => {}
                    Err(Error::InvalidStateTransition { .. }) => {
                        flog_warn!("Late failure for task {} ignored", task_id.short());
                    }
                    Err(err) => return Err(err),
                }
            } else {
                flog_warn!(
                    "Stale failure for task {} (run {})",
                    task_id.short(),
                    run_id.short()
                );
            }
        }
        // Stale or not, the correlation is dead and the agent is free again
        self.clear_run(agent_id, run_id);
        self.pump_task_events();
        self.drive_assignments().await?;
        Ok(())
    }

    /// Cancel every non-terminal task tied to a removed resource scope.
    async fn handle_resource_removed(&mut self, scope: &str) -> Result<()> {
        let mut queue = self.queue.write().await;
        let candidates: Vec<TaskId> = queue
            .list_tasks(&TaskFilter {
                scope: Some(scope.to_string()),
                ..Default::default()
            })
            .into_iter()
            .filter(|t| !t.is_terminal())
            .map(|t| t.id)
            .collect();
        flog!(
            "Scope '{}' removed; cancelling {} tasks",
            scope,
            candidates.len()
        );
        for id in candidates {
            // A cascade from an earlier cancellation may have beaten us
            let already_done = queue.get_task(id).map(|t| t.is_terminal()).unwrap_or(true);
            if already_done {
                continue;
            }
            queue.cancel_task(id)?;
        }
        drop(queue);
        self.pump_task_events();
        self.prune_finished_runs().await;
        // Agents whose runs were just pruned can take new work
        self.drive_assignments().await?;
        Ok(())
    }

    /// Flush the queue and stop reacting to anything further.
    pub async fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        self.run_tasks.clear();
        self.agent_runs.clear();
        self.queue.write().await.flush()?;
        flog!("Orchestrator disposed");
        Ok(())
    }

    /// Drain pending queue events into the availability store.
    fn pump_task_events(&mut self) {
        loop {
            match self.task_rx.try_recv() {
                Ok(event) => self.availability.apply(&event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    flog_warn!("Task event stream lagged; {} events dropped", missed);
                }
                Err(_) => break,
            }
        }
    }

    fn current_run(&self, agent_id: AgentId) -> Option<(RunId, TaskId)> {
        let run_id = self.agent_runs.get(&agent_id).copied()?;
        let task_id = self.run_tasks.get(&run_id).copied()?;
        Some((run_id, task_id))
    }

    fn clear_run(&mut self, agent_id: AgentId, run_id: RunId) {
        self.run_tasks.remove(&run_id);
        if self.agent_runs.get(&agent_id) == Some(&run_id) {
            self.agent_runs.remove(&agent_id);
        }
    }

    /// Drop correlations whose task is no longer running, e.g. after a
    /// scope removal cancelled tasks out from under their runs.
    async fn prune_finished_runs(&mut self) {
        let queue = self.queue.read().await;
        let dead: Vec<RunId> = self
            .run_tasks
            .iter()
            .filter(|(run_id, task_id)| !run_is_current(&queue, **task_id, **run_id))
            .map(|(run_id, _)| *run_id)
            .collect();
        drop(queue);
        for run_id in dead {
            self.run_tasks.remove(&run_id);
            self.agent_runs.retain(|_, r| *r != run_id);
        }
    }
}

/// A run is current when the queue still shows the task running under it.
fn run_is_current(queue: &TaskQueue, task_id: TaskId, run_id: RunId) -> bool {
    queue
        .get_task(task_id)
        .map(|t| t.run_id == Some(run_id) && !t.is_terminal())
        .unwrap_or(false)
}
