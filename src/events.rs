//! Event types and the fan-out bus connecting the engine's components.
//!
//! Publishing is fire-and-forget: the bus never waits on subscribers, and
//! a publish with no live subscribers is not an error. Handlers therefore
//! re-validate whatever state they depend on when they run.

use crate::agent::{AgentId, AgentState};
use crate::queue::task::{RunId, TaskId, TaskStatus};
use tokio::sync::broadcast;

/// Default buffer size for event subscriptions.
pub const EVENT_BUFFER: usize = 256;

/// Lifecycle events emitted by the task queue.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// A task was created (in draft).
    Created {
        /// The task that was created.
        task_id: TaskId,
    },
    /// A task was assigned to an agent and marked running.
    Assigned {
        /// The task that was assigned.
        task_id: TaskId,
        /// The agent the task was assigned to.
        agent_id: AgentId,
        /// The fresh run id for this attempt.
        run_id: RunId,
    },
    /// A task moved between lifecycle states.
    StateChanged {
        /// The task that changed state.
        task_id: TaskId,
        /// State before the transition.
        from: TaskStatus,
        /// State after the transition.
        to: TaskStatus,
    },
    /// A task completed successfully.
    Completed {
        /// The task that completed.
        task_id: TaskId,
        /// The agent that ran it, if one was assigned.
        agent_id: Option<AgentId>,
    },
    /// A task failed (directly or via cascade).
    Failed {
        /// The task that failed.
        task_id: TaskId,
        /// The agent that ran it, if one was assigned.
        agent_id: Option<AgentId>,
        /// Error message describing the failure.
        error: String,
    },
    /// A task was cancelled (directly or via cascade).
    Cancelled {
        /// The task that was cancelled.
        task_id: TaskId,
        /// The agent that was running it, if any.
        agent_id: Option<AgentId>,
    },
    /// A task was deleted from the queue.
    Deleted {
        /// The task that was deleted.
        task_id: TaskId,
    },
}

/// Events arriving from the external hosting layer.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// An agent's lifecycle state changed.
    AgentStateChanged {
        /// The agent whose state changed.
        agent_id: AgentId,
        /// The newly reported state.
        state: AgentState,
    },
    /// An agent reported finishing its current work.
    AgentCompleted {
        /// The reporting agent.
        agent_id: AgentId,
        /// Optional result payload from the agent.
        payload: Option<serde_json::Value>,
    },
    /// An agent reported a failure.
    AgentFailed {
        /// The reporting agent.
        agent_id: AgentId,
        /// Error message describing the failure.
        error: String,
    },
    /// A resource scope (e.g. a workspace) was removed.
    ResourceRemoved {
        /// The scope that no longer exists.
        scope: String,
    },
}

/// Broadcast-backed publish/subscribe bus.
///
/// Slow subscribers that fall more than `EVENT_BUFFER` events behind see
/// a lagged error from their receiver; the publisher is never blocked.
#[derive(Debug, Clone)]
pub struct EventBus<T: Clone> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> EventBus<T> {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    /// Publish an event to all current subscribers; fire-and-forget.
    pub fn publish(&self, event: T) {
        let _ = self.tx.send(event);
    }

    /// Open a new subscription starting from the next published event.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}
