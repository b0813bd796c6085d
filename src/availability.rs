//! Live agent availability tracking.
//!
//! The store is a projection of the event streams: host events report
//! agent lifecycle states, queue events drive the per-agent active task
//! counter. Counter math is saturating because duplicate or out-of-order
//! terminal events must never push a count negative.

use crate::agent::{AgentId, AgentState};
use crate::events::TaskEvent;
use crate::flog_warn;
use crate::queue::task::TaskId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// What the store knows about one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentAvailability {
    /// Last reported lifecycle state.
    pub state: AgentState,
    /// Tasks currently assigned to this agent.
    pub active_tasks: usize,
    /// When the state last changed.
    pub last_change: DateTime<Utc>,
}

impl Default for AgentAvailability {
    fn default() -> Self {
        Self {
            state: AgentState::Idle,
            active_tasks: 0,
            last_change: Utc::now(),
        }
    }
}

/// Tracks per-agent state and load from the event streams.
#[derive(Debug, Default)]
pub struct AvailabilityStore {
    agents: HashMap<AgentId, AgentAvailability>,
    /// Which agent each in-flight task went to. Fallback for terminal
    /// events that arrive without an agent attached.
    task_agents: HashMap<TaskId, AgentId>,
}

impl AvailabilityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a host-reported lifecycle state for an agent. First sight
    /// of an agent registers it with zero load.
    pub fn record_state(&mut self, agent_id: AgentId, state: AgentState) {
        let entry = self.agents.entry(agent_id).or_default();
        if entry.state != state {
            entry.state = state;
            entry.last_change = Utc::now();
        }
    }

    /// Forget an agent entirely.
    pub fn remove(&mut self, agent_id: AgentId) {
        self.agents.remove(&agent_id);
        self.task_agents.retain(|_, a| *a != agent_id);
    }

    /// Fold one queue event into the load counters.
    pub fn apply(&mut self, event: &TaskEvent) {
        match event {
            TaskEvent::Assigned {
                task_id, agent_id, ..
            } => {
                self.task_agents.insert(*task_id, *agent_id);
                self.agents.entry(*agent_id).or_default().active_tasks += 1;
            }
            TaskEvent::Completed { task_id, agent_id }
            | TaskEvent::Cancelled { task_id, agent_id } => {
                self.release(*task_id, *agent_id);
            }
            TaskEvent::Failed {
                task_id, agent_id, ..
            } => {
                self.release(*task_id, *agent_id);
            }
            TaskEvent::Created { .. }
            | TaskEvent::StateChanged { .. }
            | TaskEvent::Deleted { .. } => {}
        }
    }

    /// Decrement the owning agent's load for a finished task. The agent
    /// comes from the event when present, else from the assignment map.
    /// Tasks that never ran (cascade victims in `Blocked`, cancelled
    /// drafts) resolve to no agent and are ignored.
    fn release(&mut self, task_id: TaskId, event_agent: Option<AgentId>) {
        let agent_id = match event_agent.or_else(|| self.task_agents.get(&task_id).copied()) {
            Some(agent_id) => agent_id,
            None => return,
        };
        self.task_agents.remove(&task_id);
        let Some(entry) = self.agents.get_mut(&agent_id) else {
            flog_warn!(
                "Release for unknown agent {} (task {})",
                agent_id.short(),
                task_id.short()
            );
            return;
        };
        if entry.active_tasks == 0 {
            flog_warn!(
                "Duplicate release for agent {} (task {})",
                agent_id.short(),
                task_id.short()
            );
            return;
        }
        entry.active_tasks -= 1;
    }

    /// Whether the agent can take on work right now.
    pub fn is_available(&self, agent_id: AgentId) -> bool {
        self.agents
            .get(&agent_id)
            .map(|a| a.state.is_available())
            .unwrap_or(false)
    }

    /// Current active task count for an agent; unknown agents carry none.
    pub fn load_of(&self, agent_id: AgentId) -> usize {
        self.agents
            .get(&agent_id)
            .map(|a| a.active_tasks)
            .unwrap_or(0)
    }

    pub fn state_of(&self, agent_id: AgentId) -> Option<AgentState> {
        self.agents.get(&agent_id).map(|a| a.state)
    }

    /// The agent currently assigned to a task, per the assignment map.
    pub fn agent_for_task(&self, task_id: TaskId) -> Option<AgentId> {
        self.task_agents.get(&task_id).copied()
    }

    /// Point-in-time copy of every tracked agent.
    pub fn snapshot(&self) -> HashMap<AgentId, AgentAvailability> {
        self.agents.clone()
    }
}
