//! Agent descriptors and the external registry/hosting boundaries.
//!
//! The engine never runs agent processes itself. It reads capability
//! descriptors from a registry and queries the hosting layer for live
//! agents; both collaborators sit behind traits so tests can substitute
//! in-memory doubles.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Unique identifier for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub Uuid);

impl AgentId {
    /// Create a new unique agent identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AgentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle state reported by the hosting layer for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Agent process is up with nothing to do.
    Idle,
    /// Agent finished its last instruction and is waiting for input.
    Waiting,
    /// Agent is actively working on a task.
    Busy,
    /// Agent process is gone or unreachable.
    Offline,
}

impl AgentState {
    /// Whether an agent in this state may receive new work.
    pub fn is_available(&self) -> bool {
        matches!(self, AgentState::Idle | AgentState::Waiting)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentState::Idle => write!(f, "idle"),
            AgentState::Waiting => write!(f, "waiting"),
            AgentState::Busy => write!(f, "busy"),
            AgentState::Offline => write!(f, "offline"),
        }
    }
}

/// Capability descriptor for an agent, read from the external registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique identifier for this agent.
    pub id: AgentId,
    /// Human-readable name.
    pub name: String,
    /// Whether the agent may be used at all.
    pub enabled: bool,
    /// Whether capability-based routing applies to this agent.
    pub routing_enabled: bool,
    /// Named skills the agent declares support for.
    pub capabilities: Vec<String>,
    /// Per-domain affinity weights in [0, 1].
    pub domain_weights: HashMap<String, f64>,
    /// Maximum number of tasks this agent may run concurrently.
    pub max_concurrent: usize,
}

impl AgentDescriptor {
    /// Create an enabled, routing-enabled descriptor with the given capabilities.
    pub fn new(name: &str, capabilities: Vec<String>, max_concurrent: usize) -> Self {
        Self {
            id: AgentId::new(),
            name: name.to_string(),
            enabled: true,
            routing_enabled: true,
            capabilities,
            domain_weights: HashMap::new(),
            max_concurrent,
        }
    }

    /// Set a domain affinity weight, clamped to [0, 1].
    pub fn with_domain_weight(mut self, domain: &str, weight: f64) -> Self {
        self.domain_weights
            .insert(domain.to_string(), weight.clamp(0.0, 1.0));
        self
    }

    /// Case-insensitive capability membership check.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.eq_ignore_ascii_case(capability))
    }
}

/// Read-only lookup into the external agent registry.
pub trait AgentRegistry: Send + Sync {
    /// Look up a single agent descriptor by id.
    fn get(&self, id: &AgentId) -> Option<AgentDescriptor>;

    /// List every registered agent descriptor.
    fn all(&self) -> Vec<AgentDescriptor>;
}

/// In-memory registry, used directly in tests and as the default wiring.
#[derive(Default)]
pub struct InMemoryRegistry {
    agents: Mutex<HashMap<AgentId, AgentDescriptor>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a descriptor.
    pub fn register(&self, descriptor: AgentDescriptor) {
        self.agents
            .lock()
            .expect("registry lock poisoned")
            .insert(descriptor.id, descriptor);
    }

    /// Remove a descriptor by id.
    pub fn unregister(&self, id: &AgentId) {
        self.agents
            .lock()
            .expect("registry lock poisoned")
            .remove(id);
    }
}

impl AgentRegistry for InMemoryRegistry {
    fn get(&self, id: &AgentId) -> Option<AgentDescriptor> {
        self.agents
            .lock()
            .expect("registry lock poisoned")
            .get(id)
            .cloned()
    }

    fn all(&self) -> Vec<AgentDescriptor> {
        self.agents
            .lock()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}

/// A live agent terminal/process reported by the hosting layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveAgent {
    /// The agent this terminal belongs to.
    pub agent_id: AgentId,
    /// Kind of hosting (terminal, headless, remote, ...). Opaque to the engine.
    pub kind: String,
    /// Current lifecycle state.
    pub state: AgentState,
    /// Resource scope (workspace) the terminal is attached to, if any.
    pub scope: Option<String>,
}

/// Query into the layer that actually hosts agent processes.
pub trait AgentHost: Send + Sync {
    /// Currently known live agents with their lifecycle states.
    fn live_agents(&self) -> Vec<LiveAgent>;
}

/// Fixed-list host used by tests and the fallback wiring.
#[derive(Default)]
pub struct StaticHost {
    agents: Mutex<Vec<LiveAgent>>,
}

impl StaticHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the full live-agent list.
    pub fn set(&self, agents: Vec<LiveAgent>) {
        *self.agents.lock().expect("host lock poisoned") = agents;
    }

    /// Update the reported state for one agent.
    pub fn set_state(&self, id: &AgentId, state: AgentState) {
        let mut agents = self.agents.lock().expect("host lock poisoned");
        for agent in agents.iter_mut() {
            if agent.agent_id == *id {
                agent.state = state;
            }
        }
    }
}

impl AgentHost for StaticHost {
    fn live_agents(&self) -> Vec<LiveAgent> {
        self.agents.lock().expect("host lock poisoned").clone()
    }
}
