//! taskforge: a task queue and orchestration engine for agent-based work.
//!
//! Tasks form a dependency DAG with a strict lifecycle state machine; an
//! orchestrator assigns ready tasks to capability-matched agents and
//! reacts to the hosting layer's lifecycle events. State is persisted
//! per resource scope with debounced writes and reconciled on load.

pub mod agent;
pub mod availability;
pub mod config;
pub mod error;
pub mod events;
pub mod log;
pub mod orchestrator;
pub mod queue;
pub mod router;

pub use agent::{
    AgentDescriptor, AgentHost, AgentId, AgentRegistry, AgentState, InMemoryRegistry, LiveAgent,
    StaticHost,
};
pub use availability::{AgentAvailability, AvailabilityStore};
pub use config::Config;
pub use error::{Error, Result};
pub use events::{EventBus, HostEvent, TaskEvent};
pub use orchestrator::TaskOrchestrator;
pub use queue::persist::{JsonFileStore, MemoryStore, TaskStore};
pub use queue::task::{
    RoutingHints, RunId, Task, TaskFilter, TaskId, TaskParams, TaskStats, TaskStatus, TaskUpdate,
};
pub use queue::TaskQueue;
pub use router::AgentRouter;
