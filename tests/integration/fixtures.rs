//! Shared fixtures for the integration suite.

use std::sync::Arc;
use tokio::sync::RwLock;

use taskforge::{
    AgentDescriptor, AgentHost, AgentId, AgentRegistry, AgentRouter, AgentState, InMemoryRegistry,
    LiveAgent, StaticHost, TaskId, TaskOrchestrator, TaskParams, TaskQueue, TaskStatus,
};

/// A fully wired engine over in-memory collaborators.
pub struct Engine {
    pub queue: Arc<RwLock<TaskQueue>>,
    pub registry: Arc<InMemoryRegistry>,
    pub host: Arc<StaticHost>,
    pub orchestrator: TaskOrchestrator,
}

impl Engine {
    pub async fn new(max_concurrent: usize) -> Self {
        let queue = Arc::new(RwLock::new(TaskQueue::in_memory("test")));
        let registry = Arc::new(InMemoryRegistry::new());
        let host = Arc::new(StaticHost::new());
        let router = AgentRouter::new(
            Arc::clone(&registry) as Arc<dyn AgentRegistry>,
            Arc::clone(&host) as Arc<dyn AgentHost>,
        );
        let orchestrator = TaskOrchestrator::new(Arc::clone(&queue), router, max_concurrent).await;
        Self {
            queue,
            registry,
            host,
            orchestrator,
        }
    }

    /// Register an idle agent with the given capabilities.
    pub fn add_worker(&mut self, name: &str, capabilities: &[&str], max_concurrent: usize) -> AgentId {
        let descriptor = AgentDescriptor::new(
            name,
            capabilities.iter().map(|c| c.to_string()).collect(),
            max_concurrent,
        );
        let id = descriptor.id;
        self.registry.register(descriptor);
        self.orchestrator
            .availability_mut()
            .record_state(id, AgentState::Idle);
        id
    }

    /// Attach a live terminal for an agent to a resource scope.
    pub fn attach(&self, agent_id: AgentId, scope: &str) {
        let mut live = self.host.live_agents();
        live.push(LiveAgent {
            agent_id,
            kind: "terminal".to_string(),
            state: AgentState::Idle,
            scope: Some(scope.to_string()),
        });
        self.host.set(live);
    }

    /// Create and enqueue a task.
    pub async fn enqueue(&self, params: TaskParams) -> TaskId {
        let mut queue = self.queue.write().await;
        let id = queue.create_task(params).expect("create task").id;
        queue.enqueue_task(id).expect("enqueue task");
        id
    }

    pub async fn status(&self, id: TaskId) -> TaskStatus {
        self.queue
            .read()
            .await
            .get_task(id)
            .expect("task exists")
            .status
    }

    pub async fn assigned_agent(&self, id: TaskId) -> Option<AgentId> {
        self.queue
            .read()
            .await
            .get_task(id)
            .expect("task exists")
            .assigned_agent
    }
}
