//! Orchestrator scenarios: routing, assignment, and host event handling
//! through the full public surface.

use crate::fixtures::Engine;
use taskforge::{HostEvent, RoutingHints, TaskParams, TaskStatus};

fn requires(capabilities: &[&str]) -> RoutingHints {
    RoutingHints {
        required_capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_pipeline_routes_by_capability_and_completes() {
    let mut engine = Engine::new(4).await;
    let backend = engine.add_worker("backend", &["rust"], 2);
    let frontend = engine.add_worker("frontend", &["typescript"], 2);

    let api = engine
        .enqueue(TaskParams::new("build-api").routing(requires(&["rust"])))
        .await;
    let ui = {
        let mut queue = engine.queue.write().await;
        let id = queue
            .create_task(
                TaskParams::new("build-ui")
                    .routing(requires(&["typescript"]))
                    .depends_on(&[api]),
            )
            .unwrap()
            .id;
        queue.enqueue_task(id).unwrap();
        id
    };

    engine.orchestrator.drive_assignments().await.unwrap();

    assert_eq!(engine.status(api).await, TaskStatus::Running);
    assert_eq!(engine.assigned_agent(api).await, Some(backend));
    assert_eq!(engine.status(ui).await, TaskStatus::Blocked);

    engine
        .orchestrator
        .handle_host_event(HostEvent::AgentCompleted {
            agent_id: backend,
            payload: Some(serde_json::json!({"artifact": "api.bin"})),
        })
        .await
        .unwrap();

    // Completing the api unblocked the ui task, and the completion pass
    // assigned it to the only capable agent
    assert_eq!(engine.status(api).await, TaskStatus::Completed);
    assert_eq!(engine.status(ui).await, TaskStatus::Running);
    assert_eq!(engine.assigned_agent(ui).await, Some(frontend));

    engine
        .orchestrator
        .handle_host_event(HostEvent::AgentCompleted {
            agent_id: frontend,
            payload: None,
        })
        .await
        .unwrap();

    assert_eq!(engine.status(ui).await, TaskStatus::Completed);
    assert_eq!(engine.orchestrator.active_runs(), 0);
    assert_eq!(engine.orchestrator.availability().load_of(backend), 0);
    assert_eq!(engine.orchestrator.availability().load_of(frontend), 0);
}

#[tokio::test]
async fn test_no_capable_agent_leaves_task_waiting() {
    let mut engine = Engine::new(4).await;
    engine.add_worker("backend", &["rust"], 2);

    let task = engine
        .enqueue(TaskParams::new("deploy").routing(requires(&["kubernetes"])))
        .await;

    let assigned = engine.orchestrator.drive_assignments().await.unwrap();

    assert_eq!(assigned, 0);
    assert_eq!(engine.status(task).await, TaskStatus::Queued);
}

#[tokio::test]
async fn test_priority_order_across_sequential_assignments() {
    let mut engine = Engine::new(4).await;
    let worker = engine.add_worker("worker", &[], 1);

    let first_high = engine.enqueue(TaskParams::new("first-high").priority(5)).await;
    let low = engine.enqueue(TaskParams::new("low").priority(1)).await;
    let second_high = engine
        .enqueue(TaskParams::new("second-high").priority(5))
        .await;

    let mut order = Vec::new();
    for _ in 0..3 {
        engine.orchestrator.drive_assignments().await.unwrap();
        let running = {
            let queue = engine.queue.read().await;
            [first_high, low, second_high]
                .into_iter()
                .find(|id| queue.get_task(*id).unwrap().status == TaskStatus::Running)
                .expect("one task running")
        };
        order.push(running);
        engine
            .orchestrator
            .handle_host_event(HostEvent::AgentCompleted {
                agent_id: worker,
                payload: None,
            })
            .await
            .unwrap();
    }

    // Priority descending, creation order among equals
    assert_eq!(order, vec![first_high, second_high, low]);
}

#[tokio::test]
async fn test_agent_failure_fails_chain_and_frees_agent() {
    let mut engine = Engine::new(4).await;
    let worker = engine.add_worker("worker", &[], 2);

    let root = engine.enqueue(TaskParams::new("root")).await;
    let dependent = {
        let mut queue = engine.queue.write().await;
        let id = queue
            .create_task(TaskParams::new("dependent").depends_on(&[root]))
            .unwrap()
            .id;
        queue.enqueue_task(id).unwrap();
        id
    };
    engine.orchestrator.drive_assignments().await.unwrap();

    engine
        .orchestrator
        .handle_host_event(HostEvent::AgentFailed {
            agent_id: worker,
            error: "process exited".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(engine.status(root).await, TaskStatus::Failed);
    assert_eq!(engine.status(dependent).await, TaskStatus::Failed);
    let annotation = engine
        .queue
        .read()
        .await
        .get_task(dependent)
        .unwrap()
        .error
        .unwrap();
    assert!(annotation.contains("upstream task"));

    // The agent is free again for fresh work
    let fresh = engine.enqueue(TaskParams::new("fresh")).await;
    engine.orchestrator.drive_assignments().await.unwrap();
    assert_eq!(engine.status(fresh).await, TaskStatus::Running);
}

#[tokio::test]
async fn test_scope_affinity_restricts_candidates() {
    let mut engine = Engine::new(4).await;
    let here = engine.add_worker("here", &[], 2);
    let elsewhere = engine.add_worker("elsewhere", &[], 2);
    engine.attach(here, "ws-1");
    engine.attach(elsewhere, "ws-2");

    let task = engine
        .enqueue(TaskParams::new("local-work").routing(RoutingHints {
            scope_affinity: Some("ws-1".to_string()),
            ..Default::default()
        }))
        .await;

    engine.orchestrator.drive_assignments().await.unwrap();

    assert_eq!(engine.assigned_agent(task).await, Some(here));
}

#[tokio::test]
async fn test_busy_agent_not_considered_until_available_again() {
    let mut engine = Engine::new(4).await;
    let worker = engine.add_worker("worker", &[], 2);
    let task = engine.enqueue(TaskParams::new("a")).await;

    engine
        .orchestrator
        .handle_host_event(HostEvent::AgentStateChanged {
            agent_id: worker,
            state: taskforge::AgentState::Busy,
        })
        .await
        .unwrap();
    engine.orchestrator.drive_assignments().await.unwrap();
    assert_eq!(engine.status(task).await, TaskStatus::Queued);

    // Going idle triggers an assignment pass by itself
    engine
        .orchestrator
        .handle_host_event(HostEvent::AgentStateChanged {
            agent_id: worker,
            state: taskforge::AgentState::Idle,
        })
        .await
        .unwrap();
    assert_eq!(engine.status(task).await, TaskStatus::Running);
}

#[tokio::test]
async fn test_resource_removed_cancels_in_flight_scope_work() {
    let mut engine = Engine::new(4).await;
    engine.add_worker("worker", &[], 4);

    let doomed = engine
        .enqueue(TaskParams::new("doomed").scope("ws-gone"))
        .await;
    let survivor = engine
        .enqueue(TaskParams::new("survivor").scope("ws-kept"))
        .await;
    engine.orchestrator.drive_assignments().await.unwrap();
    assert_eq!(engine.status(doomed).await, TaskStatus::Running);

    engine
        .orchestrator
        .handle_host_event(HostEvent::ResourceRemoved {
            scope: "ws-gone".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(engine.status(doomed).await, TaskStatus::Cancelled);
    assert_eq!(engine.status(survivor).await, TaskStatus::Running);
    assert_eq!(engine.orchestrator.active_runs(), 1);
}

#[tokio::test]
async fn test_run_loop_processes_until_channel_closes() {
    let mut engine = Engine::new(4).await;
    let worker = engine.add_worker("worker", &[], 2);
    let task = engine.enqueue(TaskParams::new("a")).await;
    engine.orchestrator.drive_assignments().await.unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::channel(8);
    tx.send(HostEvent::AgentCompleted {
        agent_id: worker,
        payload: None,
    })
    .await
    .unwrap();
    drop(tx);

    engine.orchestrator.run(&mut rx).await.unwrap();

    assert_eq!(engine.status(task).await, TaskStatus::Completed);
}
