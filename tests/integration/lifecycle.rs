//! DAG and state machine behavior through the queue's public API.

use taskforge::{
    AgentId, Error, RunId, TaskEvent, TaskFilter, TaskParams, TaskQueue, TaskStatus,
};

#[test]
fn test_dag_construction_and_unblock_propagation() {
    let mut queue = TaskQueue::in_memory("test");

    let fetch = queue.create_task(TaskParams::new("fetch")).unwrap().id;
    let parse = queue
        .create_task(TaskParams::new("parse").depends_on(&[fetch]))
        .unwrap()
        .id;
    let report = queue
        .create_task(TaskParams::new("report").depends_on(&[parse]))
        .unwrap()
        .id;
    for id in [fetch, parse, report] {
        queue.enqueue_task(id).unwrap();
    }

    assert_eq!(queue.get_task(fetch).unwrap().status, TaskStatus::Queued);
    assert_eq!(queue.get_task(parse).unwrap().status, TaskStatus::Blocked);
    assert_eq!(queue.get_task(report).unwrap().status, TaskStatus::Blocked);

    queue
        .mark_running(fetch, AgentId::new(), RunId::new())
        .unwrap();
    queue.mark_completed(fetch, None).unwrap();

    // Only the direct dependent unblocks; the chain stays honest
    assert_eq!(queue.get_task(parse).unwrap().status, TaskStatus::Queued);
    assert_eq!(queue.get_task(report).unwrap().status, TaskStatus::Blocked);

    queue
        .mark_running(parse, AgentId::new(), RunId::new())
        .unwrap();
    queue.mark_completed(parse, None).unwrap();
    assert_eq!(queue.get_task(report).unwrap().status, TaskStatus::Queued);
}

#[test]
fn test_cycle_rejection_reports_path_and_commits_nothing() {
    let mut queue = TaskQueue::in_memory("test");
    let a = queue.create_task(TaskParams::new("a")).unwrap().id;
    let b = queue.create_task(TaskParams::new("b")).unwrap().id;
    let c = queue.create_task(TaskParams::new("c")).unwrap().id;
    queue.add_dependency(a, b).unwrap();
    queue.add_dependency(b, c).unwrap();

    let err = queue.add_dependency(c, a).unwrap_err();
    let Error::CycleDetected { path } = err else {
        panic!("expected cycle rejection");
    };
    assert!(path.contains(&a) && path.contains(&b) && path.contains(&c));
    assert_eq!(path.first(), path.last());

    // The rejected edge left no trace on either endpoint
    assert!(queue.get_task(c).unwrap().dependencies.is_empty());
    assert_eq!(queue.get_task(a).unwrap().dependents, vec![]);
    let dependents_of_c = queue.get_task(c).unwrap().dependents;
    assert_eq!(dependents_of_c, vec![b]);
}

#[test]
fn test_diamond_cascade_fails_each_victim_once() {
    let mut queue = TaskQueue::in_memory("test");
    let root = queue.create_task(TaskParams::new("root")).unwrap().id;
    let left = queue
        .create_task(TaskParams::new("left").depends_on(&[root]))
        .unwrap()
        .id;
    let right = queue
        .create_task(TaskParams::new("right").depends_on(&[root]))
        .unwrap()
        .id;
    let join = queue
        .create_task(TaskParams::new("join").depends_on(&[left, right]))
        .unwrap()
        .id;
    for id in [root, left, right, join] {
        queue.enqueue_task(id).unwrap();
    }
    queue
        .mark_running(root, AgentId::new(), RunId::new())
        .unwrap();

    let mut rx = queue.subscribe();
    queue.mark_failed(root, "disk full").unwrap();

    let mut failed_events = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, TaskEvent::Failed { .. }) {
            failed_events += 1;
        }
    }
    // Root plus three downstream victims, each exactly once
    assert_eq!(failed_events, 4);
    for id in [left, right, join] {
        let task = queue.get_task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.as_deref().unwrap().contains("upstream task"));
        assert!(task.completed_at.is_some());
    }
}

#[test]
fn test_cancellation_cascade_spares_completed_work() {
    let mut queue = TaskQueue::in_memory("test");
    let root = queue.create_task(TaskParams::new("root")).unwrap().id;
    let done = queue
        .create_task(TaskParams::new("done").depends_on(&[root]))
        .unwrap()
        .id;
    let pending = queue
        .create_task(TaskParams::new("pending").depends_on(&[root]))
        .unwrap()
        .id;
    for id in [root, done, pending] {
        queue.enqueue_task(id).unwrap();
    }
    queue
        .mark_running(root, AgentId::new(), RunId::new())
        .unwrap();
    queue.mark_completed(root, None).unwrap();
    queue
        .mark_running(done, AgentId::new(), RunId::new())
        .unwrap();
    queue.mark_completed(done, None).unwrap();
    // Re-open work downstream of root: cancel root is now illegal, so
    // cancel the pending branch's upstream instead
    assert!(queue.cancel_task(root).is_err());

    queue.cancel_task(pending).unwrap();
    assert_eq!(queue.get_task(done).unwrap().status, TaskStatus::Completed);
    assert_eq!(
        queue.get_task(pending).unwrap().status,
        TaskStatus::Cancelled
    );
}

#[test]
fn test_dependency_edits_drive_queued_blocked_transitions() {
    let mut queue = TaskQueue::in_memory("test");
    let dep = queue.create_task(TaskParams::new("dep")).unwrap().id;
    let task = queue.create_task(TaskParams::new("task")).unwrap().id;
    queue.enqueue_task(task).unwrap();
    assert_eq!(queue.get_task(task).unwrap().status, TaskStatus::Queued);

    queue.add_dependency(task, dep).unwrap();
    assert_eq!(queue.get_task(task).unwrap().status, TaskStatus::Blocked);

    queue.remove_dependency(task, dep).unwrap();
    assert_eq!(queue.get_task(task).unwrap().status, TaskStatus::Queued);
}

#[test]
fn test_listing_and_stats_views() {
    let mut queue = TaskQueue::in_memory("test");
    let a = queue
        .create_task(TaskParams::new("a").priority(2).scope("ws-1"))
        .unwrap()
        .id;
    let b = queue
        .create_task(TaskParams::new("b").priority(9).scope("ws-1"))
        .unwrap()
        .id;
    let _draft = queue.create_task(TaskParams::new("c")).unwrap().id;
    queue.enqueue_task(a).unwrap();
    queue.enqueue_task(b).unwrap();

    let scoped = queue.list_tasks(&TaskFilter {
        scope: Some("ws-1".to_string()),
        ..Default::default()
    });
    assert_eq!(scoped.len(), 2);
    // Dispatch order: highest priority first
    assert_eq!(scoped[0].id, b);

    let limited = queue.list_tasks(&TaskFilter {
        limit: Some(1),
        ..Default::default()
    });
    assert_eq!(limited.len(), 1);

    let stats = queue.stats();
    assert_eq!(stats.draft, 1);
    assert_eq!(stats.queued, 2);
    assert_eq!(stats.total, 3);
}

#[test]
fn test_terminal_states_are_closed() {
    let mut queue = TaskQueue::in_memory("test");
    let id = queue.create_task(TaskParams::new("a")).unwrap().id;
    queue.enqueue_task(id).unwrap();
    queue.mark_running(id, AgentId::new(), RunId::new()).unwrap();
    queue.mark_failed(id, "boom").unwrap();

    assert!(queue.mark_completed(id, None).is_err());
    assert!(queue.cancel_task(id).is_err());
    assert!(queue.enqueue_task(id).is_err());
    assert!(queue
        .mark_running(id, AgentId::new(), RunId::new())
        .is_err());
    // The original failure is untouched
    let task = queue.get_task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some("boom"));
}
