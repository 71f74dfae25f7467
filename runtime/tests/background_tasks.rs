//! Todo-driven run state and background task notices across restarts.

use agent_runtime::core::notifications::{BackgroundTask, TaskEvent, TaskEventKind, stale_events};
use agent_runtime::core::types::TodoStatus;
use agent_runtime::io::boulder_state::BoulderState;
use agent_runtime::io::config::RuntimeConfig;
use agent_runtime::test_support::{TestWorkspace, todo};
use chrono::{Duration, Utc};

#[test]
fn boulder_state_survives_reopening_the_store() {
    let ws = TestWorkspace::new().expect("workspace");
    ws.todo_store()
        .upsert_todos(
            "run-7",
            7,
            &[
                todo("plan", TodoStatus::Completed),
                todo("implement", TodoStatus::InProgress),
                todo("review", TodoStatus::Pending),
                todo("ship", TodoStatus::Pending),
            ],
        )
        .expect("seed todos");

    let boulder = BoulderState::new(ws.todo_store());
    let data = boulder.load(7).expect("state");
    assert!(data.is_active);
    assert_eq!(data.progress.total, 4);
    assert_eq!(data.progress.percent, 25);
    assert!(data.progress.milestone_notice().is_some());
    assert_eq!(boulder.load(8), None);

    let incomplete = ws
        .todo_store()
        .incomplete_todos("run-7")
        .expect("incomplete");
    assert_eq!(incomplete.len(), 3);

    boulder.clear(7);
    assert!(!BoulderState::new(ws.todo_store()).is_active(7));
}

#[test]
fn sink_from_config_reports_each_task_once() {
    let mut cfg = RuntimeConfig::default();
    cfg.notifications.capacity = 2;
    cfg.notifications.stale_after_secs = 60;
    let mut sink = cfg.notification_sink();

    let now = Utc::now();
    let tasks = vec![
        BackgroundTask {
            task_id: "bg-1".to_string(),
            agent: Some("explore".to_string()),
            description: Some("map the repo".to_string()),
            running: true,
            last_activity: now - Duration::seconds(120),
        },
        BackgroundTask {
            task_id: "bg-2".to_string(),
            agent: Some("librarian".to_string()),
            description: None,
            running: true,
            last_activity: now - Duration::seconds(5),
        },
    ];

    for event in stale_events(&tasks, now, cfg.stale_after()) {
        assert!(sink.push(event));
    }
    // The next sweep finds the same idle task but it is not reported again.
    for event in stale_events(&tasks, now, cfg.stale_after()) {
        assert!(!sink.push(event));
    }
    assert_eq!(sink.len(), 1);

    assert!(sink.push(TaskEvent {
        task_id: "bg-2".to_string(),
        kind: TaskEventKind::Completed,
        agent: Some("librarian".to_string()),
        description: Some("find docs".to_string()),
        detail: Some("3 links".to_string()),
        at: now,
    }));
    let recent = sink.recent(5);
    assert_eq!(recent.len(), 2);
    assert_eq!(
        recent[0].render(),
        "[Background Task COMPLETED] Agent \"librarian\" - find docs\nResult: 3 links"
    );
    assert_eq!(recent[1].kind, TaskEventKind::Stale);
}
