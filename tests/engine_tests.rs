mod common;

use common::{engine_with_memory_store, instance};
use magpie::workflow::{InstanceStatus, TaskStatus};
use serde_json::json;

#[tokio::test]
async fn single_log_task_runs_to_completion() {
    let (engine, _store) = engine_with_memory_store();
    let inbound = instance(json!({
        "name": "A",
        "tasks": {"t1": {"handler": "log", "parameters": {"log": "hi", "level": "info"}}},
    }));

    let result = engine.execute(&inbound).await.unwrap();

    assert_eq!(result.status, InstanceStatus::Completed);
    assert!(result.id.is_some());
    assert!(result.environment.is_some());

    let t1 = &result.tasks["t1"];
    assert_eq!(t1.status, TaskStatus::Completed);
    assert!(t1.handler_executed);
    assert!(t1.handler_duration.is_some());

    let opened = t1.time_opened.unwrap();
    let started = t1.time_started.unwrap();
    let completed = t1.time_completed.unwrap();
    assert!(started >= opened);
    assert!(completed >= started);
}

#[tokio::test]
async fn skip_if_completes_without_running_the_handler() {
    let (engine, _store) = engine_with_memory_store();
    let inbound = instance(json!({
        "name": "B",
        "tasks": {"t1": {"skipIf": true, "handler": "log", "parameters": {"log": "x"}}},
    }));

    let result = engine.execute(&inbound).await.unwrap();

    assert_eq!(result.status, InstanceStatus::Completed);
    let t1 = &result.tasks["t1"];
    assert_eq!(t1.status, TaskStatus::Completed);
    assert!(!t1.handler_executed);
}

#[tokio::test]
async fn children_complete_before_their_parent() {
    let (engine, _store) = engine_with_memory_store();
    let inbound = instance(json!({
        "name": "D",
        "tasks": {"parent": {"tasks": {
            "c1": {"handler": "log", "parameters": {"log": "1"}},
            "c2": {"handler": "log", "parameters": {"log": "2"}},
        }}},
    }));

    let result = engine.execute(&inbound).await.unwrap();

    assert_eq!(result.status, InstanceStatus::Completed);
    let parent = &result.tasks["parent"];
    assert_eq!(parent.status, TaskStatus::Completed);
    assert!(!parent.handler_executed);

    let parent_done = parent.time_completed.unwrap();
    for child in parent.tasks.values() {
        assert_eq!(child.status, TaskStatus::Completed);
        assert!(parent_done >= child.time_completed.unwrap());
    }
}

#[tokio::test]
async fn environment_reference_expands_inside_a_string() {
    let (engine, _store) = engine_with_memory_store();
    let inbound = instance(json!({
        "name": "E",
        "environment": {"HOME": "/tmp"},
        "tasks": {"t1": {"handler": "log", "parameters": {"log": "val=$[environment.HOME]"}}},
    }));

    let result = engine.execute(&inbound).await.unwrap();

    assert_eq!(
        result.tasks["t1"].parameters.get("log"),
        Some(&json!("val=/tmp"))
    );
}

#[tokio::test]
async fn handler_error_marks_task_and_instance() {
    let (engine, store) = engine_with_memory_store();
    let inbound = instance(json!({
        "name": "F",
        "tasks": {"t1": {"handler": "test", "parameters": {"error": true}}},
    }));

    let result = engine.execute(&inbound).await.unwrap();

    assert_eq!(result.status, InstanceStatus::Error);
    let t1 = &result.tasks["t1"];
    assert_eq!(t1.status, TaskStatus::Error);
    assert!(t1.error_msg.as_deref().is_some_and(|msg| !msg.is_empty()));

    // Save point A before dispatch, save point B on the error path.
    let id = result.id.as_deref().unwrap();
    assert!(store.history_len(id) >= 2);
}

#[tokio::test]
async fn ignore_error_converts_failure_to_completion() {
    let (engine, _store) = engine_with_memory_store();
    let inbound = instance(json!({
        "name": "G",
        "tasks": {"t1": {"handler": "test", "ignoreError": true, "parameters": {"error": true}}},
    }));

    let result = engine.execute(&inbound).await.unwrap();

    assert_eq!(result.status, InstanceStatus::Completed);
    let t1 = &result.tasks["t1"];
    assert_eq!(t1.status, TaskStatus::Completed);
    assert!(t1.handler_executed);
    assert!(t1.error_msg.is_none());
}

#[tokio::test]
async fn unknown_handler_is_a_task_error_with_a_distinguishing_message() {
    let (engine, _store) = engine_with_memory_store();
    let inbound = instance(json!({
        "name": "H",
        "tasks": {"t1": {"handler": "no-such-handler"}},
    }));

    let result = engine.execute(&inbound).await.unwrap();

    assert_eq!(result.status, InstanceStatus::Error);
    let t1 = &result.tasks["t1"];
    assert_eq!(t1.status, TaskStatus::Error);
    assert!(t1
        .error_msg
        .as_deref()
        .is_some_and(|msg| msg.contains("not registered")));
}

#[tokio::test]
async fn error_if_gate_fails_the_task_without_the_handler() {
    let (engine, _store) = engine_with_memory_store();
    let inbound = instance(json!({
        "name": "I",
        "tasks": {"t1": {"errorIf": true, "handler": "log", "parameters": {"log": "never"}}},
    }));

    let result = engine.execute(&inbound).await.unwrap();

    assert_eq!(result.status, InstanceStatus::Error);
    let t1 = &result.tasks["t1"];
    assert_eq!(t1.status, TaskStatus::Error);
    assert!(!t1.handler_executed);
    assert!(t1.error_msg.is_some());
}

#[tokio::test]
async fn task_without_handler_or_children_completes_immediately() {
    let (engine, _store) = engine_with_memory_store();
    let inbound = instance(json!({"name": "J", "tasks": {"noop": {}}}));

    let result = engine.execute(&inbound).await.unwrap();

    assert_eq!(result.status, InstanceStatus::Completed);
    let noop = &result.tasks["noop"];
    assert_eq!(noop.status, TaskStatus::Completed);
    assert!(!noop.handler_executed);
}

#[tokio::test]
async fn executing_a_completed_instance_is_a_no_op() {
    let (engine, store) = engine_with_memory_store();
    let inbound = instance(json!({
        "name": "K",
        "tasks": {"t1": {"handler": "log", "parameters": {"log": "once"}}},
    }));

    let first = engine.execute(&inbound).await.unwrap();
    assert_eq!(first.status, InstanceStatus::Completed);
    let id = first.id.clone().unwrap();
    let saves_after_first = store.history_len(&id);

    let second = engine.execute(&first).await.unwrap();
    assert_eq!(second.status, InstanceStatus::Completed);
    assert_eq!(store.history_len(&id), saves_after_first);
}

#[tokio::test]
async fn blocking_task_orders_siblings_and_references_see_prior_results() {
    let (engine, _store) = engine_with_memory_store();
    let inbound = instance(json!({
        "name": "L",
        "tasks": {
            "produce": {
                "handler": "test",
                "blocking": true,
                "parameters": {"set": {"val": 42}},
            },
            "consume": {
                "handler": "log",
                "parameters": {
                    "x": "$[tasks.produce.parameters.val]",
                    "log": "got $[tasks.produce.parameters.val]",
                },
            },
        },
    }));

    let result = engine.execute(&inbound).await.unwrap();

    assert_eq!(result.status, InstanceStatus::Completed);
    let produce = &result.tasks["produce"];
    let consume = &result.tasks["consume"];
    assert_eq!(produce.parameters.get("val"), Some(&json!(42)));

    // Standalone reference keeps the number, embedded reference splices text.
    assert_eq!(consume.parameters.get("x"), Some(&json!(42)));
    assert_eq!(consume.parameters.get("log"), Some(&json!("got 42")));

    // The successor only opened after the blocking task completed.
    assert!(consume.time_opened.unwrap() >= produce.time_completed.unwrap());
}

#[tokio::test]
async fn blocking_does_not_restrict_its_own_children() {
    let (engine, _store) = engine_with_memory_store();
    let inbound = instance(json!({
        "name": "M",
        "tasks": {
            "gate": {
                "blocking": true,
                "tasks": {
                    "c1": {"handler": "log", "parameters": {"log": "1"}},
                    "c2": {"handler": "log", "parameters": {"log": "2"}},
                },
            },
            "after": {"handler": "log", "parameters": {"log": "3"}},
        },
    }));

    let result = engine.execute(&inbound).await.unwrap();

    assert_eq!(result.status, InstanceStatus::Completed);
    let gate = &result.tasks["gate"];
    assert_eq!(gate.tasks["c1"].status, TaskStatus::Completed);
    assert_eq!(gate.tasks["c2"].status, TaskStatus::Completed);
    assert!(
        result.tasks["after"].time_opened.unwrap() >= gate.time_completed.unwrap()
    );
}

#[tokio::test]
async fn pre_and_post_workflow_tasks_run_around_the_tree() {
    let (engine, _store) = engine_with_memory_store();
    let inbound = instance(json!({
        "name": "N",
        "pre workflow": {"handler": "log", "parameters": {"log": "before"}},
        "post workflow": {"handler": "log", "parameters": {"log": "after"}},
        "tasks": {"t1": {"handler": "log", "parameters": {"log": "main"}}},
    }));

    let result = engine.execute(&inbound).await.unwrap();

    assert_eq!(result.status, InstanceStatus::Completed);
    assert_eq!(
        result.pre_workflow.as_ref().unwrap().status,
        TaskStatus::Completed
    );
    assert_eq!(
        result.post_workflow.as_ref().unwrap().status,
        TaskStatus::Completed
    );
}

#[tokio::test]
async fn post_workflow_runs_even_when_the_tree_errors() {
    let (engine, _store) = engine_with_memory_store();
    let inbound = instance(json!({
        "name": "O",
        "post workflow": {"handler": "log", "parameters": {"log": "cleanup"}},
        "tasks": {"t1": {"handler": "test", "parameters": {"error": true}}},
    }));

    let result = engine.execute(&inbound).await.unwrap();

    assert_eq!(result.status, InstanceStatus::Error);
    assert_eq!(
        result.post_workflow.as_ref().unwrap().status,
        TaskStatus::Completed
    );
}

#[tokio::test]
async fn nested_workflow_handler_runs_a_stored_definition() {
    let (engine, _store) = engine_with_memory_store();
    engine
        .save_definition(&common::definition(json!({
            "name": "child",
            "tasks": {"inner": {"handler": "log", "parameters": {"log": "from child"}}},
        })))
        .await
        .unwrap();

    let inbound = instance(json!({
        "name": "parent",
        "tasks": {"launch": {"handler": "workflow", "parameters": {"name": "child"}}},
    }));

    let result = engine.execute(&inbound).await.unwrap();

    assert_eq!(result.status, InstanceStatus::Completed);
    let launch = &result.tasks["launch"];
    assert_eq!(launch.status, TaskStatus::Completed);
    assert!(launch.parameters.get("instanceId").is_some());
    assert_eq!(launch.parameters.get("status"), Some(&json!("completed")));
}

#[tokio::test]
async fn list_filters_by_status() {
    let (engine, _store) = engine_with_memory_store();
    engine
        .execute(&instance(json!({
            "name": "ok",
            "tasks": {"t": {"handler": "log", "parameters": {"log": "x"}}},
        })))
        .await
        .unwrap();
    engine
        .execute(&instance(json!({
            "name": "bad",
            "tasks": {"t": {"handler": "test", "parameters": {"error": true}}},
        })))
        .await
        .unwrap();

    let all = engine.list(&Default::default()).await.unwrap();
    assert_eq!(all.len(), 2);

    let failed = engine
        .list(&magpie::store::InstanceQuery {
            status: Some(InstanceStatus::Error),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "bad");
}
