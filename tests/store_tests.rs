mod common;

use common::{definition, instance};
use magpie::providers::store::{DirStore, MemoryStore};
use magpie::store::{Error, InstanceQuery, StoreProvider};
use magpie::workflow::InstanceStatus;
use serde_json::json;

fn sample_instance(id: &str, name: &str) -> magpie::workflow::WorkflowInstance {
    instance(json!({
        "id": id,
        "name": name,
        "tasks": {"t1": {"handler": "log", "parameters": {"log": "hi"}}},
    }))
}

#[tokio::test]
async fn dir_store_round_trips_definitions() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirStore::new(dir.path());
    store.init().await.unwrap();

    let def = definition(json!({
        "name": "greeter",
        "tasks": {"hello": {"handler": "log", "parameters": {"log": "hi"}}},
    }));

    store.save_definition(&def).await.unwrap();
    let loaded = store.get_definition("greeter").await.unwrap();
    assert_eq!(loaded, def);

    assert!(dir.path().join("greeter.def").exists());

    store.delete_definition("greeter").await.unwrap();
    let err = store.delete_definition("greeter").await.unwrap_err();
    assert!(matches!(err, Error::DefinitionNotFound { .. }));
}

#[tokio::test]
async fn dir_store_init_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirStore::new(dir.path().join("_data"));
    store.init().await.unwrap();
    store.init().await.unwrap();
}

#[tokio::test]
async fn every_save_writes_a_current_and_a_historical_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirStore::new(dir.path());
    store.init().await.unwrap();

    let mut inst = sample_instance("wf-1", "first");
    store.save_instance(&inst).await.unwrap();
    inst.status = InstanceStatus::Completed;
    store.save_instance(&inst).await.unwrap();

    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    let history: Vec<&String> = names.iter().filter(|n| n.starts_with("wf-1_")).collect();
    assert_eq!(history.len(), 2);
    assert!(names.iter().any(|n| n == "wf-1"));

    let current = store.load_instance("wf-1", 0).await.unwrap();
    assert_eq!(current.status, InstanceStatus::Completed);
}

#[tokio::test]
async fn rewind_indexes_history_from_the_newest_backwards() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirStore::new(dir.path());
    store.init().await.unwrap();

    let mut inst = sample_instance("wf-2", "second");
    store.save_instance(&inst).await.unwrap();
    inst.status = InstanceStatus::Error;
    store.save_instance(&inst).await.unwrap();
    inst.status = InstanceStatus::Completed;
    store.save_instance(&inst).await.unwrap();

    assert_eq!(
        store.load_instance("wf-2", 0).await.unwrap().status,
        InstanceStatus::Completed
    );
    assert_eq!(
        store.load_instance("wf-2", 1).await.unwrap().status,
        InstanceStatus::Error
    );
    assert_eq!(
        store.load_instance("wf-2", 2).await.unwrap().status,
        InstanceStatus::Open
    );
    // Past the oldest record the rewind clamps.
    assert_eq!(
        store.load_instance("wf-2", 50).await.unwrap().status,
        InstanceStatus::Open
    );
}

#[tokio::test]
async fn delete_instance_removes_current_and_history() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirStore::new(dir.path());
    store.init().await.unwrap();

    let inst = sample_instance("wf-3", "third");
    store.save_instance(&inst).await.unwrap();
    store.save_instance(&inst).await.unwrap();

    store.delete_instance("wf-3").await.unwrap();

    let err = store.load_instance("wf-3", 0).await.unwrap_err();
    assert!(matches!(err, Error::InstanceNotFound { .. }));
    let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftovers, 0);

    let err = store.delete_instance("wf-3").await.unwrap_err();
    assert!(matches!(err, Error::InstanceNotFound { .. }));
}

#[tokio::test]
async fn delete_all_leaves_definitions_intact() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirStore::new(dir.path());
    store.init().await.unwrap();

    store
        .save_definition(&definition(json!({"name": "keeper", "tasks": {"t": {}}})))
        .await
        .unwrap();
    store.save_instance(&sample_instance("wf-4", "gone")).await.unwrap();
    store.save_instance(&sample_instance("wf-5", "gone-too")).await.unwrap();

    store.delete_all().await.unwrap();

    assert!(store.get_definition("keeper").await.is_ok());
    assert!(matches!(
        store.load_instance("wf-4", 0).await.unwrap_err(),
        Error::InstanceNotFound { .. }
    ));
    assert!(matches!(
        store.load_instance("wf-5", 0).await.unwrap_err(),
        Error::InstanceNotFound { .. }
    ));
}

#[tokio::test]
async fn dir_store_reports_queries_as_a_capability_gap() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirStore::new(dir.path());
    store.init().await.unwrap();

    let err = store
        .find_instances(&InstanceQuery::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Capability { .. }));
}

#[tokio::test]
async fn memory_store_queries_filter_by_name_and_status() {
    let store = MemoryStore::new();
    store.init().await.unwrap();

    let mut a = sample_instance("a", "alpha");
    a.status = InstanceStatus::Completed;
    let b = sample_instance("b", "beta");
    store.save_instance(&a).await.unwrap();
    store.save_instance(&b).await.unwrap();

    let by_name = store
        .find_instances(&InstanceQuery {
            name: Some("alpha".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_name.len(), 1);
    assert_eq!(by_name[0].id.as_deref(), Some("a"));

    let open = store
        .find_instances(&InstanceQuery {
            status: Some(InstanceStatus::Open),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id.as_deref(), Some("b"));
}

#[tokio::test]
async fn missing_instances_and_definitions_are_not_found_errors() {
    let store = MemoryStore::new();
    assert!(matches!(
        store.load_instance("ghost", 0).await.unwrap_err(),
        Error::InstanceNotFound { .. }
    ));
    assert!(matches!(
        store.get_definition("ghost").await.unwrap_err(),
        Error::DefinitionNotFound { .. }
    ));
}

#[tokio::test]
async fn saving_an_instance_without_an_id_is_rejected() {
    let store = MemoryStore::new();
    let inst = instance(json!({"name": "no-id", "tasks": {"t": {}}}));
    let err = store.save_instance(&inst).await.unwrap_err();
    assert!(matches!(err, Error::Store { .. }));
}
