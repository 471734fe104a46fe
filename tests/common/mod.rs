#![allow(dead_code)]

use std::sync::Arc;

use magpie::engine::WorkflowEngine;
use magpie::providers::store::MemoryStore;
use magpie::workflow::{WorkflowDefinition, WorkflowInstance};

/// Engine over a fresh in-memory store, plus the store itself for history
/// assertions.
pub fn engine_with_memory_store() -> (Arc<WorkflowEngine>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = WorkflowEngine::new(store.clone());
    (engine, store)
}

pub fn definition(value: serde_json::Value) -> WorkflowDefinition {
    serde_json::from_value(value).expect("test definition deserializes")
}

pub fn instance(value: serde_json::Value) -> WorkflowInstance {
    serde_json::from_value(value).expect("test instance deserializes")
}
