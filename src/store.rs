//! Durable persistence behind an async provider trait.
//!
//! A store keeps workflow definitions (keyed by name), the current record of
//! every instance (keyed by id) and an append-only history of save points.
//! Every save of an instance writes both the new current record and one
//! timestamped historical record, so an instance can later be rewound to any
//! prior save point.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::workflow::{InstanceStatus, WorkflowDefinition, WorkflowInstance};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Store error: {message}"))]
    Store { message: String },

    #[snafu(display("Definition not found: {name}"))]
    DefinitionNotFound { name: String },

    #[snafu(display("Instance not found: {id}"))]
    InstanceNotFound { id: String },

    #[snafu(display("Serialization error: {source}"))]
    Serialization { source: serde_json::Error },

    #[snafu(display("I/O error: {source}"))]
    Io { source: std::io::Error },

    #[snafu(display("The {backend} store does not support {operation}"))]
    Capability {
        backend: &'static str,
        operation: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Selection criteria for [`StoreProvider::find_instances`]. Empty criteria
/// match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<InstanceStatus>,
}

impl InstanceQuery {
    #[must_use]
    pub fn matches(&self, instance: &WorkflowInstance) -> bool {
        if let Some(name) = &self.name {
            if &instance.name != name {
                return false;
            }
        }
        if let Some(status) = self.status {
            if instance.status != status {
                return false;
            }
        }
        true
    }
}

/// Pluggable durable store for definitions, instances and instance history.
#[async_trait]
pub trait StoreProvider: Send + Sync + std::fmt::Debug {
    /// Prepare the backend. Idempotent; must succeed before any other call.
    async fn init(&self) -> Result<()>;

    /// Release backend resources. Idempotent.
    async fn close(&self) -> Result<()>;

    /// Upsert a definition by `def.name`.
    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<()>;

    async fn get_definition(&self, name: &str) -> Result<WorkflowDefinition>;

    /// Remove a definition by name; removing an unknown name is an error.
    async fn delete_definition(&self, name: &str) -> Result<()>;

    /// Write the instance as the new current record and append one
    /// timestamped historical record, atomically.
    async fn save_instance(&self, instance: &WorkflowInstance) -> Result<()>;

    /// With `rewind == 0`, return the current record; otherwise the record
    /// `rewind` save points back, clamped to the oldest with a warning.
    async fn load_instance(&self, id: &str, rewind: usize) -> Result<WorkflowInstance>;

    /// Remove the current record and all its historical records.
    async fn delete_instance(&self, id: &str) -> Result<()>;

    /// Remove every instance and its history, leaving definitions intact.
    async fn delete_all(&self) -> Result<()>;

    /// Return current instances matching the query. Backends without ad-hoc
    /// query support fail with a capability error.
    async fn find_instances(&self, query: &InstanceQuery) -> Result<Vec<WorkflowInstance>>;
}

/// The instance id a save is keyed by, or an error when none was assigned.
pub(crate) fn require_id(instance: &WorkflowInstance) -> Result<&str> {
    instance.id.as_deref().context(StoreSnafu {
        message: "instance has no id assigned",
    })
}

/// History index for a rewind request over `len` records, clamped to the
/// oldest record.
pub(crate) fn rewind_index(len: usize, rewind: usize, id: &str) -> Option<usize> {
    if len == 0 {
        return None;
    }
    if rewind >= len {
        tracing::warn!(
            "Rewind {rewind} exceeds the {len} save points recorded for {id}, returning the oldest"
        );
        return Some(0);
    }
    Some(len - rewind - 1)
}
