//! Handler invocation: the contract between the scheduler and pluggable task
//! handlers.
//!
//! A handler is addressable by the opaque string in `task.handler`. It is
//! invoked with the enclosing workflow id, the task's local name and the task
//! itself; mutations of `task.parameters` (or nested values) are observable by
//! later reference resolutions. Returning `Ok` completes the task unless the
//! handler set `status = paused`; returning `Err` fails the task unless
//! `ignoreError` is set.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use snafu::prelude::*;

use crate::workflow::Task;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Handler '{id}' is not registered"))]
    Unresolved { id: String },

    #[snafu(display("{message}"))]
    Reported { message: String },

    #[snafu(display("Invalid handler parameters: {message}"))]
    InvalidParameters { message: String },

    #[snafu(display("I/O error: {source}"))]
    Io { source: std::io::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A pluggable unit that performs a task's side effect and reports completion.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, workflow_id: &str, task_name: &str, task: &mut Task) -> Result<()>;
}

/// Registry of handlers by id. Resolution is a cached lookup; an unknown id
/// surfaces as a task error with a distinguishing message.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f.debug_struct("HandlerRegistry")
            .field("handlers", &handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: impl Into<String>, handler: Arc<dyn Handler>) {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        handlers.insert(id.into(), handler);
    }

    pub fn resolve(&self, id: &str) -> Result<Arc<dyn Handler>> {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        handlers
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Unresolved { id: id.to_string() })
    }
}
