//! # Magpie - Persistent Hierarchical Workflow Engine
//!
//! Magpie executes user-authored workflow definitions — trees of named tasks —
//! while persisting every transition, so an instance can be inspected, rewound
//! to a prior save point, paused waiting on an external event, and later
//! resumed by injecting updated task state.
//!
//! ## Features
//!
//! - **Durable Execution**: every scheduling pass writes a save point; an
//!   instance can be rewound to any earlier one
//! - **Hierarchical Tasks**: tasks nest arbitrarily; parents complete only
//!   after all of their children
//! - **Pause & Resume**: a handler can pause its task; an injected task update
//!   resumes the instance where it stopped
//! - **References**: `$[path]` placeholders read values from anywhere in the
//!   running instance, environment included
//! - **Parallel Dispatch**: every runnable task in a pass runs concurrently
//! - **Pluggable Handlers and Stores**: handlers resolve by id; persistence is
//!   a provider trait with directory and document-store backends
//!
//! ## Core Modules
//!
//! - [`engine`] - the execution driver and the per-pass scheduler
//! - [`workflow`] - the task tree model and definition parsing
//! - [`references`] - `$[path]` expansion over live instance state
//! - [`handler`] - the handler contract and registry
//! - [`store`] - the persistence provider trait
//! - [`providers`] - bundled store backends and task handlers
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use magpie::engine::WorkflowEngine;
//! use magpie::providers::store::MemoryStore;
//! use magpie::workflow::{WorkflowDefinition, WorkflowInstance};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = WorkflowEngine::new(Arc::new(MemoryStore::new()));
//!
//! let definition: WorkflowDefinition = serde_yaml::from_str(
//!     r#"
//! name: hello-world
//! tasks:
//!   greet:
//!     handler: log
//!     parameters:
//!       log: "Hello from $[environment.USER]"
//! "#,
//! )?;
//!
//! let instance = engine.execute(&WorkflowInstance::from(definition)).await?;
//! println!("final status: {:?}", instance.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Command-Line Interface
//!
//! ```bash
//! # Execute a definition
//! magpie --file workflow.yaml
//!
//! # Resume a paused instance with a task update bundle
//! magpie --id <INSTANCE_ID> --file update.json
//!
//! # Inspect an instance two save points back
//! magpie --id <INSTANCE_ID> --rewind 2
//! ```
//!
//! ## Configuration
//!
//! The backend is selected through the environment: `DB_TYPE` (`file` or
//! `document-store`), `DB_DIR` for the file backend, `DB_HOST`/`DB_PORT` for
//! the document store. See [`config::EngineSettings`].

pub mod config;
pub mod engine;
pub mod handler;
pub mod output;
pub mod providers;
pub mod references;
pub mod store;
pub mod workflow;
