//! The execution driver.
//!
//! [`WorkflowEngine`] owns the store and the handler registry and exposes the
//! public operations: execute a definition-shaped instance, inject task
//! updates into a persisted instance and resume it, and the plain CRUD surface
//! over instances and definitions. The per-pass state machine lives in the
//! [`scheduler`] submodule.

use std::sync::Arc;

use snafu::prelude::*;
use tracing::{debug, info};

use crate::config::{DbType, EngineSettings};
use crate::handler::{Handler, HandlerRegistry};
use crate::providers::handlers::{
    ConditionHandler, FileHandler, LogHandler, ShellHandler, SubflowHandler, TestHandler,
};
use crate::providers::store::{DirStore, PostgresStore};
use crate::store::{InstanceQuery, StoreProvider};
use crate::workflow::{
    find_task_path, task_at_mut, InstanceStatus, TaskStatus, UpdateBundle, WorkflowDefinition,
    WorkflowInstance,
};

mod scheduler;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Validation error: {message}"))]
    Validation { message: String },

    #[snafu(display("Instance {id} is already completed"))]
    AlreadyCompleted { id: String },

    #[snafu(display("Store error: {source}"))]
    Store { source: crate::store::Error },

    #[snafu(display("Serialization error: {source}"))]
    Serialization { source: serde_json::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<crate::store::Error> for Error {
    fn from(source: crate::store::Error) -> Self {
        Error::Store { source }
    }
}

/// The workflow engine: the single owner of an instance tree during an
/// execution pass.
#[derive(Debug)]
pub struct WorkflowEngine {
    store: Arc<dyn StoreProvider>,
    handlers: HandlerRegistry,
}

impl WorkflowEngine {
    /// Create an engine over a prepared store and register the built-in
    /// handlers.
    #[must_use]
    pub fn new(store: Arc<dyn StoreProvider>) -> Arc<Self> {
        let engine = Arc::new(Self {
            store,
            handlers: HandlerRegistry::new(),
        });
        engine.handlers.register("log", Arc::new(LogHandler));
        engine.handlers.register("shell", Arc::new(ShellHandler));
        engine.handlers.register("file", Arc::new(FileHandler));
        engine.handlers.register("condition", Arc::new(ConditionHandler));
        engine.handlers.register("test", Arc::new(TestHandler));
        engine.handlers.register(
            "workflow",
            Arc::new(SubflowHandler::new(Arc::downgrade(&engine))),
        );
        engine
    }

    /// Build the store selected by the settings, prepare it and wrap it in an
    /// engine.
    pub async fn from_settings(settings: &EngineSettings) -> Result<Arc<Self>> {
        let store: Arc<dyn StoreProvider> = match settings.db_type {
            DbType::File => Arc::new(DirStore::new(&settings.db_dir)),
            DbType::DocumentStore => Arc::new(
                PostgresStore::connect(&settings.database_url())
                    .await
                    .context(StoreSnafu)?,
            ),
        };
        store.init().await.context(StoreSnafu)?;
        Ok(Self::new(store))
    }

    /// Register a custom handler under an id, replacing any previous one.
    pub fn register_handler(&self, id: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.register(id, handler);
    }

    /// Release the store.
    pub async fn close(&self) -> Result<()> {
        self.store.close().await.context(StoreSnafu)
    }

    /// Execute an instance to completion, pause or error.
    ///
    /// The inbound instance is deep-cloned; the caller's copy is never
    /// mutated. Environment and id are assigned exactly once per instance
    /// lifetime. Executing an instance that already completed is a no-op.
    pub async fn execute(&self, instance: &WorkflowInstance) -> Result<WorkflowInstance> {
        let mut instance = instance.clone();
        ensure!(
            !instance.name.trim().is_empty(),
            ValidationSnafu {
                message: "workflow name must not be empty",
            }
        );

        if instance.status == InstanceStatus::Completed {
            debug!(
                "Instance {} is already completed, nothing to execute",
                instance.id.as_deref().unwrap_or("<unsaved>")
            );
            return Ok(instance);
        }

        if instance.environment.is_none() {
            instance.environment = Some(std::env::vars().collect());
        }
        if instance.id.is_none() {
            instance.id = Some(uuid::Uuid::new_v4().to_string());
        }

        info!(
            "Executing workflow '{}' ({})",
            instance.name,
            instance.id.as_deref().unwrap_or_default()
        );

        let mut pre_failed = false;
        if let Some(mut pre) = instance.pre_workflow.take() {
            if pre.status != TaskStatus::Completed && pre.status != TaskStatus::Paused {
                pre_failed =
                    scheduler::dispatch_hook(self, &instance, &mut pre, "pre workflow").await?;
            }
            let pre_paused = pre.status == TaskStatus::Paused;
            instance.pre_workflow = Some(pre);
            if pre_paused {
                // The main tree does not open while the hook waits on an
                // injected update.
                self.persist(&instance).await?;
                return Ok(instance);
            }
        }

        if pre_failed {
            instance.status = InstanceStatus::Error;
            self.persist(&instance).await?;
        } else {
            scheduler::run(self, &mut instance).await?;
        }

        if let Some(mut post) = instance.post_workflow.take() {
            if post.status != TaskStatus::Completed && post.status != TaskStatus::Paused {
                let post_failed =
                    scheduler::dispatch_hook(self, &instance, &mut post, "post workflow").await?;
                if post_failed {
                    instance.status = InstanceStatus::Error;
                }
            }
            if post.status == TaskStatus::Paused && instance.status == InstanceStatus::Completed {
                // The instance is not terminal while its hook waits on an
                // injected update.
                instance.status = InstanceStatus::Open;
            }
            instance.post_workflow = Some(post);
            self.persist(&instance).await?;
        }

        Ok(instance)
    }

    /// Merge a task injection bundle into a persisted instance and re-enter
    /// execution. This is how a paused task resumes once an external event
    /// delivers its result.
    ///
    /// Bundle keys name the first matching task, depth-first; the reserved
    /// names `pre workflow` and `post workflow` address the hook tasks.
    pub async fn update(&self, id: &str, updates: &UpdateBundle) -> Result<WorkflowInstance> {
        let mut instance = self.store.load_instance(id, 0).await.context(StoreSnafu)?;
        ensure!(
            instance.status != InstanceStatus::Completed,
            AlreadyCompletedSnafu { id }
        );

        for (name, update) in updates {
            let hook = match name.as_str() {
                "pre workflow" => instance.pre_workflow.as_mut(),
                "post workflow" => instance.post_workflow.as_mut(),
                _ => None,
            };
            if let Some(task) = hook {
                debug!("Injecting update into the {name} task");
                task.apply_update(update);
                continue;
            }

            match find_task_path(&instance.tasks, name) {
                Some(path) => {
                    if let Some(task) = task_at_mut(&mut instance.tasks, &path) {
                        debug!("Injecting update into task '{name}'");
                        task.apply_update(update);
                    }
                }
                None => debug!("Injection target '{name}' not found, ignoring"),
            }
        }

        self.execute(&instance).await
    }

    /// Fetch an instance: the current record, or `rewind` save points back.
    pub async fn get(&self, id: &str, rewind: usize) -> Result<WorkflowInstance> {
        self.store
            .load_instance(id, rewind)
            .await
            .context(StoreSnafu)
    }

    /// Current instances matching a query. Backends without query support
    /// report a capability error.
    pub async fn list(&self, query: &InstanceQuery) -> Result<Vec<WorkflowInstance>> {
        self.store.find_instances(query).await.context(StoreSnafu)
    }

    /// Remove one instance and its history.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete_instance(id).await.context(StoreSnafu)
    }

    /// Remove every instance and its history, keeping definitions.
    pub async fn delete_all(&self) -> Result<()> {
        self.store.delete_all().await.context(StoreSnafu)
    }

    pub async fn save_definition(&self, def: &WorkflowDefinition) -> Result<()> {
        ensure!(
            !def.name.trim().is_empty(),
            ValidationSnafu {
                message: "definition name must not be empty",
            }
        );
        self.store.save_definition(def).await.context(StoreSnafu)
    }

    pub async fn get_definition(&self, name: &str) -> Result<WorkflowDefinition> {
        self.store.get_definition(name).await.context(StoreSnafu)
    }

    pub async fn delete_definition(&self, name: &str) -> Result<()> {
        self.store
            .delete_definition(name)
            .await
            .context(StoreSnafu)
    }

    pub(crate) async fn persist(&self, instance: &WorkflowInstance) -> Result<()> {
        self.store.save_instance(instance).await.context(StoreSnafu)
    }
}
