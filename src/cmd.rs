//! Command handlers behind the CLI flags.

use std::path::Path;

use snafu::prelude::*;

use magpie::engine::WorkflowEngine;
use magpie::output;
use magpie::workflow::{self, InstanceStatus, WorkflowInstance};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Engine error: {source}"))]
    Engine { source: magpie::engine::Error },

    #[snafu(display("Definition error: {source}"))]
    Definition { source: magpie::workflow::Error },

    #[snafu(display("Workflow instance {id} finished with errors"))]
    WorkflowFailed { id: String },

    #[snafu(display("{message}"))]
    Usage { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Load a definition file and execute it.
pub async fn run_definition(engine: &WorkflowEngine, path: &Path) -> Result<()> {
    let definition = workflow::load_definition(path).await.context(DefinitionSnafu)?;
    let instance = engine
        .execute(&WorkflowInstance::from(definition))
        .await
        .context(EngineSnafu)?;
    output::format_instance(&instance);
    ensure_succeeded(&instance)
}

/// Apply a task injection bundle to a persisted instance and resume it.
pub async fn apply_update(engine: &WorkflowEngine, id: &str, path: &Path) -> Result<()> {
    let updates = workflow::load_update_bundle(path)
        .await
        .context(DefinitionSnafu)?;
    let instance = engine.update(id, &updates).await.context(EngineSnafu)?;
    output::format_instance(&instance);
    ensure_succeeded(&instance)
}

/// Print an instance, optionally rewound to an earlier save point.
pub async fn show_instance(engine: &WorkflowEngine, id: &str, rewind: usize) -> Result<()> {
    let instance = engine.get(id, rewind).await.context(EngineSnafu)?;
    output::format_instance(&instance);
    Ok(())
}

pub async fn delete_instance(engine: &WorkflowEngine, id: &str) -> Result<()> {
    engine.delete(id).await.context(EngineSnafu)?;
    println!("Deleted instance {id}");
    Ok(())
}

pub async fn delete_all(engine: &WorkflowEngine) -> Result<()> {
    engine.delete_all().await.context(EngineSnafu)?;
    println!("Deleted all instances");
    Ok(())
}

pub fn usage_error() -> Result<()> {
    UsageSnafu {
        message: "nothing to do: pass --file to execute a definition, --id to inspect or update \
                  an instance, or --delete/--deleteALL to remove instances",
    }
    .fail()
}

fn ensure_succeeded(instance: &WorkflowInstance) -> Result<()> {
    ensure!(
        instance.status != InstanceStatus::Error,
        WorkflowFailedSnafu {
            id: instance.id.clone().unwrap_or_default(),
        }
    );
    Ok(())
}
