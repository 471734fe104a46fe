use std::path::Path;
use std::sync::Weak;

use async_trait::async_trait;
use serde_json::Value;
use snafu::prelude::*;

use crate::engine::WorkflowEngine;
use crate::handler::{Handler, InvalidParametersSnafu, ReportedSnafu, Result};
use crate::workflow::{self, InstanceStatus, Task, WorkflowInstance};

/// The `workflow` handler: launches a nested workflow.
///
/// The definition comes from the store (`parameters.name`) or a file
/// (`parameters.file`). The child runs to completion (or pause/error) through
/// the same engine; its id and final status land in the parent task's
/// parameters.
pub struct SubflowHandler {
    engine: Weak<WorkflowEngine>,
}

impl SubflowHandler {
    #[must_use]
    pub fn new(engine: Weak<WorkflowEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Handler for SubflowHandler {
    async fn handle(&self, workflow_id: &str, task_name: &str, task: &mut Task) -> Result<()> {
        let engine = self.engine.upgrade().context(ReportedSnafu {
            message: "workflow engine is no longer available",
        })?;

        let definition = if let Some(name) = task.parameters.get("name").and_then(Value::as_str) {
            engine
                .get_definition(name)
                .await
                .map_err(|e| ReportedSnafu { message: e.to_string() }.build())?
        } else if let Some(file) = task.parameters.get("file").and_then(Value::as_str) {
            workflow::load_definition(Path::new(file))
                .await
                .map_err(|e| ReportedSnafu { message: e.to_string() }.build())?
        } else {
            return InvalidParametersSnafu {
                message: "workflow handler requires a 'name' or 'file' parameter",
            }
            .fail();
        };

        tracing::debug!(
            workflow = workflow_id,
            task = task_name,
            "Launching nested workflow '{}'",
            definition.name
        );

        let child = WorkflowInstance::from(definition);
        let result = engine
            .execute(&child)
            .await
            .map_err(|e| ReportedSnafu { message: e.to_string() }.build())?;

        let parameters = task.parameters_object_mut();
        if let Some(id) = &result.id {
            parameters.insert("instanceId".to_string(), Value::String(id.clone()));
        }
        parameters.insert(
            "status".to_string(),
            serde_json::to_value(result.status).unwrap_or(Value::Null),
        );

        ensure!(
            result.status != InstanceStatus::Error,
            ReportedSnafu {
                message: format!("nested workflow '{}' failed", result.name),
            }
        );
        Ok(())
    }
}
