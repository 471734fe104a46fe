use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::handler::{Handler, Result};
use crate::workflow::Task;

/// Writes `parameters.log` through the tracing stack at `parameters.level`.
/// Unknown levels log at info.
pub struct LogHandler;

#[async_trait]
impl Handler for LogHandler {
    async fn handle(&self, workflow_id: &str, task_name: &str, task: &mut Task) -> Result<()> {
        let message = task
            .parameters
            .get("log")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let level = task
            .parameters
            .get("level")
            .and_then(Value::as_str)
            .unwrap_or("info");

        match level {
            "verbose" => trace!(workflow = workflow_id, task = task_name, "{message}"),
            "debug" => debug!(workflow = workflow_id, task = task_name, "{message}"),
            "warn" => warn!(workflow = workflow_id, task = task_name, "{message}"),
            "error" => error!(workflow = workflow_id, task = task_name, "{message}"),
            _ => info!(workflow = workflow_id, task = task_name, "{message}"),
        }
        Ok(())
    }
}
