use async_trait::async_trait;
use serde_json::Value;
use snafu::prelude::*;

use crate::handler::{Handler, ReportedSnafu, Result};
use crate::workflow::{coerce_bool, Task, TaskStatus};

/// The `test` handler: knobs for exercising engine paths.
///
/// `error: true` fails the task, `paused: true` leaves it paused for a later
/// injection, and `set: {..}` merges values into `parameters` so other tasks
/// can reference them.
pub struct TestHandler;

#[async_trait]
impl Handler for TestHandler {
    async fn handle(&self, _workflow_id: &str, _task_name: &str, task: &mut Task) -> Result<()> {
        ensure!(
            !coerce_bool(task.parameters.get("error")),
            ReportedSnafu {
                message: "test handler reported an error",
            }
        );

        if let Some(Value::Object(values)) = task.parameters.get("set").cloned() {
            let parameters = task.parameters_object_mut();
            for (key, value) in values {
                parameters.insert(key, value);
            }
        }

        if coerce_bool(task.parameters.get("paused")) {
            task.status = TaskStatus::Paused;
        }
        Ok(())
    }
}
