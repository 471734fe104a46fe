use async_trait::async_trait;
use serde_json::Value;
use snafu::prelude::*;
use tokio::io::AsyncWriteExt;

use crate::handler::{Handler, InvalidParametersSnafu, IoSnafu, Result};
use crate::workflow::Task;

/// File operations on `parameters.path`: `read` puts the file content into
/// `parameters.content`; `write` and `append` take content from there;
/// `delete` removes the file.
pub struct FileHandler;

#[async_trait]
impl Handler for FileHandler {
    async fn handle(&self, _workflow_id: &str, _task_name: &str, task: &mut Task) -> Result<()> {
        let op = task
            .parameters
            .get("op")
            .and_then(Value::as_str)
            .map(str::to_string)
            .context(InvalidParametersSnafu {
                message: "file handler requires an 'op' parameter",
            })?;
        let path = task
            .parameters
            .get("path")
            .and_then(Value::as_str)
            .map(str::to_string)
            .context(InvalidParametersSnafu {
                message: "file handler requires a 'path' parameter",
            })?;

        match op.as_str() {
            "read" => {
                let content = tokio::fs::read_to_string(&path).await.context(IoSnafu)?;
                task.parameters_object_mut()
                    .insert("content".to_string(), Value::String(content));
            }
            "write" => {
                let content = content_parameter(task);
                tokio::fs::write(&path, content).await.context(IoSnafu)?;
            }
            "append" => {
                let content = content_parameter(task);
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await
                    .context(IoSnafu)?;
                file.write_all(content.as_bytes()).await.context(IoSnafu)?;
            }
            "delete" => {
                tokio::fs::remove_file(&path).await.context(IoSnafu)?;
            }
            other => {
                return InvalidParametersSnafu {
                    message: format!("unknown file operation: {other}"),
                }
                .fail();
            }
        }
        Ok(())
    }
}

fn content_parameter(task: &Task) -> String {
    match task.parameters.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}
