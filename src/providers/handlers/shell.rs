use async_trait::async_trait;
use serde_json::{json, Value};
use snafu::prelude::*;
use tokio::process::Command;
use tracing::debug;

use crate::handler::{Handler, InvalidParametersSnafu, IoSnafu, Result, ReportedSnafu};
use crate::workflow::Task;

/// Runs `parameters.command` as a subprocess.
///
/// With `parameters.args` the command is executed directly with those
/// arguments; without it the command string goes through `sh -c`. Captured
/// stdout, stderr and the exit code land in `parameters.output`, and a
/// non-zero exit fails the task.
pub struct ShellHandler;

#[async_trait]
impl Handler for ShellHandler {
    async fn handle(&self, workflow_id: &str, task_name: &str, task: &mut Task) -> Result<()> {
        let command = task
            .parameters
            .get("command")
            .and_then(Value::as_str)
            .map(str::to_string)
            .context(InvalidParametersSnafu {
                message: "shell handler requires a 'command' string parameter",
            })?;
        let args: Option<Vec<String>> = task.parameters.get("args").and_then(|value| {
            value.as_array().map(|items| {
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
        });
        let cwd = task
            .parameters
            .get("cwd")
            .and_then(Value::as_str)
            .map(str::to_string);

        debug!(workflow = workflow_id, task = task_name, "Running command: {command}");

        let mut process = match &args {
            Some(args) => {
                let mut process = Command::new(&command);
                process.args(args);
                process
            }
            None => {
                let mut process = Command::new("sh");
                process.arg("-c").arg(&command);
                process
            }
        };
        if let Some(cwd) = cwd {
            process.current_dir(cwd);
        }

        let output = process.output().await.context(IoSnafu)?;
        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        task.parameters_object_mut().insert(
            "output".to_string(),
            json!({
                "stdout": stdout,
                "stderr": stderr,
                "exitCode": exit_code,
            }),
        );

        ensure!(
            output.status.success(),
            ReportedSnafu {
                message: format!("Command '{command}' exited with status {exit_code}"),
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let mut task = Task {
            parameters: json!({"command": "echo hello"}),
            ..Task::default()
        };
        ShellHandler.handle("wf", "t", &mut task).await.unwrap();

        let output = task.parameters.get("output").unwrap();
        assert_eq!(output.get("exitCode"), Some(&json!(0)));
        assert_eq!(
            output.get("stdout").and_then(Value::as_str),
            Some("hello\n")
        );
    }

    #[tokio::test]
    async fn non_zero_exit_fails_the_task() {
        let mut task = Task {
            parameters: json!({"command": "exit 3"}),
            ..Task::default()
        };
        let err = ShellHandler.handle("wf", "t", &mut task).await.unwrap_err();
        assert!(err.to_string().contains("status 3"));
        assert_eq!(
            task.parameters.get("output").and_then(|o| o.get("exitCode")),
            Some(&json!(3))
        );
    }

    #[tokio::test]
    async fn missing_command_is_a_parameter_error() {
        let mut task = Task::default();
        let err = ShellHandler.handle("wf", "t", &mut task).await.unwrap_err();
        assert!(err.to_string().contains("command"));
    }
}
