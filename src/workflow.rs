//! Workflow data model: definitions, instances and the task tree.
//!
//! A definition is a reusable workflow shape identified by name. An instance
//! is a running (or terminal) copy of that shape with per-task status, timing
//! and an environment snapshot. Both share the same task tree, keyed by task
//! name with insertion order preserved; insertion order is the deterministic
//! scan order everywhere in the engine.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::prelude::*;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to read {path}: {source}"))]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Failed to parse YAML: {source}"))]
    Yaml { source: serde_yaml::Error },

    #[snafu(display("Failed to parse JSON: {source}"))]
    Json { source: serde_json::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Child tasks keyed by name. Keys are unique within a parent and iteration
/// follows insertion order.
pub type TaskMap = IndexMap<String, Task>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Waiting,
    Open,
    Executing,
    Paused,
    Completed,
    Error,
}

impl TaskStatus {
    /// Terminal within a single execution pass.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    #[default]
    Open,
    Completed,
    Error,
}

/// A node in the task tree.
///
/// `blocking`, `skipIf` and `errorIf` accept any JSON value; they are
/// reference-expanded before dispatch and then coerced to booleans with
/// [`coerce_bool`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub status: TaskStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,

    /// Arbitrary value tree passed to, and possibly mutated by, the handler.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub parameters: Value,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub tasks: TaskMap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocking: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_if: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_if: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_error: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_opened: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_started: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_completed: Option<DateTime<Utc>>,

    /// Milliseconds spent inside the handler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler_duration: Option<i64>,

    /// Milliseconds from `timeOpened` to `timeCompleted`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<i64>,

    /// True iff the handler actually ran (as opposed to a skip).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub handler_executed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

impl Task {
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        coerce_bool(self.blocking.as_ref())
    }

    #[must_use]
    pub fn ignores_error(&self) -> bool {
        coerce_bool(self.ignore_error.as_ref())
    }

    /// True iff every descendant of this task is completed. A task with no
    /// children is trivially complete below itself.
    #[must_use]
    pub fn subtree_completed(&self) -> bool {
        walk_tasks(&self.tasks, true, &mut |_, task| {
            task.status == TaskStatus::Completed
        })
    }

    /// The parameters tree as a mutable JSON object, coercing non-object
    /// values to an empty object first.
    pub fn parameters_object_mut(&mut self) -> &mut serde_json::Map<String, Value> {
        if !self.parameters.is_object() {
            self.parameters = Value::Object(serde_json::Map::new());
        }
        match &mut self.parameters {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    /// Merge an injection bundle entry into this task. Only the fields the
    /// update carries are replaced; everything else survives. The merge stamps
    /// `timeCompleted` and recomputes `totalDuration`.
    pub fn apply_update(&mut self, update: &TaskUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(parameters) = &update.parameters {
            self.parameters = parameters.clone();
        }
        if let Some(skip_if) = &update.skip_if {
            self.skip_if = Some(skip_if.clone());
        }
        if let Some(error_if) = &update.error_if {
            self.error_if = Some(error_if.clone());
        }
        if let Some(tasks) = &update.tasks {
            self.tasks = tasks.clone();
        }
        self.time_completed = Some(Utc::now());
        self.total_duration = self
            .time_opened
            .zip(self.time_completed)
            .map(|(opened, completed)| completed.signed_duration_since(opened).num_milliseconds());
    }
}

/// One entry of a task injection bundle: the fields to replace on the first
/// task of a given name. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_if: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_if: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<TaskMap>,
}

/// Named bundle of task updates, as accepted by `update` and the CLI. The
/// reserved keys `pre workflow` and `post workflow` address the hook tasks.
pub type UpdateBundle = IndexMap<String, TaskUpdate>;

/// A reusable workflow shape, persisted independently of instances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub tasks: TaskMap,

    #[serde(
        rename = "pre workflow",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub pre_workflow: Option<Task>,

    #[serde(
        rename = "post workflow",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub post_workflow: Option<Task>,
}

/// The root of a running (or terminal) workflow tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Assigned on first execution if absent; never reassigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub name: String,

    #[serde(default)]
    pub status: InstanceStatus,

    /// Snapshot of the process environment, taken once at first execution and
    /// addressable through references as `environment.NAME`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<HashMap<String, String>>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub tasks: TaskMap,

    #[serde(
        rename = "pre workflow",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub pre_workflow: Option<Task>,

    #[serde(
        rename = "post workflow",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub post_workflow: Option<Task>,
}

impl From<WorkflowDefinition> for WorkflowInstance {
    fn from(def: WorkflowDefinition) -> Self {
        Self {
            id: None,
            name: def.name,
            status: InstanceStatus::Open,
            environment: None,
            tasks: def.tasks,
            pre_workflow: def.pre_workflow,
            post_workflow: def.post_workflow,
        }
    }
}

impl WorkflowInstance {
    /// True iff any task anywhere in the tree satisfies the predicate.
    #[must_use]
    pub fn any_task<F>(&self, mut pred: F) -> bool
    where
        F: FnMut(&Task) -> bool,
    {
        !walk_tasks(&self.tasks, true, &mut |_, task| !pred(task))
    }

    /// True iff every top-level task is completed.
    #[must_use]
    pub fn top_level_completed(&self) -> bool {
        self.tasks
            .values()
            .all(|task| task.status == TaskStatus::Completed)
    }
}

/// The single deep traversal primitive underlying status queries, reference
/// collection, merging and scheduling.
///
/// Iterates `tasks` in insertion order, invoking the visitor per task and
/// recursing into children iff `deep` is set (depth-first, pre-order). A
/// `false` return from the visitor halts the entire traversal; the function
/// returns whether the walk ran to completion.
pub fn walk_tasks<F>(tasks: &TaskMap, deep: bool, visit: &mut F) -> bool
where
    F: FnMut(&str, &Task) -> bool,
{
    for (name, task) in tasks {
        if !visit(name, task) {
            return false;
        }
        if deep && !walk_tasks(&task.tasks, deep, visit) {
            return false;
        }
    }
    true
}

/// Locate the first task named `name`, depth-first in insertion order, and
/// return its path from the root mapping.
#[must_use]
pub fn find_task_path(tasks: &TaskMap, name: &str) -> Option<Vec<String>> {
    for (task_name, task) in tasks {
        if task_name == name {
            return Some(vec![task_name.clone()]);
        }
        if let Some(mut rest) = find_task_path(&task.tasks, name) {
            let mut path = Vec::with_capacity(rest.len() + 1);
            path.push(task_name.clone());
            path.append(&mut rest);
            return Some(path);
        }
    }
    None
}

/// Mutable access to the task at `path`, if it exists.
pub fn task_at_mut<'a>(tasks: &'a mut TaskMap, path: &[String]) -> Option<&'a mut Task> {
    let (first, rest) = path.split_first()?;
    let task = tasks.get_mut(first)?;
    if rest.is_empty() {
        Some(task)
    } else {
        task_at_mut(&mut task.tasks, rest)
    }
}

/// Immutable access to the task at `path`, if it exists.
#[must_use]
pub fn task_at<'a>(tasks: &'a TaskMap, path: &[String]) -> Option<&'a Task> {
    let (first, rest) = path.split_first()?;
    let task = tasks.get(first)?;
    if rest.is_empty() {
        Some(task)
    } else {
        task_at(&task.tasks, rest)
    }
}

/// Boolean coercion for gate fields: booleans pass through, numbers are true
/// when non-zero, strings when `"true"` (case-insensitive) or `"1"`. Anything
/// else, including an absent value, is false.
#[must_use]
pub fn coerce_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true") || s == "1",
        _ => false,
    }
}

fn is_yaml_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yml") | Some("yaml")
    )
}

/// Load a definition from a file. `.yml`/`.yaml` parse as YAML, anything else
/// as JSON.
pub async fn load_definition(path: &Path) -> Result<WorkflowDefinition> {
    let content = tokio::fs::read_to_string(path).await.context(IoSnafu {
        path: path.display().to_string(),
    })?;
    if is_yaml_path(path) {
        serde_yaml::from_str(&content).context(YamlSnafu)
    } else {
        serde_json::from_str(&content).context(JsonSnafu)
    }
}

/// Load a task injection bundle from a file, with the same format detection
/// as [`load_definition`].
pub async fn load_update_bundle(path: &Path) -> Result<UpdateBundle> {
    let content = tokio::fs::read_to_string(path).await.context(IoSnafu {
        path: path.display().to_string(),
    })?;
    if is_yaml_path(path) {
        serde_yaml::from_str(&content).context(YamlSnafu)
    } else {
        serde_json::from_str(&content).context(JsonSnafu)
    }
}
