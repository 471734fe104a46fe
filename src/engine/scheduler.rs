//! The per-pass scheduling state machine.
//!
//! One pass persists the instance, short-circuits if anything is paused,
//! opens the frontier of waiting tasks in insertion order (honoring
//! `blocking`), collects runnable tasks, expands their references, evaluates
//! their gates and dispatches every non-skipped runnable in parallel. Passes
//! repeat while progress is made; the instance completes once every top-level
//! task has.

use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use snafu::prelude::*;
use tracing::{debug, warn};

use super::{Result, SerializationSnafu, WorkflowEngine};
use crate::handler;
use crate::references;
use crate::workflow::{
    coerce_bool, task_at_mut, walk_tasks, InstanceStatus, Task, TaskMap, TaskStatus,
    WorkflowInstance,
};

/// Drive the instance until nothing is runnable. Handler failures are
/// recorded on the instance; only store and serialization failures surface as
/// errors.
pub(super) async fn run(engine: &WorkflowEngine, instance: &mut WorkflowInstance) -> Result<()> {
    loop {
        // Save point A: the tree as it stands before this batch.
        engine.persist(instance).await?;

        if has_paused(&instance.tasks) {
            debug!("Instance has paused tasks, returning control to the caller");
            return Ok(());
        }

        open_frontier(&mut instance.tasks);

        let runnables = collect_runnables(&instance.tasks);
        if runnables.is_empty() {
            if instance.top_level_completed() {
                instance.status = InstanceStatus::Completed;
            }
            // Save point C: idle, nothing left to dispatch.
            engine.persist(instance).await?;
            return Ok(());
        }

        debug!("Dispatching a batch of {} task(s)", runnables.len());
        let failed = dispatch_batch(engine, instance, runnables).await?;
        if failed {
            instance.status = InstanceStatus::Error;
            // Save point B: the failure and everything the batch did reach.
            engine.persist(instance).await?;
            return Ok(());
        }
    }
}

fn has_paused(tasks: &TaskMap) -> bool {
    !walk_tasks(tasks, true, &mut |_, task| {
        task.status != TaskStatus::Paused
    })
}

/// Open waiting tasks in insertion order, recursing into the children of
/// every waiting, open or re-entered executing task — an injection may hand
/// an executing task a fresh waiting subtree. A blocking task that has not
/// completed stops the scan of its later siblings until a future pass; its
/// own children are not restricted.
fn open_frontier(tasks: &mut TaskMap) {
    for (_, task) in tasks.iter_mut() {
        match task.status {
            TaskStatus::Waiting => {
                task.status = TaskStatus::Open;
                task.time_opened = Some(Utc::now());
                open_frontier(&mut task.tasks);
            }
            TaskStatus::Open | TaskStatus::Executing => open_frontier(&mut task.tasks),
            _ => {}
        }
        if task.is_blocking() && task.status != TaskStatus::Completed {
            break;
        }
    }
}

/// Paths of all runnable tasks, insertion order at each parent, depth-first.
/// A task is runnable iff it is open (or re-entered executing via injection)
/// and every descendant is completed.
fn collect_runnables(tasks: &TaskMap) -> Vec<Vec<String>> {
    let mut paths = Vec::new();
    let mut prefix = Vec::new();
    collect_into(tasks, &mut prefix, &mut paths);
    paths
}

fn collect_into(tasks: &TaskMap, prefix: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
    for (name, task) in tasks {
        prefix.push(name.clone());
        let dispatchable = matches!(task.status, TaskStatus::Open | TaskStatus::Executing);
        if dispatchable && task.subtree_completed() {
            out.push(prefix.clone());
        } else {
            collect_into(&task.tasks, prefix, out);
        }
        prefix.pop();
    }
}

enum Prep {
    Skip,
    ErrorGate,
    Run(String),
}

/// Expand references, evaluate the gates into booleans and transition the
/// task to executing. Decides whether the handler runs: a true `skipIf`, a
/// true `errorIf` or an absent handler means it does not.
fn prepare(task: &mut Task, root: &Value) -> Prep {
    references::expand_task(task, root);

    let skip = coerce_bool(task.skip_if.as_ref());
    if task.skip_if.is_some() {
        task.skip_if = Some(Value::Bool(skip));
    }
    let error_gate = coerce_bool(task.error_if.as_ref());
    if task.error_if.is_some() {
        task.error_if = Some(Value::Bool(error_gate));
    }

    task.status = TaskStatus::Executing;
    task.time_started = Some(Utc::now());

    if error_gate {
        Prep::ErrorGate
    } else if skip {
        Prep::Skip
    } else {
        match &task.handler {
            Some(handler_id) => Prep::Run(handler_id.clone()),
            None => Prep::Skip,
        }
    }
}

fn complete(task: &mut Task) {
    task.status = TaskStatus::Completed;
    task.time_completed = Some(Utc::now());
    task.total_duration = task
        .time_opened
        .zip(task.time_completed)
        .map(|(opened, completed)| completed.signed_duration_since(opened).num_milliseconds());
}

fn fail_gated(task: &mut Task) {
    task.status = TaskStatus::Error;
    task.error_msg = Some("errorIf condition evaluated to true".to_string());
}

async fn invoke(
    engine: &WorkflowEngine,
    workflow_id: &str,
    task_name: &str,
    handler_id: &str,
    task: &mut Task,
) -> (handler::Result<()>, i64) {
    let started = std::time::Instant::now();
    let outcome = match engine.handlers.resolve(handler_id) {
        Ok(handler) => handler.handle(workflow_id, task_name, task).await,
        Err(e) => Err(e),
    };
    let duration = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
    (outcome, duration)
}

/// Settle a finished handler invocation onto its task. Returns true iff the
/// task ended in error.
fn settle(task: &mut Task, task_name: &str, outcome: handler::Result<()>, duration: i64) -> bool {
    match outcome {
        Ok(()) => {
            task.handler_executed = true;
            task.handler_duration = Some(duration);
            if task.status == TaskStatus::Paused {
                debug!("Task '{task_name}' paused");
            } else {
                complete(task);
            }
            false
        }
        Err(e) if task.ignores_error() => {
            debug!("Task '{task_name}' failed but ignoreError is set: {e}");
            task.handler_executed = true;
            task.handler_duration = Some(duration);
            task.error_msg = None;
            complete(task);
            false
        }
        Err(e) => {
            warn!("Task '{task_name}' failed: {e}");
            task.status = TaskStatus::Error;
            task.error_msg = Some(e.to_string());
            task.handler_duration = Some(duration);
            true
        }
    }
}

/// Prepare every runnable and dispatch the non-skipped ones in parallel.
/// Returns true iff any task in the batch failed.
async fn dispatch_batch(
    engine: &WorkflowEngine,
    instance: &mut WorkflowInstance,
    paths: Vec<Vec<String>>,
) -> Result<bool> {
    let workflow_id = instance.id.clone().unwrap_or_default();
    // One snapshot serves the whole batch; peers only observe each other's
    // mutations at their own next dispatch.
    let root = serde_json::to_value(&*instance).context(SerializationSnafu)?;

    let mut jobs = Vec::new();
    let mut failed = false;

    for path in paths {
        let Some(task) = task_at_mut(&mut instance.tasks, &path) else {
            continue;
        };
        match prepare(task, &root) {
            Prep::ErrorGate => {
                fail_gated(task);
                failed = true;
            }
            Prep::Skip => complete(task),
            Prep::Run(handler_id) => {
                let name = path.last().cloned().unwrap_or_default();
                let task = task.clone();
                jobs.push((path, name, handler_id, task));
            }
        }
    }

    let settled = join_all(jobs.into_iter().map(|(path, name, handler_id, mut task)| {
        let workflow_id = workflow_id.clone();
        async move {
            let (outcome, duration) =
                invoke(engine, &workflow_id, &name, &handler_id, &mut task).await;
            (path, name, task, outcome, duration)
        }
    }))
    .await;

    for (path, name, mut task, outcome, duration) in settled {
        if settle(&mut task, &name, outcome, duration) {
            failed = true;
        }
        if let Some(slot) = task_at_mut(&mut instance.tasks, &path) {
            *slot = task;
        }
    }

    Ok(failed)
}

/// Run a `pre workflow` / `post workflow` task under the same dispatch rules
/// as a leaf task. Returns true iff it failed.
pub(super) async fn dispatch_hook(
    engine: &WorkflowEngine,
    instance: &WorkflowInstance,
    task: &mut Task,
    hook_name: &str,
) -> Result<bool> {
    if task.status == TaskStatus::Waiting {
        task.status = TaskStatus::Open;
        task.time_opened = Some(Utc::now());
    }

    let root = serde_json::to_value(instance).context(SerializationSnafu)?;
    let workflow_id = instance.id.clone().unwrap_or_default();

    match prepare(task, &root) {
        Prep::ErrorGate => {
            fail_gated(task);
            Ok(true)
        }
        Prep::Skip => {
            complete(task);
            Ok(false)
        }
        Prep::Run(handler_id) => {
            let (outcome, duration) =
                invoke(engine, &workflow_id, hook_name, &handler_id, task).await;
            Ok(settle(task, hook_name, outcome, duration))
        }
    }
}
