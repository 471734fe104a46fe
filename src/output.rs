//! Pretty output formatting for the command line.

use console::style;

use crate::workflow::{InstanceStatus, Task, TaskMap, TaskStatus, WorkflowInstance};

/// Render a finished (or paused) instance with its task tree.
pub fn format_instance(instance: &WorkflowInstance) {
    println!("\n{}", "═".repeat(80));
    let status = match instance.status {
        InstanceStatus::Completed => style("completed").green().bold(),
        InstanceStatus::Error => style("error").red().bold(),
        InstanceStatus::Open => style("open").yellow().bold(),
    };
    println!(
        "{} {} {} [{status}]",
        style("▶").cyan().bold(),
        style("Workflow:").bold(),
        style(&instance.name).cyan().bold()
    );
    if let Some(id) = &instance.id {
        println!("  {} {}", style("Instance ID:").dim(), style(id).dim());
    }
    println!("{}", "─".repeat(80));

    if let Some(pre) = &instance.pre_workflow {
        format_task("pre workflow", pre, 1);
    }
    format_task_tree(&instance.tasks, 1);
    if let Some(post) = &instance.post_workflow {
        format_task("post workflow", post, 1);
    }
    println!("{}", "═".repeat(80));
}

fn format_task_tree(tasks: &TaskMap, depth: usize) {
    for (name, task) in tasks {
        format_task(name, task, depth);
        format_task_tree(&task.tasks, depth + 1);
    }
}

fn format_task(name: &str, task: &Task, depth: usize) {
    let indent = "  ".repeat(depth);
    let glyph = match task.status {
        TaskStatus::Completed => style("✓").green(),
        TaskStatus::Error => style("✗").red(),
        TaskStatus::Paused => style("⏸").yellow(),
        TaskStatus::Executing => style("▸").cyan(),
        TaskStatus::Open | TaskStatus::Waiting => style("·").dim(),
    };
    let timing = task
        .total_duration
        .map(|ms| format!(" ({ms} ms)"))
        .unwrap_or_default();
    println!(
        "{indent}{glyph} {}{}",
        style(name),
        style(timing).dim()
    );
    if let Some(error_msg) = &task.error_msg {
        println!("{indent}  {}", style(error_msg).red());
    }
}
