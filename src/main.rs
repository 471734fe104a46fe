use std::path::PathBuf;

use clap::Parser;
use snafu::prelude::*;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use magpie::config::{EngineSettings, LogLevel};
use magpie::engine::WorkflowEngine;

mod cmd;

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Configuration error: {source}"))]
    Config { source: config::ConfigError },

    #[snafu(display("Engine error: {source}"))]
    Engine { source: magpie::engine::Error },

    #[snafu(display("{source}"))]
    Command { source: cmd::Error },
}

#[derive(Parser, Debug)]
#[command(name = "magpie")]
#[command(version)]
#[command(about = "A persistent, hierarchical workflow engine", long_about = None)]
struct Cli {
    /// Log level (debug, verbose, info, warn, error)
    #[arg(long, default_value = "info", value_name = "LEVEL")]
    log: String,

    /// Workflow definition to execute, or a task update file when --id is set
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// Instance id to update or inspect
    #[arg(long, value_name = "ID")]
    id: Option<String>,

    /// Retrieve the instance as it was N save points back
    #[arg(long, default_value_t = 0, value_name = "N")]
    rewind: usize,

    /// Delete one instance and its history
    #[arg(long, value_name = "ID")]
    delete: Option<String>,

    /// Delete all instances and their history
    #[arg(long = "deleteALL")]
    delete_all: bool,
}

fn init_tracing(level: LogLevel) {
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_filter()));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    init_tracing(LogLevel::parse(&cli.log));

    let settings = EngineSettings::load().context(ConfigSnafu)?;
    let engine = WorkflowEngine::from_settings(&settings)
        .await
        .context(EngineSnafu)?;

    let result = dispatch(&engine, &cli).await.context(CommandSnafu);

    if let Err(e) = engine.close().await {
        tracing::warn!("Failed to close the store cleanly: {e}");
    }
    result
}

async fn dispatch(engine: &WorkflowEngine, cli: &Cli) -> cmd::Result<()> {
    if cli.delete_all {
        return cmd::delete_all(engine).await;
    }
    if let Some(id) = &cli.delete {
        return cmd::delete_instance(engine, id).await;
    }
    match (&cli.id, &cli.file) {
        (Some(id), Some(file)) => cmd::apply_update(engine, id, file).await,
        (Some(id), None) => cmd::show_instance(engine, id, cli.rewind).await,
        (None, Some(file)) => cmd::run_definition(engine, file).await,
        (None, None) => cmd::usage_error(),
    }
}
