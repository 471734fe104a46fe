//! Engine configuration and log-level handling.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Which store backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DbType {
    #[default]
    File,
    DocumentStore,
}

/// Engine settings, loadable from (in rising precedence) built-in defaults, an
/// optional `magpie.yaml` and the environment: `DB_TYPE` selects the backend,
/// `DB_DIR` the file-store directory, `DB_HOST`/`DB_PORT` the document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub db_type: DbType,

    #[serde(default = "default_db_dir")]
    pub db_dir: PathBuf,

    #[serde(default = "default_db_host")]
    pub db_host: String,

    #[serde(default = "default_db_port")]
    pub db_port: u16,
}

fn default_db_dir() -> PathBuf {
    PathBuf::from("_data")
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            db_type: DbType::File,
            db_dir: default_db_dir(),
            db_host: default_db_host(),
            db_port: default_db_port(),
        }
    }
}

impl EngineSettings {
    /// Load settings from defaults, then an optional `magpie.yaml` in the
    /// working directory, then environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&EngineSettings::default())?)
            .add_source(
                config::File::with_name("magpie")
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(config::Environment::default().try_parsing(true));

        builder.build()?.try_deserialize()
    }

    /// Connection string for the document store.
    #[must_use]
    pub fn database_url(&self) -> String {
        format!(
            "postgresql://postgres@{}:{}/magpie",
            self.db_host, self.db_port
        )
    }
}

/// Validated log level. `verbose` sits below `debug` and maps onto the trace
/// filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    Verbose,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse a level name. Unknown values fall back to info with a warning.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "debug" => Self::Debug,
            "verbose" => Self::Verbose,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            other => {
                warn!("Unknown log level '{other}', falling back to info");
                Self::Info
            }
        }
    }

    /// The tracing env-filter directive for this level.
    #[must_use]
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Verbose => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}
