use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use snafu::prelude::*;

use crate::store::{
    rewind_index, require_id, Error, InstanceQuery, IoSnafu, Result, SerializationSnafu,
    StoreProvider,
};
use crate::workflow::{WorkflowDefinition, WorkflowInstance};

const DEFINITION_EXT: &str = "def";

/// Directory-backed store.
///
/// Layout: definitions as `<name>.def`, the current record of an instance as
/// `<id>`, history as `<id>_<epoch-ms>`. Instance ids carry no underscore, so
/// the suffix doubles as the history marker, and epoch-millisecond suffixes
/// make lexicographic order chronological.
#[derive(Debug)]
pub struct DirStore {
    dir: PathBuf,
}

impl DirStore {
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn definition_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{DEFINITION_EXT}"))
    }

    fn instance_path(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }

    async fn read_instance(&self, path: &Path, id: &str) -> Result<WorkflowInstance> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::InstanceNotFound { id: id.to_string() });
            }
            Err(e) => return Err(Error::Io { source: e }),
        };
        serde_json::from_str(&content).context(SerializationSnafu)
    }

    /// History file names for an instance, lexicographically sorted
    /// (oldest first).
    async fn history_files(&self, id: &str) -> Result<Vec<PathBuf>> {
        let prefix = format!("{id}_");
        let mut entries = tokio::fs::read_dir(&self.dir).await.context(IoSnafu)?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.context(IoSnafu)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl StoreProvider for DirStore {
    async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.context(IoSnafu)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<()> {
        let content = serde_json::to_string_pretty(def).context(SerializationSnafu)?;
        tokio::fs::write(self.definition_path(&def.name), content)
            .await
            .context(IoSnafu)
    }

    async fn get_definition(&self, name: &str) -> Result<WorkflowDefinition> {
        let content = match tokio::fs::read_to_string(self.definition_path(name)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::DefinitionNotFound {
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(Error::Io { source: e }),
        };
        serde_json::from_str(&content).context(SerializationSnafu)
    }

    async fn delete_definition(&self, name: &str) -> Result<()> {
        match tokio::fs::remove_file(self.definition_path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::DefinitionNotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(Error::Io { source: e }),
        }
    }

    async fn save_instance(&self, instance: &WorkflowInstance) -> Result<()> {
        let id = require_id(instance)?;
        let content = serde_json::to_string_pretty(instance).context(SerializationSnafu)?;

        let mut stamp = Utc::now().timestamp_millis();
        let mut history_path = self.dir.join(format!("{id}_{stamp}"));
        while tokio::fs::try_exists(&history_path).await.context(IoSnafu)? {
            stamp += 1;
            history_path = self.dir.join(format!("{id}_{stamp}"));
        }

        tokio::fs::write(&history_path, &content)
            .await
            .context(IoSnafu)?;
        tokio::fs::write(self.instance_path(id), &content)
            .await
            .context(IoSnafu)
    }

    async fn load_instance(&self, id: &str, rewind: usize) -> Result<WorkflowInstance> {
        if rewind == 0 {
            return self.read_instance(&self.instance_path(id), id).await;
        }

        let files = self.history_files(id).await?;
        let path = rewind_index(files.len(), rewind, id)
            .and_then(|index| files.get(index))
            .ok_or_else(|| Error::InstanceNotFound { id: id.to_string() })?;
        self.read_instance(path, id).await
    }

    async fn delete_instance(&self, id: &str) -> Result<()> {
        for path in self.history_files(id).await? {
            tokio::fs::remove_file(path).await.context(IoSnafu)?;
        }
        match tokio::fs::remove_file(self.instance_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::InstanceNotFound { id: id.to_string() })
            }
            Err(e) => Err(Error::Io { source: e }),
        }
    }

    async fn delete_all(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.context(IoSnafu)?;
        while let Some(entry) = entries.next_entry().await.context(IoSnafu)? {
            let path = entry.path();
            let is_definition = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == DEFINITION_EXT);
            if !is_definition && entry.file_type().await.context(IoSnafu)?.is_file() {
                tokio::fs::remove_file(path).await.context(IoSnafu)?;
            }
        }
        Ok(())
    }

    async fn find_instances(&self, _query: &InstanceQuery) -> Result<Vec<WorkflowInstance>> {
        Err(Error::Capability {
            backend: "file",
            operation: "ad-hoc instance queries",
        })
    }
}
