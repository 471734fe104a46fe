use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::store::{
    rewind_index, require_id, Error, InstanceQuery, Result, StoreProvider,
};
use crate::workflow::{WorkflowDefinition, WorkflowInstance};

/// In-memory store. State lives for the lifetime of the process; useful for
/// tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    definitions: Mutex<HashMap<String, WorkflowDefinition>>,
    instances: Mutex<HashMap<String, WorkflowInstance>>,
    history: Mutex<HashMap<String, Vec<WorkflowInstance>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of historical records held for an instance.
    #[must_use]
    pub fn history_len(&self, id: &str) -> usize {
        self.history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(id)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl StoreProvider for MemoryStore {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<()> {
        let mut definitions = self
            .definitions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        definitions.insert(def.name.clone(), def.clone());
        Ok(())
    }

    async fn get_definition(&self, name: &str) -> Result<WorkflowDefinition> {
        let definitions = self
            .definitions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        definitions
            .get(name)
            .cloned()
            .ok_or_else(|| Error::DefinitionNotFound {
                name: name.to_string(),
            })
    }

    async fn delete_definition(&self, name: &str) -> Result<()> {
        let mut definitions = self
            .definitions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        definitions
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::DefinitionNotFound {
                name: name.to_string(),
            })
    }

    async fn save_instance(&self, instance: &WorkflowInstance) -> Result<()> {
        let id = require_id(instance)?.to_string();
        let mut instances = self
            .instances
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut history = self
            .history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        history
            .entry(id.clone())
            .or_default()
            .push(instance.clone());
        instances.insert(id, instance.clone());
        Ok(())
    }

    async fn load_instance(&self, id: &str, rewind: usize) -> Result<WorkflowInstance> {
        if rewind == 0 {
            let instances = self
                .instances
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            return instances
                .get(id)
                .cloned()
                .ok_or_else(|| Error::InstanceNotFound { id: id.to_string() });
        }

        let history = self
            .history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let records = history
            .get(id)
            .ok_or_else(|| Error::InstanceNotFound { id: id.to_string() })?;
        rewind_index(records.len(), rewind, id)
            .and_then(|index| records.get(index))
            .cloned()
            .ok_or_else(|| Error::InstanceNotFound { id: id.to_string() })
    }

    async fn delete_instance(&self, id: &str) -> Result<()> {
        let mut instances = self
            .instances
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut history = self
            .history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        history.remove(id);
        instances
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::InstanceNotFound { id: id.to_string() })
    }

    async fn delete_all(&self) -> Result<()> {
        self.instances
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
        self.history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
        Ok(())
    }

    async fn find_instances(&self, query: &InstanceQuery) -> Result<Vec<WorkflowInstance>> {
        let instances = self
            .instances
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(instances
            .values()
            .filter(|instance| query.matches(instance))
            .cloned()
            .collect())
    }
}
