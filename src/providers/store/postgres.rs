use async_trait::async_trait;
use chrono::Utc;
use snafu::prelude::*;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::store::{
    rewind_index, require_id, Error, InstanceQuery, Result, SerializationSnafu, StoreProvider,
};
use crate::workflow::{WorkflowDefinition, WorkflowInstance};

/// Document-style store over PostgreSQL.
///
/// Three collections: `definitions` (unique on name), `instances` (unique on
/// id) and `instances_history`, where each save appends a row whose synthetic
/// id is `<origId>_<epoch-ms>`.
#[derive(Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

fn db_error(context: &str, e: sqlx::Error) -> Error {
    Error::Store {
        message: format!("{context}: {e}"),
    }
}

impl PostgresStore {
    /// Connect to PostgreSQL. The schema is created by [`StoreProvider::init`].
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await
            .map_err(|e| db_error("Failed to connect to PostgreSQL", e))?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn history_bodies(&self, id: &str) -> Result<Vec<serde_json::Value>> {
        let rows = sqlx::query_as::<_, (serde_json::Value,)>(
            "SELECT body FROM instances_history WHERE instance_id = $1 ORDER BY seq ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to read instance history", e))?;
        Ok(rows.into_iter().map(|(body,)| body).collect())
    }
}

#[async_trait]
impl StoreProvider for PostgresStore {
    async fn init(&self) -> Result<()> {
        // Statements run one at a time; prepared statements reject batches.
        let schema_sql = include_str!("./sql/store_postgres.sql");
        for statement in schema_sql.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("Failed to execute schema statement", e))?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<()> {
        let body = serde_json::to_value(def).context(SerializationSnafu)?;
        sqlx::query(
            r#"
            INSERT INTO definitions (name, body) VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET body = EXCLUDED.body
            "#,
        )
        .bind(&def.name)
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to save definition", e))?;
        Ok(())
    }

    async fn get_definition(&self, name: &str) -> Result<WorkflowDefinition> {
        let row = sqlx::query_as::<_, (serde_json::Value,)>(
            "SELECT body FROM definitions WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get definition", e))?;

        let (body,) = row.ok_or_else(|| Error::DefinitionNotFound {
            name: name.to_string(),
        })?;
        serde_json::from_value(body).context(SerializationSnafu)
    }

    async fn delete_definition(&self, name: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM definitions WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to delete definition", e))?;
        if result.rows_affected() == 0 {
            return Err(Error::DefinitionNotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn save_instance(&self, instance: &WorkflowInstance) -> Result<()> {
        let id = require_id(instance)?.to_string();
        let body = serde_json::to_value(instance).context(SerializationSnafu)?;
        let saved_at = Utc::now();
        let history_id = format!("{id}_{}", saved_at.timestamp_millis());

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO instances_history (id, instance_id, saved_at, body)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&history_id)
        .bind(&id)
        .bind(saved_at)
        .bind(&body)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to append instance history", e))?;

        sqlx::query(
            r#"
            INSERT INTO instances (id, body) VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET body = EXCLUDED.body
            "#,
        )
        .bind(&id)
        .bind(&body)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to save instance", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))
    }

    async fn load_instance(&self, id: &str, rewind: usize) -> Result<WorkflowInstance> {
        if rewind == 0 {
            let row = sqlx::query_as::<_, (serde_json::Value,)>(
                "SELECT body FROM instances WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load instance", e))?;

            let (body,) = row.ok_or_else(|| Error::InstanceNotFound { id: id.to_string() })?;
            return serde_json::from_value(body).context(SerializationSnafu);
        }

        let bodies = self.history_bodies(id).await?;
        let body = rewind_index(bodies.len(), rewind, id)
            .and_then(|index| bodies.into_iter().nth(index))
            .ok_or_else(|| Error::InstanceNotFound { id: id.to_string() })?;
        serde_json::from_value(body).context(SerializationSnafu)
    }

    async fn delete_instance(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM instances_history WHERE instance_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to delete instance history", e))?;

        let result = sqlx::query("DELETE FROM instances WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to delete instance", e))?;
        if result.rows_affected() == 0 {
            return Err(Error::InstanceNotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM instances_history")
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to clear instance history", e))?;
        sqlx::query("DELETE FROM instances")
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to clear instances", e))?;
        Ok(())
    }

    async fn find_instances(&self, query: &InstanceQuery) -> Result<Vec<WorkflowInstance>> {
        let rows =
            sqlx::query_as::<_, (serde_json::Value,)>("SELECT body FROM instances ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db_error("Failed to query instances", e))?;

        let mut instances = Vec::new();
        for (body,) in rows {
            let instance: WorkflowInstance =
                serde_json::from_value(body).context(SerializationSnafu)?;
            if query.matches(&instance) {
                instances.push(instance);
            }
        }
        Ok(instances)
    }
}
