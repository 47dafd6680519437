//! Engine entry point
//!
//! [`Arbor`] owns the database service and hands out [`NestedSetIndex`]
//! handles, one per tree namespace. Handles created from the same `Arbor`
//! share the per-namespace writer locks.

use crate::config::ArborConfig;
use crate::db::{DatabaseError, DatabaseService, TreeNamespace};
use crate::tree::{NestedSetIndex, RetryPolicy, TreeResult};
use std::sync::Arc;

/// Storage plus a factory for namespace handles
#[derive(Debug, Clone)]
pub struct Arbor {
    db: Arc<DatabaseService>,
    config: ArborConfig,
}

impl Arbor {
    /// Validate `config` and open (or create) the database it points at
    pub async fn open(config: ArborConfig) -> TreeResult<Self> {
        config
            .validate()
            .map_err(DatabaseError::invalid_config)?;

        let db = DatabaseService::new(&config).await?;
        tracing::info!("Opened tree store at {}", db.db_path.display());

        Ok(Self {
            db: Arc::new(db),
            config,
        })
    }

    /// Handle for a namespace with only structural columns, created on first use
    pub async fn index(&self, table: &str) -> TreeResult<NestedSetIndex> {
        let namespace = TreeNamespace::new(table)?;
        self.index_for(namespace).await
    }

    /// Handle for a namespace that also carries entity columns
    pub async fn index_for(&self, namespace: TreeNamespace) -> TreeResult<NestedSetIndex> {
        self.db.ensure_namespace(&namespace).await?;
        Ok(NestedSetIndex::new(
            self.db.clone(),
            namespace,
            self.retry_policy(),
            self.config.max_reported_gaps,
        ))
    }

    /// Every namespace created on this database
    pub async fn namespaces(&self) -> TreeResult<Vec<String>> {
        Ok(self.db.list_namespaces().await?)
    }

    pub fn config(&self) -> &ArborConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.config.retry_policy()
    }

    pub fn database(&self) -> &Arc<DatabaseService> {
        &self.db
    }

    /// Checkpoint the write-ahead log
    pub async fn close(&self) -> TreeResult<()> {
        self.db.db_close().await?;
        Ok(())
    }
}
