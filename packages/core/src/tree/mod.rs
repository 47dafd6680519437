//! Nested-Set Engine
//!
//! [`NestedSetIndex`] maintains one tree namespace. Its operations are split
//! across submodules by concern:
//!
//! - `allocator` - reserving boundaries for a new span
//! - [`shifter`] - the range updates every mutation is built from
//! - `query` - read-only boundary-comparison queries
//! - `mutation` - insert, move, delete, swap and their batch variants
//! - `integrity` - validation, rebuild and statistics
//!
//! # Transactions
//!
//! Every public mutation runs as one `IMMEDIATE` transaction while holding
//! the namespace's in-process writer lock. Callers that need to compose
//! entity writes with structural writes call [`NestedSetIndex::begin`] and
//! the `*_in` variants, then commit the returned [`TreeTx`] themselves.

mod allocator;
mod error;
mod integrity;
mod mutation;
mod query;
mod retry;
pub mod shifter;
mod transaction;

pub use allocator::Allocation;
pub use error::{TreeError, TreeResult};
pub use integrity::{OptimizeReport, PerformanceMetrics, RebuildReport, TreeStatistics};
pub use mutation::Placement;
pub use retry::{with_retry, RetryPolicy};
pub use transaction::TreeTx;

use crate::db::{DatabaseService, TreeNamespace};
use libsql::Connection;
use std::sync::Arc;

/// Engine handle bound to one tree namespace
///
/// Cheap to clone; clones share the database handle and writer locks.
#[derive(Debug, Clone)]
pub struct NestedSetIndex {
    db: Arc<DatabaseService>,
    namespace: TreeNamespace,
    retry_policy: RetryPolicy,
    max_reported_gaps: usize,
}

impl NestedSetIndex {
    pub(crate) fn new(
        db: Arc<DatabaseService>,
        namespace: TreeNamespace,
        retry_policy: RetryPolicy,
        max_reported_gaps: usize,
    ) -> Self {
        Self {
            db,
            namespace,
            retry_policy,
            max_reported_gaps,
        }
    }

    pub fn namespace(&self) -> &TreeNamespace {
        &self.namespace
    }

    /// Table backing this namespace
    pub fn table(&self) -> &str {
        self.namespace.table()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Open a write transaction on this namespace
    ///
    /// Waits for the in-process writer lock, then takes SQLite's write lock
    /// with `BEGIN IMMEDIATE`.
    pub async fn begin(&self) -> TreeResult<TreeTx> {
        let guard = self.db.namespace_lock(self.table()).lock_owned().await;
        let conn = self.db.connect_with_timeout().await?;
        TreeTx::begin(&conn, self.table(), guard).await
    }

    /// Commit on success, roll back on failure
    pub(crate) async fn finish<T>(
        &self,
        tx: TreeTx,
        operation: &str,
        result: TreeResult<T>,
    ) -> TreeResult<T> {
        match result {
            Ok(value) => {
                tx.commit().await?;
                tracing::debug!("{} committed on '{}'", operation, self.table());
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(
                        "Rollback of {} on '{}' failed: {}",
                        operation,
                        self.table(),
                        rollback_err
                    );
                }
                if err.is_retryable() {
                    tracing::warn!("{} on '{}' conflicted: {}", operation, self.table(), err);
                } else {
                    tracing::debug!("{} on '{}' rolled back: {}", operation, self.table(), err);
                }
                Err(err)
            }
        }
    }

    /// Connection for reads outside a transaction
    pub(crate) async fn reader(&self) -> TreeResult<Connection> {
        Ok(self.db.connect_with_timeout().await?)
    }
}
