//! Write transactions on one namespace
//!
//! A [`TreeTx`] holds the namespace's in-process writer lock and an
//! `IMMEDIATE` SQLite transaction, so the database write lock is taken at
//! `BEGIN` rather than at the first write. It dereferences to
//! [`libsql::Connection`], so every query helper that accepts a connection
//! also runs inside the transaction.

use crate::tree::error::{TreeError, TreeResult};
use libsql::{Connection, Transaction, TransactionBehavior};
use std::ops::Deref;
use tokio::sync::OwnedMutexGuard;

/// An open write transaction on one tree namespace
pub struct TreeTx {
    tx: Transaction,
    namespace: String,
    _guard: OwnedMutexGuard<()>,
}

impl std::fmt::Debug for TreeTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeTx")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl TreeTx {
    /// Start an `IMMEDIATE` transaction while holding `guard`
    pub(crate) async fn begin(
        conn: &Connection,
        namespace: &str,
        guard: OwnedMutexGuard<()>,
    ) -> TreeResult<Self> {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(|e| TreeError::storage(namespace, "begin", e))?;

        Ok(Self {
            tx,
            namespace: namespace.to_string(),
            _guard: guard,
        })
    }

    /// Namespace this transaction writes to
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Commit and release the namespace lock
    pub async fn commit(self) -> TreeResult<()> {
        let namespace = self.namespace;
        self.tx
            .commit()
            .await
            .map_err(|e| TreeError::storage(&namespace, "commit", e))
    }

    /// Roll back and release the namespace lock
    pub async fn rollback(self) -> TreeResult<()> {
        let namespace = self.namespace;
        self.tx
            .rollback()
            .await
            .map_err(|e| TreeError::storage(&namespace, "rollback", e))
    }
}

impl Deref for TreeTx {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.tx
    }
}
