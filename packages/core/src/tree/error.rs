//! Error types for the nested-set engine
//!
//! Every structural operation reports failures as [`TreeError`]. Storage
//! failures are classified when they are wrapped: lock contention becomes
//! `Conflict` (the only retryable kind), CHECK violations become
//! `Corruption`, and a duplicate primary key becomes `InvalidArgument`.

use crate::db::DatabaseError;
use thiserror::Error;

/// Result alias used throughout the engine
pub type TreeResult<T> = Result<T, TreeError>;

/// SQLite primary result codes the engine classifies
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Errors that can occur while querying or restructuring a tree
#[derive(Error, Debug)]
pub enum TreeError {
    /// Referenced node does not exist (or is soft-deleted, for queries)
    #[error("Node '{node_id}' not found in namespace '{namespace}'")]
    NotFound { namespace: String, node_id: String },

    /// Caller supplied arguments that cannot describe a valid mutation
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Parent exists but cannot receive children
    #[error("Invalid parent '{parent_id}': {reason}")]
    InvalidParent { parent_id: String, reason: String },

    /// A subtree cannot be placed inside itself
    #[error("Cannot move node '{node_id}' relative to '{target_id}' inside its own subtree")]
    CyclicMove { node_id: String, target_id: String },

    /// Lock contention or serialization failure; the whole operation may be retried
    #[error("Write conflict during {operation}: {reason}")]
    Conflict { operation: String, reason: String },

    /// Stored boundaries violate the nested-set invariants; needs `rebuild`
    #[error("Tree '{namespace}' is corrupted: {}", .violations.join("; "))]
    Corruption {
        namespace: String,
        violations: Vec<String>,
    },

    /// The operation's cancellation signal fired
    #[error("Operation '{operation}' was cancelled")]
    Cancelled { operation: String },

    /// The operation's deadline passed
    #[error("Operation '{operation}' exceeded its deadline")]
    DeadlineExceeded { operation: String },

    /// Any other storage failure, with the operation that hit it
    #[error("Storage error during {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: libsql::Error,
    },

    /// A stored row could not be decoded
    #[error("Failed to decode row: {0}")]
    Decode(String),

    /// Opening or initializing the database failed
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl TreeError {
    /// Create a NotFound error
    pub fn not_found(namespace: &str, node_id: &str) -> Self {
        Self::NotFound {
            namespace: namespace.to_string(),
            node_id: node_id.to_string(),
        }
    }

    /// Create an InvalidArgument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create an InvalidParent error
    pub fn invalid_parent(parent_id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParent {
            parent_id: parent_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a CyclicMove error
    pub fn cyclic_move(node_id: &str, target_id: &str) -> Self {
        Self::CyclicMove {
            node_id: node_id.to_string(),
            target_id: target_id.to_string(),
        }
    }

    /// Create a Conflict error
    pub fn conflict(operation: &str, reason: impl Into<String>) -> Self {
        Self::Conflict {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a Corruption error
    pub fn corruption(namespace: &str, violations: Vec<String>) -> Self {
        Self::Corruption {
            namespace: namespace.to_string(),
            violations,
        }
    }

    pub fn cancelled(operation: &str) -> Self {
        Self::Cancelled {
            operation: operation.to_string(),
        }
    }

    pub fn deadline_exceeded(operation: &str) -> Self {
        Self::DeadlineExceeded {
            operation: operation.to_string(),
        }
    }

    /// Wrap a libsql error raised by `operation` on `namespace`, classifying it
    pub fn storage(namespace: &str, operation: impl Into<String>, source: libsql::Error) -> Self {
        let operation = operation.into();
        let message = source.to_string();

        if is_lock_contention(&source, &message) {
            return Self::Conflict {
                operation,
                reason: message,
            };
        }
        if message.contains("CHECK constraint failed") {
            return Self::Corruption {
                namespace: namespace.to_string(),
                violations: vec![format!("{} rejected: {}", operation, message)],
            };
        }
        if message.contains("UNIQUE constraint failed") && message.contains(".id") {
            return Self::InvalidArgument {
                reason: format!("duplicate node id ({})", message),
            };
        }
        if message.contains("UNIQUE constraint failed") {
            return Self::InvalidArgument { reason: message };
        }

        Self::Storage {
            context: format!("{} on '{}'", operation, namespace),
            source,
        }
    }

    /// Only `Conflict` is worth retrying; everything else fails the same way again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<anyhow::Error> for TreeError {
    fn from(err: anyhow::Error) -> Self {
        Self::Decode(format!("{:#}", err))
    }
}

fn is_lock_contention(source: &libsql::Error, message: &str) -> bool {
    if let libsql::Error::SqliteFailure(code, _) = source {
        let primary = code & 0xff;
        if primary == SQLITE_BUSY || primary == SQLITE_LOCKED {
            return true;
        }
    }
    message.contains("database is locked") || message.contains("database table is locked")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = TreeError::not_found("menus", "missing");
        assert!(matches!(err, TreeError::NotFound { .. }));
        assert_eq!(
            format!("{}", err),
            "Node 'missing' not found in namespace 'menus'"
        );
    }

    #[test]
    fn test_cyclic_move_error() {
        let err = TreeError::cyclic_move("a", "b");
        assert_eq!(
            format!("{}", err),
            "Cannot move node 'a' relative to 'b' inside its own subtree"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_corruption_lists_violations() {
        let err = TreeError::corruption(
            "menus",
            vec!["gap at 4".to_string(), "depth mismatch on x".to_string()],
        );
        assert_eq!(
            format!("{}", err),
            "Tree 'menus' is corrupted: gap at 4; depth mismatch on x"
        );
    }

    #[test]
    fn test_only_conflict_is_retryable() {
        assert!(TreeError::conflict("insert_child", "database is locked").is_retryable());
        assert!(!TreeError::cancelled("insert_child").is_retryable());
        assert!(!TreeError::deadline_exceeded("insert_child").is_retryable());
        assert!(!TreeError::invalid_argument("width must be even").is_retryable());
    }

    #[test]
    fn test_storage_classifies_busy_as_conflict() {
        let err = TreeError::storage(
            "nodes",
            "begin",
            libsql::Error::SqliteFailure(5, "database is locked".to_string()),
        );
        assert!(matches!(err, TreeError::Conflict { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_storage_classifies_constraints() {
        let check = TreeError::storage(
            "menus",
            "shift",
            libsql::Error::SqliteFailure(275, "CHECK constraint failed: lft < rgt".to_string()),
        );
        match &check {
            TreeError::Corruption {
                namespace,
                violations,
            } => {
                assert_eq!(namespace, "menus");
                assert!(violations[0].starts_with("shift rejected"));
            }
            other => panic!("expected Corruption, got {:?}", other),
        }
        assert!(format!("{}", check).starts_with("Tree 'menus' is corrupted"));

        let duplicate = TreeError::storage(
            "menus",
            "insert_child",
            libsql::Error::SqliteFailure(1555, "UNIQUE constraint failed: menus.id".to_string()),
        );
        assert!(matches!(duplicate, TreeError::InvalidArgument { .. }));
        assert!(format!("{}", duplicate).contains("duplicate node id"));
    }

    #[test]
    fn test_decode_from_anyhow() {
        let err: TreeError = anyhow::anyhow!("Failed to get lft").into();
        assert_eq!(format!("{}", err), "Failed to decode row: Failed to get lft");
    }
}
