//! Store Setup Errors
//!
//! Failures raised while opening the database file, preparing its
//! registry, or creating the table behind a namespace. Once a namespace is
//! open, every structural failure is a [`crate::tree::TreeError`].

use std::path::PathBuf;
use thiserror::Error;

/// Failures while opening the store or preparing a namespace
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// `ArborConfig::validate` rejected the configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The database's parent directory could not be created
    #[error("Cannot create directory {}: {source}", .path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// libsql could not open the database file
    #[error("Failed to open tree store at {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: libsql::Error,
    },

    /// Namespace name or entity column is not a safe SQL identifier
    #[error("Invalid namespace identifier '{name}': {reason}")]
    InvalidIdentifier { name: String, reason: String },

    /// A setup statement (pragma, DDL, registry access) failed
    #[error("Failed to {action}: {source}")]
    Sql {
        action: String,
        #[source]
        source: libsql::Error,
    },
}

impl DatabaseError {
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    pub fn invalid_identifier(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// `action` reads as a verb phrase, e.g. "create table 'menus'"
    pub fn sql(action: impl Into<String>, source: libsql::Error) -> Self {
        Self::Sql {
            action: action.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_invalid_identifier_message() {
        let err = DatabaseError::invalid_identifier("menus;--", "contains ';'");
        assert_eq!(
            err.to_string(),
            "Invalid namespace identifier 'menus;--': contains ';'"
        );
    }

    #[test]
    fn test_sql_keeps_libsql_source() {
        let err = DatabaseError::sql(
            "create table 'menus'",
            libsql::Error::SqliteFailure(1, "near \"TABLE\": syntax error".to_string()),
        );
        assert!(err.to_string().starts_with("Failed to create table 'menus': "));
        assert!(err.source().is_some());
    }
}
