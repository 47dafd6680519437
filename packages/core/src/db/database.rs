//! Database Connection Management
//!
//! This module provides the database connection and initialization
//! functionality using libsql for Arbor's tree namespaces.
//!
//! # Architecture
//!
//! - **Path-agnostic**: Accepts any valid PathBuf from [`ArborConfig`]
//! - **One table per namespace**: Created on demand with `CREATE TABLE IF NOT EXISTS`
//! - **WAL mode**: Write-Ahead Logging so readers never block the writer
//! - **Foreign keys**: Enabled so `parent_id` always references a row
//!
//! # Database Connection Patterns
//!
//! **ALWAYS use `connect_with_timeout()` in async functions.** The busy timeout
//! lets a writer wait for SQLite's write lock instead of failing immediately
//! with `SQLITE_BUSY`; a wait longer than the timeout surfaces as
//! `TreeError::Conflict`.
//!
//! ```no_run
//! # use arbor_core::db::DatabaseService;
//! # use arbor_core::ArborConfig;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db_service = DatabaseService::new(&ArborConfig::for_path("./data/arbor.db")).await?;
//! let conn = db_service.connect_with_timeout().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::ArborConfig;
use crate::db::error::DatabaseError;
use crate::db::namespace::TreeNamespace;
use libsql::{Builder, Database};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Per-namespace writer locks shared by every handle on one database
type NamespaceLocks = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Database service for managing the libsql connection and namespace tables
///
/// # Examples
///
/// ```no_run
/// use arbor_core::db::DatabaseService;
/// use arbor_core::ArborConfig;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db_service = DatabaseService::new(&ArborConfig::for_path("/path/to/arbor.db")).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,

    busy_timeout_ms: u64,

    namespace_locks: NamespaceLocks,
}

impl DatabaseService {
    /// Create a new DatabaseService from configuration
    ///
    /// This will:
    /// 1. Ensure the parent directory exists (create if needed)
    /// 2. Open/create the database file
    /// 3. Enable WAL mode and foreign keys
    /// 4. Create the namespace registry table
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if:
    /// - Parent directory cannot be created
    /// - Database connection fails
    /// - Schema initialization fails
    pub async fn new(config: &ArborConfig) -> Result<Self, DatabaseError> {
        let db_path = config.database_path.clone();
        let is_new_database = !db_path.exists();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| {
                    DatabaseError::CreateDirectory {
                        path: parent.to_path_buf(),
                        source,
                    }
                })?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|source| DatabaseError::Open {
                path: db_path.clone(),
                source,
            })?;

        let service = Self {
            db: Arc::new(db),
            db_path,
            busy_timeout_ms: config.busy_timeout_ms,
            namespace_locks: Arc::new(Mutex::new(HashMap::new())),
        };

        service.initialize_schema(is_new_database).await?;

        Ok(service)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of execute().
    async fn execute_pragma(
        &self,
        conn: &libsql::Connection,
        pragma: &str,
    ) -> Result<(), DatabaseError> {
        let mut stmt = conn
            .prepare(pragma)
            .await
            .map_err(|e| DatabaseError::sql(format!("execute '{}'", pragma), e))?;
        let _ = stmt
            .query(())
            .await
            .map_err(|e| DatabaseError::sql(format!("execute '{}'", pragma), e))?;
        Ok(())
    }

    /// Initialize database configuration and the namespace registry
    ///
    /// Idempotent: safe to call on an existing database.
    async fn initialize_schema(&self, is_new_database: bool) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS arbor_namespaces (
                name TEXT PRIMARY KEY,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            (),
        )
        .await
        .map_err(|e| DatabaseError::sql("create namespace registry", e))?;

        // Flush the registry for brand-new files so a second process opening
        // the same path right away sees it
        if is_new_database {
            self.execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)")
                .await?;
        }

        Ok(())
    }

    /// Create the table and indexes backing a namespace (idempotent)
    pub async fn ensure_namespace(&self, namespace: &TreeNamespace) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        let table = namespace.table();

        conn.execute(&namespace.create_table_sql(), ())
            .await
            .map_err(|e| DatabaseError::sql(format!("create table '{}'", table), e))?;

        for (name, sql) in namespace.create_index_sql() {
            conn.execute(&sql, ())
                .await
                .map_err(|e| DatabaseError::sql(format!("create index '{}'", name), e))?;
        }

        conn.execute(
            "INSERT OR IGNORE INTO arbor_namespaces (name) VALUES (?)",
            [table],
        )
        .await
        .map_err(|e| DatabaseError::sql(format!("register namespace '{}'", table), e))?;

        tracing::debug!("Namespace '{}' ready", table);
        Ok(())
    }

    /// Names of every namespace created on this database
    pub async fn list_namespaces(&self) -> Result<Vec<String>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        let mut rows = conn
            .query("SELECT name FROM arbor_namespaces ORDER BY name", ())
            .await
            .map_err(|e| DatabaseError::sql("list namespaces", e))?;

        let mut names = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql("list namespaces", e))?
        {
            names.push(
                row.get::<String>(0)
                    .map_err(|e| DatabaseError::sql("read namespace name", e))?,
            );
        }
        Ok(names)
    }

    /// Get a synchronous connection to the database
    ///
    /// **⚠️ WARNING**: no busy timeout is configured on this connection. In
    /// async functions use `connect_with_timeout()` instead.
    pub fn connect(&self) -> Result<libsql::Connection, DatabaseError> {
        self.db
            .connect()
            .map_err(|e| DatabaseError::sql("open a connection", e))
    }

    /// Get a connection with busy timeout and foreign keys configured
    ///
    /// **✅ RECOMMENDED** for all async code paths. Both pragmas are
    /// per-connection in SQLite, so they are applied on every connect.
    pub async fn connect_with_timeout(&self) -> Result<libsql::Connection, DatabaseError> {
        let conn = self.connect()?;

        self.execute_pragma(
            &conn,
            &format!("PRAGMA busy_timeout = {}", self.busy_timeout_ms),
        )
        .await?;
        self.execute_pragma(&conn, "PRAGMA foreign_keys = ON")
            .await?;

        Ok(conn)
    }

    /// The in-process writer lock for one namespace
    ///
    /// Every mutation transaction on `table` holds this lock from `BEGIN` to
    /// `COMMIT`/`ROLLBACK`. Locks are shared across clones of this service.
    pub(crate) fn namespace_lock(&self, table: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .namespace_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(table.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Checkpoint the WAL before shutdown
    pub async fn db_close(&self) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        self.execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)")
            .await?;
        Ok(())
    }
}
