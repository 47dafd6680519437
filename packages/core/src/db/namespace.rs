//! Tree Namespaces
//!
//! A tree namespace is one independently maintained hierarchy stored in its
//! own table (for example all taxonomy nodes, or all menu nodes). Table and
//! column names are interpolated into SQL, so they are validated as plain
//! identifiers when the namespace is constructed.

use crate::db::error::DatabaseError;

/// Structural columns owned by the nested-set engine
pub const STRUCTURAL_COLUMNS: [&str; 9] = [
    "id",
    "parent_id",
    "lft",
    "rgt",
    "depth",
    "ordering",
    "created_at",
    "updated_at",
    "deleted_at",
];

/// A non-structural column declared by an entity repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityColumn {
    /// Column name
    pub name: String,
    /// SQL type, e.g. `TEXT`
    pub sql_type: String,
    /// Whether a unique index is created on this column
    pub unique: bool,
}

impl EntityColumn {
    /// Nullable TEXT column
    pub fn text(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sql_type: "TEXT".to_string(),
            unique: false,
        }
    }

    /// Nullable TEXT column with a unique index
    pub fn unique_text(name: &str) -> Self {
        Self {
            unique: true,
            ..Self::text(name)
        }
    }
}

/// A validated tree namespace (one table)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNamespace {
    table: String,
    columns: Vec<EntityColumn>,
}

impl TreeNamespace {
    /// Create a namespace with only structural columns
    pub fn new(table: &str) -> Result<Self, DatabaseError> {
        validate_identifier(table)?;
        Ok(Self {
            table: table.to_string(),
            columns: Vec::new(),
        })
    }

    /// Declare an entity column owned by a repository
    pub fn with_column(mut self, column: EntityColumn) -> Result<Self, DatabaseError> {
        validate_identifier(&column.name)?;
        if STRUCTURAL_COLUMNS.contains(&column.name.as_str()) {
            return Err(DatabaseError::invalid_identifier(
                column.name,
                "name is reserved for a structural column",
            ));
        }
        if !matches!(
            column.sql_type.as_str(),
            "TEXT" | "INTEGER" | "REAL" | "BLOB"
        ) {
            return Err(DatabaseError::invalid_identifier(
                column.sql_type,
                "unsupported column type",
            ));
        }
        if self.columns.iter().any(|c| c.name == column.name) {
            return Err(DatabaseError::invalid_identifier(
                column.name,
                "column declared twice",
            ));
        }
        self.columns.push(column);
        Ok(self)
    }

    /// Table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Entity columns declared on this namespace
    pub fn columns(&self) -> &[EntityColumn] {
        &self.columns
    }

    /// `CREATE TABLE` statement for this namespace
    pub(crate) fn create_table_sql(&self) -> String {
        let entity_columns: String = self
            .columns
            .iter()
            .map(|c| format!(",\n                {} {}", c.name, c.sql_type))
            .collect();

        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                parent_id TEXT,
                lft INTEGER NOT NULL,
                rgt INTEGER NOT NULL,
                depth INTEGER NOT NULL,
                ordering INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT{entity_columns},
                CHECK (lft < rgt),
                CHECK (depth >= 0),
                FOREIGN KEY (parent_id) REFERENCES {table}(id) ON DELETE CASCADE
            )",
            table = self.table,
        )
    }

    /// `CREATE INDEX` statements: boundary range, parent pointer, tombstones,
    /// plus one unique index per unique entity column
    pub(crate) fn create_index_sql(&self) -> Vec<(String, String)> {
        let t = &self.table;
        let mut statements = vec![
            (
                format!("idx_{t}_bounds"),
                format!("CREATE INDEX IF NOT EXISTS idx_{t}_bounds ON {t}(lft, rgt)"),
            ),
            (
                format!("idx_{t}_parent"),
                format!("CREATE INDEX IF NOT EXISTS idx_{t}_parent ON {t}(parent_id)"),
            ),
            (
                format!("idx_{t}_deleted"),
                format!("CREATE INDEX IF NOT EXISTS idx_{t}_deleted ON {t}(deleted_at)"),
            ),
        ];

        for column in self.columns.iter().filter(|c| c.unique) {
            let name = format!("idx_{t}_{}", column.name);
            let sql = format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {name} ON {t}({})",
                column.name
            );
            statements.push((name, sql));
        }

        statements
    }
}

fn validate_identifier(name: &str) -> Result<(), DatabaseError> {
    let mut chars = name.chars();
    match chars.next() {
        None => return Err(DatabaseError::invalid_identifier(name, "empty")),
        Some(c) if !(c.is_ascii_alphabetic() || c == '_') => {
            return Err(DatabaseError::invalid_identifier(
                name,
                "must start with a letter or underscore",
            ))
        }
        _ => {}
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(DatabaseError::invalid_identifier(
            name,
            format!("contains '{}'", bad),
        ));
    }
    if name.len() > 64 {
        return Err(DatabaseError::invalid_identifier(name, "longer than 64 bytes"));
    }
    if name.to_ascii_lowercase().starts_with("sqlite_") {
        return Err(DatabaseError::invalid_identifier(
            name,
            "prefix 'sqlite_' is reserved",
        ));
    }
    Ok(())
}
