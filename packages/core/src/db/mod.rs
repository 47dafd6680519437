//! Database Layer
//!
//! This module handles all direct database setup using libsql:
//!
//! - Database initialization and connection management
//! - One table per tree namespace, created on demand
//! - Per-namespace writer locks shared by every engine handle
//!
//! Structural reads and writes against namespace tables live in
//! [`crate::tree`]; this layer only owns connections and DDL.

mod database;
mod error;
mod namespace;

pub use database::DatabaseService;
pub use error::DatabaseError;
pub use namespace::{EntityColumn, TreeNamespace, STRUCTURAL_COLUMNS};
