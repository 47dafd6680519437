//! Arbor Core: nested-set hierarchy engine
//!
//! This crate maintains tree-shaped entities (taxonomies, menus) with the
//! nested-set model: every node stores `(left, right, depth, ordering)` so
//! that ancestry, descendance and sibling questions become range comparisons
//! instead of recursive walks.
//!
//! # Architecture
//!
//! - **libsql**: Embedded SQLite-compatible store, one table per tree namespace
//! - **Serialized writers**: Per-namespace in-process lock plus `BEGIN IMMEDIATE`
//! - **Cancellable**: Every operation takes an [`OpContext`] with a deadline
//!   and cancel signal; interrupted mutations roll back
//! - **Precise invalidation**: Mutations report exactly which rows changed
//!
//! # Modules
//!
//! - [`tree`] - The nested-set engine (allocator, shifter, queries, mutations, integrity)
//! - [`models`] - Data structures (TreeNode, Page, MutationOutcome)
//! - [`repositories`] - Taxonomy and menu repositories with entity caching
//! - [`db`] - Database layer with libsql integration
//! - [`config`] - Engine configuration
//!
//! # Example
//!
//! ```no_run
//! use arbor_core::{Arbor, ArborConfig, OpContext, Page};
//!
//! # async fn example() -> Result<(), arbor_core::TreeError> {
//! let arbor = Arbor::open(ArborConfig::for_path("./data/arbor.db")).await?;
//! let menus = arbor.index("menus").await?;
//! let ctx = OpContext::background();
//!
//! menus.insert_child(&ctx, None, Some("main")).await?;
//! menus.insert_child(&ctx, Some("main"), Some("about")).await?;
//! let _children = menus.children(&ctx, "main", Page::all()).await?;
//! # Ok(())
//! # }
//! ```

mod arbor;
pub mod config;
pub mod context;
pub mod db;
pub mod models;
pub mod repositories;
pub mod tree;

// Re-export commonly used types
pub use arbor::Arbor;
pub use config::ArborConfig;
pub use context::{CancelHandle, OpContext};
pub use models::*;
pub use tree::{NestedSetIndex, Placement, TreeError, TreeResult};
