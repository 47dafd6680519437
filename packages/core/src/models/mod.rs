//! Data Models
//!
//! This module contains the value types shared by the engine and its callers:
//!
//! - `TreeNode` - the structural row of a tree namespace
//! - `Boundaries` - a span reserved by the allocator
//! - `Page` - pagination window for list queries
//! - `MutationOutcome` - what a structural mutation changed

mod node;

pub use node::{Boundaries, MutationOutcome, Page, TreeNode, NODE_WIDTH};

pub(crate) use node::{now_timestamp, NODE_COLUMNS};
