//! Tree Node Data Structures
//!
//! This module defines `TreeNode`, the structural row of a tree namespace,
//! together with the value types the engine hands back to callers.
//!
//! # Nested-set encoding
//!
//! Every node occupies two boundary slots ([`NODE_WIDTH`]). A leaf has
//! `right = left + 1`; a node with `k` descendants spans `2 * (k + 1)` slots.
//! Live boundaries of a namespace always form the sequence `1..=2n`.
//!
//! ```text
//!  1 R 10
//!  ├─ 2 A 7
//!  │   └─ 3 B 4 ... 5 C 6
//!  └─ 8 D 9
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use libsql::Row;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Boundary slots consumed by one node
pub const NODE_WIDTH: i64 = 2;

/// Column list matching [`TreeNode::from_row`]
pub(crate) const NODE_COLUMNS: &str =
    "id, parent_id, lft, rgt, depth, ordering, created_at, updated_at, deleted_at";

/// One structural row of a tree namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    /// Unique identifier
    pub id: String,

    /// Parent node; `None` for roots
    pub parent_id: Option<String>,

    /// Left boundary
    pub left: i64,

    /// Right boundary
    pub right: i64,

    /// Number of ancestors (root = 0)
    pub depth: i64,

    /// 0-based rank among live siblings, in boundary order
    pub ordering: i64,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Soft-deletion marker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TreeNode {
    /// Number of boundary slots spanned by this node's subtree
    pub fn width(&self) -> i64 {
        self.right - self.left + 1
    }

    /// Number of descendants, computed from boundaries alone
    pub fn subtree_size(&self) -> i64 {
        (self.right - self.left - 1) / NODE_WIDTH
    }

    pub fn is_leaf(&self) -> bool {
        self.right == self.left + 1
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Strict containment: `other` is a descendant of `self`
    pub fn contains(&self, other: &TreeNode) -> bool {
        self.left < other.left && other.right < self.right
    }

    /// `other` is `self` or one of its descendants
    pub fn encloses(&self, other: &TreeNode) -> bool {
        self.left <= other.left && other.right <= self.right
    }

    /// Convert a row selected with [`NODE_COLUMNS`] into a node
    pub(crate) fn from_row(row: &Row) -> Result<Self> {
        let id: String = row.get(0).context("Failed to get id")?;
        let parent_id: Option<String> = row.get(1).context("Failed to get parent_id")?;
        let left: i64 = row.get(2).context("Failed to get lft")?;
        let right: i64 = row.get(3).context("Failed to get rgt")?;
        let depth: i64 = row.get(4).context("Failed to get depth")?;
        let ordering: i64 = row.get(5).context("Failed to get ordering")?;
        let created_at_str: String = row.get(6).context("Failed to get created_at")?;
        let updated_at_str: String = row.get(7).context("Failed to get updated_at")?;
        let deleted_at_str: Option<String> = row.get(8).context("Failed to get deleted_at")?;

        let created_at = parse_timestamp(&created_at_str).context("Failed to parse created_at")?;
        let updated_at = parse_timestamp(&updated_at_str).context("Failed to parse updated_at")?;
        let deleted_at = deleted_at_str
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .context("Failed to parse deleted_at")?;

        Ok(Self {
            id,
            parent_id,
            left,
            right,
            depth,
            ordering,
            created_at,
            updated_at,
            deleted_at,
        })
    }
}

/// Boundaries reserved by the allocator for a new span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Boundaries {
    pub left: i64,
    pub right: i64,
    pub depth: i64,
    pub ordering: i64,
}

/// Pagination window for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Page {
    /// Maximum rows to return; `None` = unbounded
    pub limit: Option<u32>,
    /// Rows to skip
    pub offset: u32,
}

impl Page {
    /// Every row
    pub fn all() -> Self {
        Self::default()
    }

    /// At most `limit` rows after skipping `offset`
    pub fn new(limit: u32, offset: u32) -> Self {
        Self {
            limit: Some(limit),
            offset,
        }
    }

    /// SQLite treats a negative LIMIT as "no limit"
    pub(crate) fn sql_limit(&self) -> i64 {
        self.limit.map(i64::from).unwrap_or(-1)
    }

    pub(crate) fn sql_offset(&self) -> i64 {
        i64::from(self.offset)
    }
}

/// Result of a structural mutation
///
/// `affected` lists every node whose structural columns changed (including
/// created and deleted ids), so callers can invalidate cache entries
/// precisely instead of flushing the namespace.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationOutcome {
    pub namespace: String,
    /// Nodes created or moved by the operation, as committed
    pub nodes: Vec<TreeNode>,
    pub affected: BTreeSet<String>,
}

impl MutationOutcome {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            ..Self::default()
        }
    }

    /// The first created/moved node, if any
    pub fn node(&self) -> Option<&TreeNode> {
        self.nodes.first()
    }

    pub fn touch<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.affected.extend(ids);
    }

    /// Fold another outcome (same namespace) into this one
    pub fn merge(&mut self, other: MutationOutcome) {
        self.nodes.extend(other.nodes);
        self.affected.extend(other.affected);
    }

    pub fn affected_ids(&self) -> Vec<String> {
        self.affected.iter().cloned().collect()
    }
}

/// Timestamp format written by the engine
pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse timestamp from database - handles both SQLite and RFC3339 formats
///
/// SQLite CURRENT_TIMESTAMP returns: "YYYY-MM-DD HH:MM:SS"
/// The engine writes RFC3339 with microseconds.
pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    Err(anyhow::anyhow!(
        "Unable to parse timestamp '{}' as SQLite or RFC3339 format",
        s
    ))
}
