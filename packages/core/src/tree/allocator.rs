//! Boundary Allocator
//!
//! Reserves `width` boundary slots for a new span: at the end of the
//! namespace for a new root, or as the rightmost child of a parent. For a
//! child the gap is opened by a single range shift before the caller writes
//! its row, so the allocation must run inside the caller's transaction.

use crate::models::{Boundaries, NODE_WIDTH};
use crate::tree::error::{TreeError, TreeResult};
use crate::tree::shifter::{self, ShiftSelector};
use crate::tree::{NestedSetIndex, TreeTx};
use libsql::params;

/// Boundaries reserved for a new span, plus the rows shifted to make room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub boundaries: Boundaries,
    pub parent_id: Option<String>,
    pub shifted: Vec<String>,
}

impl NestedSetIndex {
    /// Reserve `width` slots under `parent_id` (or as a new root)
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `width` is not a positive even number
    /// - `NotFound` if the parent does not exist
    /// - `InvalidParent` if the parent is soft-deleted
    pub async fn allocate_in(
        &self,
        tx: &TreeTx,
        parent_id: Option<&str>,
        width: i64,
    ) -> TreeResult<Allocation> {
        if width <= 0 {
            return Err(TreeError::invalid_argument(format!(
                "allocation width must be positive, got {}",
                width
            )));
        }
        if width % NODE_WIDTH != 0 {
            return Err(TreeError::invalid_argument(format!(
                "allocation width must be a multiple of {}, got {}",
                NODE_WIDTH, width
            )));
        }

        let allocation = match parent_id {
            None => {
                let left = self.max_right_in(tx).await? + 1;
                let ordering = self.count_children_in(tx, None).await?;
                Allocation {
                    boundaries: Boundaries {
                        left,
                        right: left + width - 1,
                        depth: 0,
                        ordering,
                    },
                    parent_id: None,
                    shifted: Vec::new(),
                }
            }
            Some(parent_id) => {
                let parent = self.require_parent(tx, parent_id).await?;
                let ordering = self.count_children_in(tx, Some(parent_id)).await?;
                let shifted = shifter::shift(
                    tx,
                    self.table(),
                    parent.right,
                    width,
                    ShiftSelector::Both,
                )
                .await?;
                Allocation {
                    boundaries: Boundaries {
                        left: parent.right,
                        right: parent.right + width - 1,
                        depth: parent.depth + 1,
                        ordering,
                    },
                    parent_id: Some(parent.id),
                    shifted,
                }
            }
        };

        tracing::debug!(
            "Allocated [{}, {}] at depth {} in '{}'",
            allocation.boundaries.left,
            allocation.boundaries.right,
            allocation.boundaries.depth,
            self.table()
        );
        Ok(allocation)
    }

    /// Live children of `parent_id` (roots when `None`)
    pub(crate) async fn count_children_in(
        &self,
        tx: &TreeTx,
        parent_id: Option<&str>,
    ) -> TreeResult<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE deleted_at IS NULL AND parent_id IS ?1",
            self.table()
        );
        self.scalar(tx, "count_children", &sql, params![parent_id])
            .await
    }
}
