//! Mutation Engine
//!
//! Structural mutations composed from the allocator and the range shifter.
//! Each public operation is one transaction on the namespace; each has an
//! `_in` variant that runs inside a caller's [`TreeTx`] so entity writes and
//! structural writes commit together.
//!
//! Every operation returns a [`MutationOutcome`] whose `affected` set lists
//! every row whose structural columns changed.
//!
//! # Moving a subtree
//!
//! ```text
//! 1. detach     translate [lft, rgt] to [-width, -1]
//! 2. close gap  shift(rgt + 1, -width)
//! 3. reopen     shift(pivot, +width) at the target position
//! 4. attach     translate [-width, -1] to [pivot, pivot + width - 1], adjust depth
//! ```
//!
//! Detached rows sit at negative boundaries, where no shift with a positive
//! pivot can reach them.

use crate::context::OpContext;
use crate::models::{now_timestamp, MutationOutcome, TreeNode, NODE_WIDTH};
use crate::tree::error::{TreeError, TreeResult};
use crate::tree::shifter::{self, Band, ShiftSelector};
use crate::tree::{NestedSetIndex, TreeTx};
use libsql::params;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a moved subtree lands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "target")]
pub enum Placement {
    /// Rightmost child of the parent, or a new root after all others
    LastChildOf(Option<String>),
    /// Immediately before a sibling
    Before(String),
    /// Immediately after a sibling
    After(String),
}

impl Placement {
    fn anchor_id(&self) -> Option<&str> {
        match self {
            Placement::LastChildOf(parent) => parent.as_deref(),
            Placement::Before(id) | Placement::After(id) => Some(id),
        }
    }
}

/// Where the target position resolved to after the subtree was detached
struct Target {
    pivot: i64,
    parent_id: Option<String>,
    depth: i64,
}

impl NestedSetIndex {
    // ----- transaction-scoped mutations -------------------------------------

    /// Insert a leaf as the last child of `parent_id` (or as a new root)
    pub async fn insert_child_in(
        &self,
        tx: &TreeTx,
        parent_id: Option<&str>,
        id: Option<&str>,
    ) -> TreeResult<MutationOutcome> {
        let id = resolve_id(id)?;
        let allocation = self.allocate_in(tx, parent_id, NODE_WIDTH).await?;
        let b = allocation.boundaries;

        self.insert_row(tx, &id, allocation.parent_id.as_deref(), b.left, b.depth, b.ordering)
            .await?;

        let mut outcome = MutationOutcome::new(self.table());
        outcome.touch(allocation.shifted);
        outcome.touch([id.clone()]);
        outcome.nodes.push(self.require_live(tx, &id).await?);
        Ok(outcome)
    }

    /// Insert a leaf between two adjacent siblings
    ///
    /// - both `None`: a new root after every existing root
    /// - only `left`: right after `left`
    /// - only `right`: right before `right`
    /// - both: they must share a parent and be adjacent
    pub async fn insert_between_in(
        &self,
        tx: &TreeTx,
        left_sibling: Option<&str>,
        right_sibling: Option<&str>,
        id: Option<&str>,
    ) -> TreeResult<MutationOutcome> {
        let id = resolve_id(id)?;

        let (pivot, parent_id, depth) = match (left_sibling, right_sibling) {
            (None, None) => (self.max_right_in(tx).await? + 1, None, 0),
            (Some(left), None) => {
                let left = self.require_live(tx, left).await?;
                (left.right + 1, left.parent_id, left.depth)
            }
            (None, Some(right)) => {
                let right = self.require_live(tx, right).await?;
                (right.left, right.parent_id, right.depth)
            }
            (Some(left), Some(right)) => {
                let left = self.require_live(tx, left).await?;
                let right = self.require_live(tx, right).await?;
                if left.parent_id != right.parent_id {
                    return Err(TreeError::invalid_argument(format!(
                        "'{}' and '{}' do not share a parent",
                        left.id, right.id
                    )));
                }
                if left.right + 1 != right.left {
                    return Err(TreeError::invalid_argument(format!(
                        "'{}' and '{}' are not adjacent siblings",
                        left.id, right.id
                    )));
                }
                (right.left, right.parent_id, right.depth)
            }
        };

        let mut outcome = MutationOutcome::new(self.table());
        outcome.touch(
            shifter::shift(tx, self.table(), pivot, NODE_WIDTH, ShiftSelector::Both).await?,
        );
        self.insert_row(tx, &id, parent_id.as_deref(), pivot, depth, 0)
            .await?;
        outcome.touch([id.clone()]);
        outcome.touch(self.resequence_in(tx, parent_id.as_deref()).await?);
        outcome.nodes.push(self.require_live(tx, &id).await?);
        Ok(outcome)
    }

    /// Move a subtree to be the last child of `new_parent_id` (or a new root)
    pub async fn move_subtree_in(
        &self,
        tx: &TreeTx,
        node_id: &str,
        new_parent_id: Option<&str>,
    ) -> TreeResult<MutationOutcome> {
        self.move_subtree_to_in(
            tx,
            node_id,
            &Placement::LastChildOf(new_parent_id.map(str::to_string)),
        )
        .await
    }

    /// Move a subtree to an explicit placement
    pub async fn move_subtree_to_in(
        &self,
        tx: &TreeTx,
        node_id: &str,
        placement: &Placement,
    ) -> TreeResult<MutationOutcome> {
        let node = self.require_live(tx, node_id).await?;

        // Reject targets inside the moved subtree before touching anything
        if let Some(anchor_id) = placement.anchor_id() {
            let anchor = match placement {
                Placement::LastChildOf(_) => self.require_parent(tx, anchor_id).await?,
                _ => self.require_live(tx, anchor_id).await?,
            };
            if node.encloses(&anchor) {
                return Err(TreeError::cyclic_move(node_id, anchor_id));
            }
        }

        let width = node.width();
        let mut outcome = MutationOutcome::new(self.table());

        outcome.touch(
            shifter::translate(
                tx,
                self.table(),
                Band::new(node.left, node.right),
                -(node.right + 1),
                0,
            )
            .await?,
        );
        outcome.touch(
            shifter::shift(tx, self.table(), node.right + 1, -width, ShiftSelector::Both).await?,
        );

        let target = self.resolve_target(tx, placement).await?;

        outcome.touch(
            shifter::shift(tx, self.table(), target.pivot, width, ShiftSelector::Both).await?,
        );
        outcome.touch(
            shifter::translate(
                tx,
                self.table(),
                Band::new(-width, -1),
                target.pivot + width,
                target.depth - node.depth,
            )
            .await?,
        );

        if target.parent_id != node.parent_id {
            let sql = format!(
                "UPDATE {} SET parent_id = ?1, updated_at = ?2 WHERE id = ?3",
                self.table()
            );
            tx.execute(
                &sql,
                params![target.parent_id.clone(), now_timestamp(), node.id.clone()],
            )
            .await
            .map_err(|e| TreeError::storage(self.table(), "move_subtree", e))?;
            outcome.touch(self.resequence_in(tx, node.parent_id.as_deref()).await?);
        }
        outcome.touch(self.resequence_in(tx, target.parent_id.as_deref()).await?);

        tracing::debug!(
            "Moved '{}' ({} slot(s)) to {:?} in '{}'",
            node_id,
            width,
            placement,
            self.table()
        );

        outcome.nodes.push(self.require_live(tx, node_id).await?);
        Ok(outcome)
    }

    /// Hard-delete a node and its live descendants, closing the gap
    pub async fn delete_subtree_in(&self, tx: &TreeTx, node_id: &str) -> TreeResult<MutationOutcome> {
        let node = self.require_live(tx, node_id).await?;

        // Collected up front: rows removed by the parent_id cascade are not
        // reported by RETURNING
        let select = format!(
            "SELECT id FROM {} WHERE deleted_at IS NULL AND lft >= ?1 AND rgt <= ?2",
            self.table()
        );
        let rows = tx
            .query(&select, params![node.left, node.right])
            .await
            .map_err(|e| TreeError::storage(self.table(), "delete_subtree", e))?;
        let deleted = shifter::collect_ids(rows, self.table()).await?;

        let sql = format!(
            "DELETE FROM {} WHERE deleted_at IS NULL AND lft >= ?1 AND rgt <= ?2",
            self.table()
        );
        tx.execute(&sql, params![node.left, node.right])
            .await
            .map_err(|e| TreeError::storage(self.table(), "delete_subtree", e))?;

        let mut outcome = MutationOutcome::new(self.table());
        tracing::debug!(
            "Deleted {} row(s) under '{}' in '{}'",
            deleted.len(),
            node_id,
            self.table()
        );
        outcome.touch(deleted);
        outcome.touch(self.close_gap_in(tx, &node).await?);
        Ok(outcome)
    }

    /// Tombstone a node and its live descendants, closing the gap
    pub async fn soft_delete_subtree_in(
        &self,
        tx: &TreeTx,
        node_id: &str,
    ) -> TreeResult<MutationOutcome> {
        let node = self.require_live(tx, node_id).await?;

        let sql = format!(
            "UPDATE {} SET deleted_at = ?3, updated_at = ?3
             WHERE deleted_at IS NULL AND lft >= ?1 AND rgt <= ?2
             RETURNING id",
            self.table()
        );
        let rows = tx
            .query(&sql, params![node.left, node.right, now_timestamp()])
            .await
            .map_err(|e| {
                TreeError::storage(self.table(), "soft_delete_subtree", e)
            })?;
        let tombstoned = shifter::collect_ids(rows, self.table()).await?;

        let mut outcome = MutationOutcome::new(self.table());
        outcome.touch(tombstoned);
        outcome.touch(self.close_gap_in(tx, &node).await?);
        Ok(outcome)
    }

    /// Hard-delete every tombstone that no live row still points at
    pub async fn purge_deleted_in(&self, tx: &TreeTx) -> TreeResult<MutationOutcome> {
        let purgeable = format!(
            "FROM {t} WHERE deleted_at IS NOT NULL
               AND id NOT IN (
                 SELECT parent_id FROM {t} WHERE deleted_at IS NULL AND parent_id IS NOT NULL
               )",
            t = self.table()
        );
        let rows = tx
            .query(&format!("SELECT id {}", purgeable), ())
            .await
            .map_err(|e| TreeError::storage(self.table(), "purge_deleted", e))?;
        let purged = shifter::collect_ids(rows, self.table()).await?;

        tx.execute(&format!("DELETE {}", purgeable), ())
            .await
            .map_err(|e| TreeError::storage(self.table(), "purge_deleted", e))?;

        tracing::info!("Purged {} tombstone(s) from '{}'", purged.len(), self.table());
        let mut outcome = MutationOutcome::new(self.table());
        outcome.touch(purged);
        Ok(outcome)
    }

    /// Exchange the positions of two sibling subtrees
    pub async fn swap_positions_in(
        &self,
        tx: &TreeTx,
        a_id: &str,
        b_id: &str,
    ) -> TreeResult<MutationOutcome> {
        if a_id == b_id {
            return Err(TreeError::invalid_argument(format!(
                "cannot swap '{}' with itself",
                a_id
            )));
        }
        let a = self.require_live(tx, a_id).await?;
        let b = self.require_live(tx, b_id).await?;
        if a.parent_id != b.parent_id || a.encloses(&b) || b.encloses(&a) {
            return Err(TreeError::invalid_argument(format!(
                "'{}' and '{}' are not siblings",
                a_id, b_id
            )));
        }

        let (first, second) = if a.left < b.left { (a, b) } else { (b, a) };

        if first.width() == second.width() {
            let mut outcome = MutationOutcome::new(self.table());
            outcome.touch(
                shifter::swap_bands(
                    tx,
                    self.table(),
                    Band::new(first.left, first.right),
                    Band::new(second.left, second.right),
                )
                .await?,
            );
            outcome.touch(self.resequence_in(tx, first.parent_id.as_deref()).await?);
            outcome.nodes.push(self.require_live(tx, a_id).await?);
            outcome.nodes.push(self.require_live(tx, b_id).await?);
            return Ok(outcome);
        }

        // Different widths: `second` takes `first`'s slot, then `first` goes
        // where `second` used to be (before `second`'s old next sibling)
        let after_second = self.next_sibling_in(tx, &second).await?;

        let mut outcome = self
            .move_subtree_to_in(tx, &second.id, &Placement::Before(first.id.clone()))
            .await?;
        let placement = match after_second {
            Some(next) => Placement::Before(next.id),
            None => Placement::LastChildOf(first.parent_id.clone()),
        };
        outcome.merge(self.move_subtree_to_in(tx, &first.id, &placement).await?);

        outcome.nodes.clear();
        outcome.nodes.push(self.require_live(tx, a_id).await?);
        outcome.nodes.push(self.require_live(tx, b_id).await?);
        Ok(outcome)
    }

    /// Apply moves in order; later moves observe earlier ones
    pub async fn batch_move_subtrees_in(
        &self,
        tx: &TreeTx,
        moves: &[(String, Option<String>)],
    ) -> TreeResult<MutationOutcome> {
        let mut outcome = MutationOutcome::new(self.table());
        for (node_id, new_parent_id) in moves {
            outcome.merge(
                self.move_subtree_in(tx, node_id, new_parent_id.as_deref())
                    .await?,
            );
        }
        Ok(outcome)
    }

    /// Apply inserts in order; later inserts observe earlier ones
    pub async fn batch_insert_between_in(
        &self,
        tx: &TreeTx,
        pairs: &[(Option<String>, Option<String>)],
    ) -> TreeResult<MutationOutcome> {
        let mut outcome = MutationOutcome::new(self.table());
        for (left, right) in pairs {
            outcome.merge(
                self.insert_between_in(tx, left.as_deref(), right.as_deref(), None)
                    .await?,
            );
        }
        Ok(outcome)
    }

    // ----- public mutations -------------------------------------------------

    pub async fn insert_child(
        &self,
        ctx: &OpContext,
        parent_id: Option<&str>,
        id: Option<&str>,
    ) -> TreeResult<MutationOutcome> {
        let tx = ctx.run("insert_child", self.begin()).await?;
        let result = ctx
            .run("insert_child", self.insert_child_in(&tx, parent_id, id))
            .await;
        self.finish(tx, "insert_child", result).await
    }

    pub async fn insert_between(
        &self,
        ctx: &OpContext,
        left_sibling: Option<&str>,
        right_sibling: Option<&str>,
        id: Option<&str>,
    ) -> TreeResult<MutationOutcome> {
        let tx = ctx.run("insert_between", self.begin()).await?;
        let result = ctx
            .run(
                "insert_between",
                self.insert_between_in(&tx, left_sibling, right_sibling, id),
            )
            .await;
        self.finish(tx, "insert_between", result).await
    }

    pub async fn move_subtree(
        &self,
        ctx: &OpContext,
        node_id: &str,
        new_parent_id: Option<&str>,
    ) -> TreeResult<MutationOutcome> {
        let tx = ctx.run("move_subtree", self.begin()).await?;
        let result = ctx
            .run(
                "move_subtree",
                self.move_subtree_in(&tx, node_id, new_parent_id),
            )
            .await;
        self.finish(tx, "move_subtree", result).await
    }

    pub async fn move_subtree_to(
        &self,
        ctx: &OpContext,
        node_id: &str,
        placement: &Placement,
    ) -> TreeResult<MutationOutcome> {
        let tx = ctx.run("move_subtree_to", self.begin()).await?;
        let result = ctx
            .run(
                "move_subtree_to",
                self.move_subtree_to_in(&tx, node_id, placement),
            )
            .await;
        self.finish(tx, "move_subtree_to", result).await
    }

    pub async fn delete_subtree(
        &self,
        ctx: &OpContext,
        node_id: &str,
    ) -> TreeResult<MutationOutcome> {
        let tx = ctx.run("delete_subtree", self.begin()).await?;
        let result = ctx
            .run("delete_subtree", self.delete_subtree_in(&tx, node_id))
            .await;
        self.finish(tx, "delete_subtree", result).await
    }

    pub async fn soft_delete_subtree(
        &self,
        ctx: &OpContext,
        node_id: &str,
    ) -> TreeResult<MutationOutcome> {
        let tx = ctx.run("soft_delete_subtree", self.begin()).await?;
        let result = ctx
            .run(
                "soft_delete_subtree",
                self.soft_delete_subtree_in(&tx, node_id),
            )
            .await;
        self.finish(tx, "soft_delete_subtree", result).await
    }

    pub async fn purge_deleted(&self, ctx: &OpContext) -> TreeResult<MutationOutcome> {
        let tx = ctx.run("purge_deleted", self.begin()).await?;
        let result = ctx.run("purge_deleted", self.purge_deleted_in(&tx)).await;
        self.finish(tx, "purge_deleted", result).await
    }

    pub async fn swap_positions(
        &self,
        ctx: &OpContext,
        a_id: &str,
        b_id: &str,
    ) -> TreeResult<MutationOutcome> {
        let tx = ctx.run("swap_positions", self.begin()).await?;
        let result = ctx
            .run("swap_positions", self.swap_positions_in(&tx, a_id, b_id))
            .await;
        self.finish(tx, "swap_positions", result).await
    }

    /// All moves commit together or not at all
    pub async fn batch_move_subtrees(
        &self,
        ctx: &OpContext,
        moves: &[(String, Option<String>)],
    ) -> TreeResult<MutationOutcome> {
        let tx = ctx.run("batch_move_subtrees", self.begin()).await?;
        let result = ctx
            .run(
                "batch_move_subtrees",
                self.batch_move_subtrees_in(&tx, moves),
            )
            .await;
        self.finish(tx, "batch_move_subtrees", result).await
    }

    /// All inserts commit together or not at all
    pub async fn batch_insert_between(
        &self,
        ctx: &OpContext,
        pairs: &[(Option<String>, Option<String>)],
    ) -> TreeResult<MutationOutcome> {
        let tx = ctx.run("batch_insert_between", self.begin()).await?;
        let result = ctx
            .run(
                "batch_insert_between",
                self.batch_insert_between_in(&tx, pairs),
            )
            .await;
        self.finish(tx, "batch_insert_between", result).await
    }

    // ----- helpers ----------------------------------------------------------

    async fn insert_row(
        &self,
        tx: &TreeTx,
        id: &str,
        parent_id: Option<&str>,
        left: i64,
        depth: i64,
        ordering: i64,
    ) -> TreeResult<()> {
        let sql = format!(
            "INSERT INTO {} (id, parent_id, lft, rgt, depth, ordering, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            self.table()
        );
        tx.execute(
            &sql,
            params![
                id,
                parent_id,
                left,
                left + NODE_WIDTH - 1,
                depth,
                ordering,
                now_timestamp()
            ],
        )
        .await
        .map_err(|e| TreeError::storage(self.table(), "insert", e))?;
        Ok(())
    }

    /// Close the gap left by a removed subtree and resequence its siblings
    async fn close_gap_in(&self, tx: &TreeTx, removed: &TreeNode) -> TreeResult<Vec<String>> {
        let mut touched = shifter::shift(
            tx,
            self.table(),
            removed.right + 1,
            -removed.width(),
            ShiftSelector::Both,
        )
        .await?;
        touched.extend(self.resequence_in(tx, removed.parent_id.as_deref()).await?);
        Ok(touched)
    }

    /// Resolve a placement against the current (post-detach) boundaries
    async fn resolve_target(&self, tx: &TreeTx, placement: &Placement) -> TreeResult<Target> {
        match placement {
            Placement::LastChildOf(None) => Ok(Target {
                pivot: self.max_right_in(tx).await? + 1,
                parent_id: None,
                depth: 0,
            }),
            Placement::LastChildOf(Some(parent_id)) => {
                let parent = self.require_parent(tx, parent_id).await?;
                Ok(Target {
                    pivot: parent.right,
                    depth: parent.depth + 1,
                    parent_id: Some(parent.id),
                })
            }
            Placement::Before(sibling_id) => {
                let sibling = self.require_live(tx, sibling_id).await?;
                Ok(Target {
                    pivot: sibling.left,
                    parent_id: sibling.parent_id,
                    depth: sibling.depth,
                })
            }
            Placement::After(sibling_id) => {
                let sibling = self.require_live(tx, sibling_id).await?;
                Ok(Target {
                    pivot: sibling.right + 1,
                    parent_id: sibling.parent_id,
                    depth: sibling.depth,
                })
            }
        }
    }

    /// Set `ordering` to the boundary rank of each live child of `parent_id`;
    /// returns the ids whose ordering changed
    pub(crate) async fn resequence_in(
        &self,
        tx: &TreeTx,
        parent_id: Option<&str>,
    ) -> TreeResult<Vec<String>> {
        let rank = format!(
            "(SELECT COUNT(*) FROM {t} AS s
               WHERE s.deleted_at IS NULL
                 AND s.parent_id IS {t}.parent_id
                 AND s.lft < {t}.lft)",
            t = self.table()
        );
        let sql = format!(
            "UPDATE {t} SET ordering = {rank}
             WHERE deleted_at IS NULL AND parent_id IS ?1 AND ordering != {rank}
             RETURNING id",
            t = self.table(),
            rank = rank
        );
        let rows = tx
            .query(&sql, params![parent_id])
            .await
            .map_err(|e| TreeError::storage(self.table(), "resequence", e))?;
        shifter::collect_ids(rows, self.table()).await
    }
}

fn resolve_id(id: Option<&str>) -> TreeResult<String> {
    match id {
        Some(id) if id.trim().is_empty() => {
            Err(TreeError::invalid_argument("node id cannot be empty"))
        }
        Some(id) => Ok(id.to_string()),
        None => Ok(Uuid::new_v4().to_string()),
    }
}
