//! Integrity Engine
//!
//! Validation, repair and statistics for one namespace.
//!
//! `validate` never fails fast: it scans every live row once and reports
//! every violation it finds. `rebuild` recomputes all structural columns from
//! `parent_id` and is meant for operators and maintenance jobs only; request
//! paths report `Corruption` and leave repair to them.

use crate::context::OpContext;
use crate::models::{now_timestamp, TreeNode, NODE_COLUMNS};
use crate::tree::error::{TreeError, TreeResult};
use crate::tree::{NestedSetIndex, TreeTx};
use libsql::{params, Connection};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

/// Summary of a rebuild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildReport {
    pub namespace: String,
    /// Live nodes renumbered
    pub nodes: usize,
    pub roots: usize,
    /// Rows whose structural columns actually changed
    pub updated: usize,
    /// Nodes whose parent was missing or soft-deleted
    pub promoted_orphans: usize,
    /// Parent-pointer cycles broken by promoting one member to root
    pub broken_cycles: usize,
    pub duration_ms: u64,
}

/// Shape of one namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeStatistics {
    pub namespace: String,
    pub node_count: i64,
    pub root_count: i64,
    pub leaf_count: i64,
    pub internal_count: i64,
    pub height: i64,
    pub max_depth: i64,
    /// Children per internal node
    pub average_branching_factor: f64,
    /// Node count at each populated depth
    pub level_widths: BTreeMap<i64, i64>,
    pub tombstone_count: i64,
}

/// Timed scan and validation of one namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub namespace: String,
    pub node_count: usize,
    pub scan_ms: f64,
    pub validation_ms: f64,
    pub violation_count: usize,
    pub average_subtree_size: f64,
}

/// Result of `optimize`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeReport {
    pub namespace: String,
    pub statistics_refreshed: bool,
    /// Always false: live boundaries are kept contiguous by every mutation
    pub compacted: bool,
}

/// Structural columns assigned by a rebuild
#[derive(Debug, Clone, PartialEq, Eq)]
struct Placed {
    parent_id: Option<String>,
    left: i64,
    right: i64,
    depth: i64,
    ordering: i64,
}

/// Stable sibling key used by `rebuild`
fn sibling_key(a: &TreeNode, b: &TreeNode) -> Ordering {
    (a.ordering, a.created_at, &a.id).cmp(&(b.ordering, b.created_at, &b.id))
}

impl NestedSetIndex {
    async fn all_rows(&self, conn: &Connection) -> TreeResult<(Vec<TreeNode>, HashSet<String>)> {
        let sql = format!("SELECT {} FROM {} ORDER BY lft, id", NODE_COLUMNS, self.table());
        let rows = self.select_nodes(conn, "scan", &sql, ()).await?;

        let mut live = Vec::with_capacity(rows.len());
        let mut tombstones = HashSet::new();
        for node in rows {
            if node.is_deleted() {
                tombstones.insert(node.id);
            } else {
                live.push(node);
            }
        }
        Ok((live, tombstones))
    }

    // ----- validation -------------------------------------------------------

    /// Every invariant violation among live rows, as readable messages
    pub async fn validate_in(&self, conn: &Connection) -> TreeResult<Vec<String>> {
        let (live, tombstones) = self.all_rows(conn).await?;
        Ok(self.check_nodes(&live, &tombstones))
    }

    fn check_nodes(&self, live: &[TreeNode], tombstones: &HashSet<String>) -> Vec<String> {
        let mut violations = Vec::new();
        let by_id: HashMap<&str, &TreeNode> = live.iter().map(|n| (n.id.as_str(), n)).collect();

        for node in live {
            if node.right <= node.left {
                violations.push(format!(
                    "Node '{}' has non-positive width (lft={}, rgt={})",
                    node.id, node.left, node.right
                ));
            } else if (node.right - node.left) % 2 == 0 {
                violations.push(format!(
                    "Node '{}' has an even boundary difference (lft={}, rgt={})",
                    node.id, node.left, node.right
                ));
            }
            if node.left < 1 {
                violations.push(format!(
                    "Node '{}' has left boundary {} below 1",
                    node.id, node.left
                ));
            }

            match node.parent_id.as_deref() {
                None => {}
                Some(parent_id) => match by_id.get(parent_id) {
                    None if tombstones.contains(parent_id) => violations.push(format!(
                        "Node '{}' is orphaned: parent '{}' is soft-deleted",
                        node.id, parent_id
                    )),
                    None => violations.push(format!(
                        "Node '{}' is orphaned: parent '{}' does not exist",
                        node.id, parent_id
                    )),
                    Some(parent) => {
                        if !parent.contains(node) {
                            violations.push(format!(
                                "Node '{}' [{}, {}] is not contained in its parent '{}' [{}, {}]",
                                node.id,
                                node.left,
                                node.right,
                                parent.id,
                                parent.left,
                                parent.right
                            ));
                        }
                        if node.depth != parent.depth + 1 {
                            violations.push(format!(
                                "Node '{}' has depth {} but its parent '{}' has depth {}",
                                node.id, node.depth, parent.id, parent.depth
                            ));
                        }
                    }
                },
            }
        }

        // Nesting: walk in left order keeping the chain of open ancestors
        let mut open: Vec<&TreeNode> = Vec::new();
        for node in live {
            while open.last().map(|top| top.right < node.left).unwrap_or(false) {
                open.pop();
            }
            if let Some(top) = open.last() {
                if node.right > top.right {
                    violations.push(format!(
                        "Nodes '{}' [{}, {}] and '{}' [{}, {}] partially overlap",
                        top.id, top.left, top.right, node.id, node.left, node.right
                    ));
                } else if node.parent_id.as_deref() != Some(top.id.as_str())
                    && node.parent_id.as_deref().map(|p| by_id.contains_key(p)).unwrap_or(true)
                {
                    violations.push(format!(
                        "Node '{}' is enclosed by '{}' but its parent is {}",
                        node.id,
                        top.id,
                        node.parent_id
                            .as_deref()
                            .map(|p| format!("'{}'", p))
                            .unwrap_or_else(|| "none".to_string())
                    ));
                }
            } else if let Some(parent_id) = node.parent_id.as_deref() {
                if by_id.contains_key(parent_id) {
                    violations.push(format!(
                        "Node '{}' has parent '{}' but is not enclosed by any node",
                        node.id, parent_id
                    ));
                }
            }
            if node.depth != open.len() as i64 {
                violations.push(format!(
                    "Node '{}' has depth {} but {} enclosing node(s)",
                    node.id,
                    node.depth,
                    open.len()
                ));
            }
            open.push(node);
        }

        violations.extend(self.check_boundary_sequence(live));
        violations
    }

    /// Live boundaries must be exactly `1..=2n`
    fn check_boundary_sequence(&self, live: &[TreeNode]) -> Vec<String> {
        let expected_max = 2 * live.len() as i64;
        let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
        for node in live {
            *counts.entry(node.left).or_default() += 1;
            *counts.entry(node.right).or_default() += 1;
        }

        let mut issues = Vec::new();
        for (&boundary, &count) in &counts {
            if count > 1 {
                issues.push(format!("Boundary {} is used {} times", boundary, count));
            }
            if boundary < 1 || boundary > expected_max {
                issues.push(format!(
                    "Boundary {} is outside 1..={}",
                    boundary, expected_max
                ));
            }
        }
        for boundary in 1..=expected_max {
            if !counts.contains_key(&boundary) {
                issues.push(format!("Gap at boundary {}", boundary));
            }
        }

        if issues.len() > self.max_reported_gaps {
            let hidden = issues.len() - self.max_reported_gaps;
            issues.truncate(self.max_reported_gaps);
            issues.push(format!("... and {} more boundary issue(s)", hidden));
        }
        issues
    }

    pub async fn validate(&self, ctx: &OpContext) -> TreeResult<Vec<String>> {
        ctx.run("validate", async {
            let conn = self.reader().await?;
            self.validate_in(&conn).await
        })
        .await
    }

    /// `Corruption` if `validate` reports anything
    pub async fn ensure_valid(&self, ctx: &OpContext) -> TreeResult<()> {
        let violations = self.validate(ctx).await?;
        if violations.is_empty() {
            Ok(())
        } else {
            tracing::warn!(
                "Namespace '{}' failed validation with {} violation(s)",
                self.table(),
                violations.len()
            );
            Err(TreeError::corruption(self.table(), violations))
        }
    }

    // ----- rebuild ----------------------------------------------------------

    /// Recompute every live node's structural columns from `parent_id`
    pub async fn rebuild_in(&self, tx: &TreeTx) -> TreeResult<RebuildReport> {
        let started = Instant::now();
        let (live, _) = self.all_rows(tx).await?;
        let by_id: HashMap<&str, &TreeNode> = live.iter().map(|n| (n.id.as_str(), n)).collect();

        // Orphans (missing, soft-deleted or self parent) become roots
        let mut promoted_orphans = 0;
        let mut children: HashMap<Option<&str>, Vec<&TreeNode>> = HashMap::new();
        for node in &live {
            let parent = match node.parent_id.as_deref() {
                Some(p) if p != node.id && by_id.contains_key(p) => Some(p),
                Some(_) => {
                    promoted_orphans += 1;
                    None
                }
                None => None,
            };
            children.entry(parent).or_default().push(node);
        }
        for siblings in children.values_mut() {
            siblings.sort_by(|a, b| sibling_key(a, b));
        }

        let mut placed: HashMap<&str, Placed> = HashMap::with_capacity(live.len());
        let mut counter = 0i64;
        let mut root_count = 0i64;

        let roots: Vec<&TreeNode> = children.get(&None).cloned().unwrap_or_default();
        for root in roots {
            place_subtree(root, root_count, &children, &mut placed, &mut counter);
            root_count += 1;
        }

        // Whatever is left hangs off a parent-pointer cycle
        let mut broken_cycles = 0;
        while placed.len() < live.len() {
            let Some(start) = live
                .iter()
                .filter(|n| !placed.contains_key(n.id.as_str()))
                .min_by(|a, b| sibling_key(a, b))
            else {
                break;
            };
            let promoted = lowest_cycle_member(start, &by_id);
            tracing::warn!(
                "Breaking parent cycle in '{}' by promoting '{}' to root",
                self.table(),
                promoted.id
            );
            place_subtree(promoted, root_count, &children, &mut placed, &mut counter);
            root_count += 1;
            broken_cycles += 1;
        }

        let sql = format!(
            "UPDATE {} SET parent_id = ?1, lft = ?2, rgt = ?3, depth = ?4, ordering = ?5,
                 updated_at = ?6
             WHERE id = ?7",
            self.table()
        );
        let now = now_timestamp();
        let mut updated = 0;
        for node in &live {
            let Some(target) = placed.get(node.id.as_str()) else {
                continue;
            };
            let unchanged = node.parent_id == target.parent_id
                && node.left == target.left
                && node.right == target.right
                && node.depth == target.depth
                && node.ordering == target.ordering;
            if unchanged {
                continue;
            }
            tx.execute(
                &sql,
                params![
                    target.parent_id.clone(),
                    target.left,
                    target.right,
                    target.depth,
                    target.ordering,
                    now.clone(),
                    node.id.clone()
                ],
            )
            .await
            .map_err(|e| TreeError::storage(self.table(), "rebuild", e))?;
            updated += 1;
        }

        let report = RebuildReport {
            namespace: self.table().to_string(),
            nodes: live.len(),
            roots: root_count as usize,
            updated,
            promoted_orphans,
            broken_cycles,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            "Rebuilt '{}': {} node(s), {} updated, {} orphan(s) promoted, {} cycle(s) broken",
            report.namespace,
            report.nodes,
            report.updated,
            report.promoted_orphans,
            report.broken_cycles
        );
        Ok(report)
    }

    /// Maintenance only: renumbers the whole namespace in one transaction
    pub async fn rebuild(&self, ctx: &OpContext) -> TreeResult<RebuildReport> {
        let tx = ctx.run("rebuild", self.begin()).await?;
        let result = ctx.run("rebuild", self.rebuild_in(&tx)).await;
        self.finish(tx, "rebuild", result).await
    }

    // ----- maintenance and statistics ---------------------------------------

    /// Refresh the query planner's statistics; never changes structure
    pub async fn optimize(&self, ctx: &OpContext) -> TreeResult<OptimizeReport> {
        ctx.run("optimize", async {
            let conn = self.reader().await?;
            let mut rows = conn
                .query("PRAGMA optimize", ())
                .await
                .map_err(|e| TreeError::storage(self.table(), "optimize", e))?;
            while rows
                .next()
                .await
                .map_err(|e| TreeError::storage(self.table(), "optimize", e))?
                .is_some()
            {}

            tracing::info!("Optimized '{}': statistics refreshed, no compaction needed", self.table());
            Ok(OptimizeReport {
                namespace: self.table().to_string(),
                statistics_refreshed: true,
                compacted: false,
            })
        })
        .await
    }

    pub async fn tree_statistics_in(&self, conn: &Connection) -> TreeResult<TreeStatistics> {
        let t = self.table();
        let node_count = self.node_count_in(conn).await?;
        let root_count = self
            .scalar(
                conn,
                "root_count",
                &format!("SELECT COUNT(*) FROM {t} WHERE deleted_at IS NULL AND parent_id IS NULL"),
                (),
            )
            .await?;
        let leaf_count = self
            .scalar(
                conn,
                "leaf_count",
                &format!("SELECT COUNT(*) FROM {t} WHERE deleted_at IS NULL AND rgt = lft + 1"),
                (),
            )
            .await?;
        let tombstone_count = self
            .scalar(
                conn,
                "tombstone_count",
                &format!("SELECT COUNT(*) FROM {t} WHERE deleted_at IS NOT NULL"),
                (),
            )
            .await?;
        let height = self.tree_height_in(conn).await?;

        let mut level_widths = BTreeMap::new();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT depth, COUNT(*) FROM {t} WHERE deleted_at IS NULL
                     GROUP BY depth ORDER BY depth"
                ),
                (),
            )
            .await
            .map_err(|e| TreeError::storage(t, "level widths", e))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| TreeError::storage(t, "level widths", e))?
        {
            let depth: i64 = row
                .get(0)
                .map_err(|e| TreeError::storage(t, "level widths", e))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| TreeError::storage(t, "level widths", e))?;
            level_widths.insert(depth, count);
        }

        let internal_count = node_count - leaf_count;
        let average_branching_factor = if internal_count > 0 {
            (node_count - root_count) as f64 / internal_count as f64
        } else {
            0.0
        };

        Ok(TreeStatistics {
            namespace: t.to_string(),
            node_count,
            root_count,
            leaf_count,
            internal_count,
            height,
            max_depth: (height - 1).max(0),
            average_branching_factor,
            level_widths,
            tombstone_count,
        })
    }

    pub async fn tree_statistics(&self, ctx: &OpContext) -> TreeResult<TreeStatistics> {
        ctx.run("tree_statistics", async {
            let conn = self.reader().await?;
            self.tree_statistics_in(&conn).await
        })
        .await
    }

    /// Time a full scan and a validation pass
    pub async fn performance_metrics(&self, ctx: &OpContext) -> TreeResult<PerformanceMetrics> {
        ctx.run("performance_metrics", async {
            let conn = self.reader().await?;

            let scan_started = Instant::now();
            let (live, tombstones) = self.all_rows(&conn).await?;
            let scan_ms = scan_started.elapsed().as_secs_f64() * 1000.0;

            let validation_started = Instant::now();
            let violations = self.check_nodes(&live, &tombstones);
            let validation_ms = validation_started.elapsed().as_secs_f64() * 1000.0;

            let average_subtree_size = if live.is_empty() {
                0.0
            } else {
                live.iter().map(|n| n.subtree_size()).sum::<i64>() as f64 / live.len() as f64
            };

            Ok(PerformanceMetrics {
                namespace: self.table().to_string(),
                node_count: live.len(),
                scan_ms,
                validation_ms,
                violation_count: violations.len(),
                average_subtree_size,
            })
        })
        .await
    }
}

/// Pre-order walk from `root`, assigning contiguous boundaries
fn place_subtree<'a>(
    root: &'a TreeNode,
    root_ordering: i64,
    children: &HashMap<Option<&'a str>, Vec<&'a TreeNode>>,
    placed: &mut HashMap<&'a str, Placed>,
    counter: &mut i64,
) {
    if placed.contains_key(root.id.as_str()) {
        return;
    }

    // (node id, next child index, children placed so far)
    let mut stack: Vec<(&'a str, usize, i64)> = Vec::new();
    *counter += 1;
    placed.insert(
        root.id.as_str(),
        Placed {
            parent_id: None,
            left: *counter,
            right: 0,
            depth: 0,
            ordering: root_ordering,
        },
    );
    stack.push((root.id.as_str(), 0, 0));

    while let Some(frame) = stack.last_mut() {
        let (id, next, _) = *frame;
        let kids = children.get(&Some(id)).map(Vec::as_slice).unwrap_or(&[]);
        let unvisited = kids[next.min(kids.len())..]
            .iter()
            .position(|kid| !placed.contains_key(kid.id.as_str()));

        match unvisited {
            Some(offset) => {
                let kid = kids[next + offset];
                frame.1 = next + offset + 1;
                let ordering = frame.2;
                frame.2 += 1;

                let depth = stack.len() as i64;
                *counter += 1;
                placed.insert(
                    kid.id.as_str(),
                    Placed {
                        parent_id: Some(id.to_string()),
                        left: *counter,
                        right: 0,
                        depth,
                        ordering,
                    },
                );
                stack.push((kid.id.as_str(), 0, 0));
            }
            None => {
                *counter += 1;
                if let Some(entry) = placed.get_mut(id) {
                    entry.right = *counter;
                }
                stack.pop();
            }
        }
    }
}

/// Follow parent pointers from `start` until a node repeats, then return the
/// lowest-keyed member of that cycle
fn lowest_cycle_member<'a>(start: &'a TreeNode, by_id: &HashMap<&str, &'a TreeNode>) -> &'a TreeNode {
    let mut seen: Vec<&'a TreeNode> = Vec::new();
    let mut current = start;
    loop {
        if let Some(pos) = seen.iter().position(|n| n.id == current.id) {
            return seen[pos..]
                .iter()
                .copied()
                .min_by(|a, b| sibling_key(a, b))
                .unwrap_or(current);
        }
        seen.push(current);
        match current.parent_id.as_deref().and_then(|p| by_id.get(p)) {
            Some(parent) => current = parent,
            None => return start,
        }
    }
}
