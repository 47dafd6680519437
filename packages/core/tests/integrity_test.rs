//! Integration tests for validation and rebuild
//!
//! Tests cover:
//! - Validation of a healthy namespace
//! - Detection of corrupted boundaries
//! - Rebuild repairing corruption and reaching a fixpoint
//! - Orphans left behind by tombstoned parents
//! - Statistics and metrics over a known shape

use anyhow::Result;
use arbor_core::{Arbor, ArborConfig, NestedSetIndex, OpContext, TreeError};
use std::collections::BTreeMap;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

/// Test helper: Open an engine and seed `R(A(A1, A2), B(B1))`
async fn create_test_env() -> Result<(Arbor, NestedSetIndex, TempDir)> {
    let temp_dir = TempDir::new()?;
    let arbor = Arbor::open(ArborConfig::for_path(temp_dir.path().join("test.db"))).await?;
    let index = arbor.index("nodes").await?;

    let ctx = OpContext::background();
    index.insert_child(&ctx, None, Some("R")).await?;
    for (parent, id) in [("R", "A"), ("R", "B"), ("A", "A1"), ("A", "A2"), ("B", "B1")] {
        index.insert_child(&ctx, Some(parent), Some(id)).await?;
    }

    Ok((arbor, index, temp_dir))
}

async fn raw_execute(arbor: &Arbor, sql: &str) -> Result<()> {
    let conn = arbor.database().connect()?;
    conn.execute(sql, ()).await?;
    Ok(())
}

#[tokio::test]
async fn test_healthy_namespace_validates() -> Result<()> {
    let (_arbor, index, _temp_dir) = create_test_env().await?;
    let ctx = OpContext::background();

    assert!(index.validate(&ctx).await?.is_empty());
    assert_ok!(index.ensure_valid(&ctx).await);
    Ok(())
}

#[tokio::test]
async fn test_corruption_is_reported_and_repaired() -> Result<()> {
    let (arbor, index, _temp_dir) = create_test_env().await?;
    let ctx = OpContext::background();

    // Overlapping spans: A1 now claims A2's boundaries
    raw_execute(&arbor, "UPDATE nodes SET lft = 5, rgt = 6 WHERE id = 'A1'").await?;

    let violations = index.validate(&ctx).await?;
    assert!(!violations.is_empty());

    let err = assert_err!(index.ensure_valid(&ctx).await);
    match err {
        TreeError::Corruption { namespace, violations } => {
            assert_eq!(namespace, "nodes");
            assert!(!violations.is_empty());
        }
        other => panic!("expected Corruption, got {:?}", other),
    }

    let report = index.rebuild(&ctx).await?;
    assert_eq!(report.nodes, 6);
    assert_eq!(report.roots, 1);
    assert!(report.updated >= 1);

    assert!(index.validate(&ctx).await?.is_empty());
    let a1 = index.get(&ctx, "A1").await?.unwrap();
    assert_eq!((a1.left, a1.right, a1.depth), (3, 4, 2));
    Ok(())
}

#[tokio::test]
async fn test_rebuild_is_a_fixpoint() -> Result<()> {
    let (arbor, index, _temp_dir) = create_test_env().await?;
    let ctx = OpContext::background();

    raw_execute(&arbor, "UPDATE nodes SET depth = 7, ordering = 9 WHERE id = 'B'").await?;

    let first = index.rebuild(&ctx).await?;
    assert!(first.updated >= 1);

    let before = index.subtree(&ctx, "R").await?;
    let second = index.rebuild(&ctx).await?;
    assert_eq!(second.updated, 0, "rebuilding a valid tree changes nothing");
    assert_eq!(index.subtree(&ctx, "R").await?, before);
    Ok(())
}

#[tokio::test]
async fn test_rebuild_preserves_valid_layout() -> Result<()> {
    let (_arbor, index, _temp_dir) = create_test_env().await?;
    let ctx = OpContext::background();

    let before = index.subtree(&ctx, "R").await?;
    let report = index.rebuild(&ctx).await?;
    assert_eq!(report.updated, 0);
    assert_eq!(report.promoted_orphans, 0);
    assert_eq!(report.broken_cycles, 0);
    assert_eq!(index.subtree(&ctx, "R").await?, before);
    Ok(())
}

#[tokio::test]
async fn test_orphan_of_tombstoned_parent_is_promoted() -> Result<()> {
    let (arbor, index, _temp_dir) = create_test_env().await?;
    let ctx = OpContext::background();

    // Tombstone B alone, leaving B1 live under it
    raw_execute(
        &arbor,
        "UPDATE nodes SET deleted_at = '2026-01-01T00:00:00.000000Z' WHERE id = 'B'",
    )
    .await?;
    assert!(!index.validate(&ctx).await?.is_empty());

    let report = index.rebuild(&ctx).await?;
    assert_eq!(report.promoted_orphans, 1);
    assert_eq!(report.roots, 2);

    let b1 = index.get(&ctx, "B1").await?.unwrap();
    assert!(b1.is_root());
    assert_eq!(b1.depth, 0);
    assert!(index.validate(&ctx).await?.is_empty());

    // B is still referenced by nothing live now, so it can be purged
    let purged = index.purge_deleted(&ctx).await?;
    assert!(purged.affected.contains("B"));
    Ok(())
}

#[tokio::test]
async fn test_statistics_and_metrics() -> Result<()> {
    let (_arbor, index, _temp_dir) = create_test_env().await?;
    let ctx = OpContext::background();
    index.soft_delete_subtree(&ctx, "B").await?;

    let stats = index.tree_statistics(&ctx).await?;
    assert_eq!(stats.node_count, 4);
    assert_eq!(stats.root_count, 1);
    assert_eq!(stats.leaf_count, 2);
    assert_eq!(stats.internal_count, 2);
    assert_eq!(stats.height, 3);
    assert_eq!(stats.level_widths, BTreeMap::from([(0, 1), (1, 1), (2, 2)]));
    assert_eq!(stats.tombstone_count, 2);

    let metrics = index.performance_metrics(&ctx).await?;
    assert_eq!(metrics.node_count, 4);
    assert_eq!(metrics.violation_count, 0);

    let optimized = index.optimize(&ctx).await?;
    assert!(optimized.statistics_refreshed);
    assert!(!optimized.compacted);
    Ok(())
}
