//! Integration tests for concurrent writers, cancellation and deadlines
//!
//! Tests cover:
//! - Concurrent inserts through cloned handles
//! - Writers on separate engine instances sharing one database file
//! - Deadlines and cancellation while waiting for the writer lock
//! - Caller-managed transactions

use anyhow::Result;
use arbor_core::tree::with_retry;
use arbor_core::{Arbor, ArborConfig, NestedSetIndex, OpContext, Page, TreeError};
use std::time::Duration;
use tempfile::TempDir;

/// Test helper: Open an engine with one root node
async fn create_test_env() -> Result<(Arbor, NestedSetIndex, TempDir)> {
    let temp_dir = TempDir::new()?;
    let arbor = Arbor::open(ArborConfig::for_path(temp_dir.path().join("test.db"))).await?;
    let index = arbor.index("nodes").await?;
    index
        .insert_child(&OpContext::background(), None, Some("root"))
        .await?;
    Ok((arbor, index, temp_dir))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_inserts_keep_tree_valid() -> Result<()> {
    let (_arbor, index, _temp_dir) = create_test_env().await?;

    let mut handles = Vec::new();
    for worker in 0..8 {
        let index = index.clone();
        handles.push(tokio::spawn(async move {
            let ctx = OpContext::with_timeout(Duration::from_secs(30));
            for i in 0..5 {
                let id = format!("w{}-{}", worker, i);
                index.insert_child(&ctx, Some("root"), Some(&id)).await?;
            }
            Ok::<_, TreeError>(())
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let ctx = OpContext::background();
    assert_eq!(index.node_count(&ctx).await?, 41);
    assert_eq!(index.children(&ctx, "root", Page::all()).await?.len(), 40);
    assert!(index.validate(&ctx).await?.is_empty());

    let root = index.get(&ctx, "root").await?.unwrap();
    assert_eq!((root.left, root.right), (1, 82));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_separate_engines_share_one_file() -> Result<()> {
    let (_arbor, index, temp_dir) = create_test_env().await?;

    // A second engine has its own in-process locks; SQLite serializes the two
    let other = Arbor::open(ArborConfig::for_path(temp_dir.path().join("test.db"))).await?;
    let other_index = other.index("nodes").await?;

    let spawn_writer = |index: NestedSetIndex, prefix: &'static str| {
        tokio::spawn(async move {
            let ctx = OpContext::background();
            for i in 0..5 {
                let id = format!("{}-{}", prefix, i);
                with_retry(index.retry_policy(), "insert_child", || {
                    index.insert_child(&ctx, Some("root"), Some(&id))
                })
                .await?;
            }
            Ok::<_, TreeError>(())
        })
    };

    let first = spawn_writer(index.clone(), "a");
    let second = spawn_writer(other_index, "b");
    first.await??;
    second.await??;

    let ctx = OpContext::background();
    assert_eq!(index.node_count(&ctx).await?, 11);
    assert!(index.validate(&ctx).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_deadline_while_waiting_for_writer() -> Result<()> {
    let (_arbor, index, _temp_dir) = create_test_env().await?;

    // Hold the namespace's writer lock with an open transaction
    let tx = index.begin().await?;

    let ctx = OpContext::with_timeout(Duration::from_millis(50));
    let err = index
        .insert_child(&ctx, Some("root"), Some("late"))
        .await
        .unwrap_err();
    assert!(matches!(err, TreeError::DeadlineExceeded { .. }));

    tx.rollback().await?;

    let ctx = OpContext::background();
    assert!(index.get(&ctx, "late").await?.is_none());
    assert!(index.validate(&ctx).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_cancel_while_waiting_for_writer() -> Result<()> {
    let (_arbor, index, _temp_dir) = create_test_env().await?;
    let tx = index.begin().await?;

    let (ctx, handle) = OpContext::cancellable();
    let waiting = {
        let index = index.clone();
        tokio::spawn(async move { index.insert_child(&ctx, Some("root"), Some("never")).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.cancel();
    let err = waiting.await?.unwrap_err();
    assert!(matches!(err, TreeError::Cancelled { .. }));

    tx.rollback().await?;
    assert!(index
        .get(&OpContext::background(), "never")
        .await?
        .is_none());
    Ok(())
}

#[tokio::test]
async fn test_already_cancelled_context_does_nothing() -> Result<()> {
    let (_arbor, index, _temp_dir) = create_test_env().await?;

    let (ctx, handle) = OpContext::cancellable();
    handle.cancel();
    let err = index
        .insert_child(&ctx, Some("root"), Some("skipped"))
        .await
        .unwrap_err();
    assert!(matches!(err, TreeError::Cancelled { .. }));

    let err = index.node_count(&ctx).await.unwrap_err();
    assert!(matches!(err, TreeError::Cancelled { .. }));
    assert_eq!(index.node_count(&OpContext::background()).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_caller_managed_transaction() -> Result<()> {
    let (_arbor, index, _temp_dir) = create_test_env().await?;
    let ctx = OpContext::background();

    // Rolled back: nothing sticks
    let tx = index.begin().await?;
    index.insert_child_in(&tx, Some("root"), Some("a")).await?;
    index.insert_child_in(&tx, Some("a"), Some("a1")).await?;
    tx.rollback().await?;
    assert!(index.get(&ctx, "a").await?.is_none());

    // Committed: both inserts land together
    let tx = index.begin().await?;
    index.insert_child_in(&tx, Some("root"), Some("a")).await?;
    index.insert_child_in(&tx, Some("a"), Some("a1")).await?;
    tx.commit().await?;

    assert_eq!(index.subtree_size(&ctx, "root").await?, 2);
    assert!(index.validate(&ctx).await?.is_empty());
    Ok(())
}
