//! Performance benchmarks for Arbor core operations
//!
//! Run with: `cargo bench -p arbor-core`
//!
//! These benchmarks measure critical path performance:
//! - Appending leaves under one parent (insert_child)
//! - Moving a subtree back and forth between two parents (move_subtree)
//! - Range queries over a populated namespace (descendants, path)
//! - Full validation and rebuild passes

use arbor_core::{Arbor, ArborConfig, NestedSetIndex, OpContext, Page};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::TempDir;
use tokio::runtime::Runtime;

/// Setup an index on a fresh database
async fn setup_test_index() -> (NestedSetIndex, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let arbor = Arbor::open(ArborConfig::for_path(temp_dir.path().join("bench.db")))
        .await
        .unwrap();
    let index = arbor.index("nodes").await.unwrap();
    (index, temp_dir)
}

/// Populate `fanout` top-level sections with `fanout` leaves each under one root
async fn populate(index: &NestedSetIndex, fanout: usize) {
    let ctx = OpContext::background();
    index.insert_child(&ctx, None, Some("root")).await.unwrap();
    for s in 0..fanout {
        let section = format!("s{}", s);
        index
            .insert_child(&ctx, Some("root"), Some(&section))
            .await
            .unwrap();
        for l in 0..fanout {
            index
                .insert_child(&ctx, Some(&section), Some(&format!("{}-{}", section, l)))
                .await
                .unwrap();
        }
    }
}

/// Benchmark appending children to one parent
///
/// Every append shifts the parent and the roots after it, so cost grows
/// with the number of rows to the right of the insertion point.
fn bench_insert_child(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("insert_child", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let (index, _temp) = setup_test_index().await;
                let ctx = OpContext::background();
                index.insert_child(&ctx, None, Some("parent")).await.unwrap();

                let start = std::time::Instant::now();
                for i in 0..iters {
                    let id = format!("child{}", i);
                    black_box(
                        index
                            .insert_child(&ctx, Some("parent"), Some(&id))
                            .await
                            .unwrap(),
                    );
                }
                start.elapsed()
            })
        });
    });
}

/// Benchmark moving a ten-node subtree between two sections
fn bench_move_subtree(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("move_subtree");
    group.sample_size(20);

    group.bench_function("10x10_tree", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let (index, _temp) = setup_test_index().await;
                populate(&index, 10).await;
                let ctx = OpContext::background();

                let start = std::time::Instant::now();
                for i in 0..iters {
                    let target = if i % 2 == 0 { "s9" } else { "root" };
                    black_box(
                        index
                            .move_subtree(&ctx, "s0", Some(target))
                            .await
                            .unwrap(),
                    );
                }
                start.elapsed()
            })
        });
    });

    group.finish();
}

/// Benchmark boundary-range reads
fn bench_queries(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (index, _temp) = rt.block_on(setup_test_index());
    rt.block_on(populate(&index, 20));
    let ctx = OpContext::background();

    let mut group = c.benchmark_group("queries");

    group.bench_function("descendants_of_root", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(index.descendants(&ctx, "root", Page::all()).await.unwrap())
            })
        });
    });

    group.bench_function("path_to_leaf", |b| {
        b.iter(|| rt.block_on(async { black_box(index.path(&ctx, "s19-19").await.unwrap()) }));
    });

    group.finish();
}

/// Benchmark whole-namespace maintenance passes over 421 nodes
fn bench_integrity(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (index, _temp) = rt.block_on(setup_test_index());
    rt.block_on(populate(&index, 20));
    let ctx = OpContext::background();

    let mut group = c.benchmark_group("integrity");
    group.sample_size(10);

    group.bench_function("validate", |b| {
        b.iter(|| rt.block_on(async { black_box(index.validate(&ctx).await.unwrap()) }));
    });

    group.bench_function("rebuild_clean", |b| {
        b.iter(|| rt.block_on(async { black_box(index.rebuild(&ctx).await.unwrap()) }));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_insert_child,
    bench_move_subtree,
    bench_queries,
    bench_integrity
);
criterion_main!(benches);
