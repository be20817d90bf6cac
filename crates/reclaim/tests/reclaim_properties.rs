//! Property and concurrency tests for tether-reclaim
//!
//! These tests check the lifecycle guarantees over many interleavings:
//!
//! 1. **Exactly once** - every registered handle is finalized once, never twice
//! 2. **Pool bound** - slots in use track the peak of live wrappers
//! 3. **Root ordering** - no derived resource is finalized by the reclaimer
//!    while its root is open
//! 4. **Cross-thread drops** - wrappers dropped on other threads are reclaimed

use proptest::prelude::*;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;
use tether_core::testing::InMemoryEngine;
use tether_core::{NativeEngine, PoolConfig, ReclaimerConfig, ResourceKind};
use tether_reclaim::{
    NativeResource, Reclaimer, ReclamationContext, RecordPool, ReferenceRecord, SlotIndex,
};

static_assertions::assert_impl_all!(ReclamationContext: Send, Sync, Clone);
static_assertions::assert_impl_all!(Reclaimer: Send, Sync);
static_assertions::assert_impl_all!(NativeResource: Send);

// ============================================================================
// Test Helpers
// ============================================================================

fn setup() -> (Arc<InMemoryEngine>, Arc<Reclaimer>, ReclamationContext) {
    let engine = Arc::new(InMemoryEngine::new());
    let reclaimer = Reclaimer::start(&ReclaimerConfig::default());
    let context =
        ReclamationContext::new(engine.clone(), Arc::clone(&reclaimer), &PoolConfig::default());
    (engine, reclaimer, context)
}

fn record(raw: i64) -> ReferenceRecord {
    ReferenceRecord {
        handle: tether_core::NativeHandle::new(raw),
        finalizer: tether_core::FinalizerId::new(1),
        kind: ResourceKind::Row,
        is_root: false,
    }
}

#[derive(Debug, Clone)]
enum PoolOp {
    Insert,
    Remove(usize),
}

fn pool_op() -> impl Strategy<Value = PoolOp> {
    prop_oneof![Just(PoolOp::Insert), (0usize..64).prop_map(PoolOp::Remove)]
}

// ============================================================================
// SECTION 1: Pool Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_pool_capacity_is_peak_live(ops in prop::collection::vec(pool_op(), 1..300)) {
        let mut pool = RecordPool::new();
        let mut live: Vec<SlotIndex> = Vec::new();
        let mut peak = 0usize;
        let mut next = 0i64;

        for op in ops {
            match op {
                PoolOp::Insert => {
                    next += 1;
                    live.push(pool.insert(record(next)));
                }
                PoolOp::Remove(i) if !live.is_empty() => {
                    let slot = live.swap_remove(i % live.len());
                    prop_assert!(pool.remove(slot).is_some());
                    prop_assert!(pool.remove(slot).is_none());
                }
                PoolOp::Remove(_) => {}
            }
            peak = peak.max(live.len());
            prop_assert_eq!(pool.len(), live.len());
            prop_assert_eq!(pool.capacity(), peak);
        }

        let mut listed: Vec<SlotIndex> = pool.iter().map(|(slot, _)| slot).collect();
        listed.sort();
        live.sort();
        prop_assert_eq!(listed, live);
    }

    #[test]
    fn prop_every_handle_finalized_once(
        kinds in prop::collection::vec(0usize..3, 1..40),
        seed in any::<u64>(),
    ) {
        let (engine, reclaimer, context) = setup();
        let root = engine.open_root().unwrap();
        let table = engine.open_table(root.handle, "t").unwrap();
        let mut root_resource = context.register(root, ResourceKind::Root, true).unwrap();
        let table_resource = context.register(table, ResourceKind::Table, false).unwrap();

        let mut resources = Vec::new();
        for k in kinds {
            match k {
                0 => {
                    let results = engine.table_results(table.handle).unwrap();
                    resources.push(context.register(results, ResourceKind::Results, false).unwrap());
                }
                1 => {
                    let other = engine.open_table(root.handle, "t").unwrap();
                    resources.push(context.register(other, ResourceKind::Table, false).unwrap());
                }
                _ => {
                    let results = engine.table_results(table.handle).unwrap();
                    let snapshot = engine.create_snapshot(results.handle).unwrap();
                    resources.push(context.register(results, ResourceKind::Results, false).unwrap());
                    resources.push(context.register(snapshot, ResourceKind::Snapshot, false).unwrap());
                }
            }
        }
        prop_assert_eq!(engine.live_handles(), resources.len() + 2);

        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        resources.shuffle(&mut rng);
        let keep = rng.gen_range(0..=resources.len());
        let kept: Vec<_> = resources.drain(..keep).collect();
        drop(resources);
        reclaimer.drain();

        // The root is still open: nothing may be freed yet
        prop_assert!(engine.finalized().is_empty());

        root_resource.close().unwrap();
        drop(kept);
        drop(table_resource);
        reclaimer.drain();

        prop_assert_eq!(engine.live_handles(), 0);
        prop_assert_eq!(engine.rejected_finalizations(), 0);
        prop_assert!(context.is_torn_down());
        prop_assert_eq!(context.stats().deferred, 0);
        reclaimer.shutdown();
    }
}

// ============================================================================
// SECTION 2: Ordering Against The Root
// ============================================================================

#[test]
fn test_reclaimer_never_frees_derived_before_root_closes() {
    let (engine, reclaimer, context) = setup();
    let root = engine.open_root().unwrap();
    let root_resource = context.register(root, ResourceKind::Root, true).unwrap();

    let mut handles = Vec::new();
    for _ in 0..100 {
        let table = engine.open_table(root.handle, "t").unwrap();
        handles.push(table.handle);
        // Dropped straight away; the next registration of the kind drains it
        drop(context.register(table, ResourceKind::Table, false).unwrap());
        reclaimer.drain();
    }

    // All but the last were drained by the following registration
    assert_eq!(engine.finalized_of(ResourceKind::Table).len(), 99);
    assert!(engine.is_live(*handles.last().unwrap()));
    assert_eq!(context.stats().deferred, 1);

    drop(root_resource);
    reclaimer.drain();
    assert_eq!(engine.live_handles(), 0);
    assert_eq!(engine.rejected_finalizations(), 0);
    reclaimer.shutdown();
}

// ============================================================================
// SECTION 3: Cross-Thread Drops
// ============================================================================

#[test]
fn test_wrappers_dropped_on_other_threads() {
    let (engine, reclaimer, context) = setup();
    let root = engine.open_root().unwrap();
    let root_resource = context.register(root, ResourceKind::Root, true).unwrap();

    let mut batches: Vec<Vec<NativeResource>> = (0..4).map(|_| Vec::new()).collect();
    for i in 0..200 {
        let table = engine.open_table(root.handle, "t").unwrap();
        let results = engine.table_results(table.handle).unwrap();
        batches[i % 4].push(context.register(table, ResourceKind::Table, false).unwrap());
        batches[i % 4].push(context.register(results, ResourceKind::Results, false).unwrap());
    }

    let workers: Vec<_> = batches
        .into_iter()
        .map(|batch| thread::spawn(move || drop(batch)))
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    reclaimer.drain();

    assert_eq!(context.stats().live_records, 1);
    assert_eq!(context.stats().deferred, 400);
    assert_eq!(engine.live_handles(), 401);

    drop(root_resource);
    reclaimer.drain();
    assert_eq!(engine.live_handles(), 0);
    assert_eq!(engine.rejected_finalizations(), 0);
    assert_eq!(reclaimer.stats().failures, 0);
    reclaimer.shutdown();
}

#[test]
fn test_global_reclaimer_is_shared() {
    let a = Reclaimer::global();
    let b = Reclaimer::global();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(a.is_running());
}
