//! Background reclaimer
//!
//! A single worker thread drains a many-producer queue of reclamation
//! requests. Each request names a context and a pool slot whose wrapper has
//! been dropped; the worker locks that context, removes the record and applies
//! the disposal policy. Contention is per context: the queue lock is never
//! held while a finalizer runs.
//!
//! A process-wide instance is started on first use ([`Reclaimer::global`]).
//! Tests and embedders that need deterministic teardown can start their own
//! with [`Reclaimer::start`].

use crate::context::{Disposal, ReclamationContext};
use crate::pool::SlotIndex;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tether_core::ReclaimerConfig;
use tracing::{debug, error, warn};

static GLOBAL_RECLAIMER: Lazy<Arc<Reclaimer>> =
    Lazy::new(|| Reclaimer::start(&ReclaimerConfig::default()));

/// A dropped wrapper waiting to be reclaimed
pub(crate) struct ReclaimRequest {
    pub(crate) context: ReclamationContext,
    pub(crate) slot: SlotIndex,
}

/// Reclaimer metrics snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimerStats {
    /// Requests waiting in the queue
    pub queue_depth: usize,
    /// Requests currently being processed
    pub in_flight: usize,
    /// Records whose finalizer ran on the reclaimer
    pub finalized: u64,
    /// Records moved to a deferred queue
    pub deferred: u64,
    /// Requests that ended in a fatal engine error
    pub failures: u64,
    /// Requests processed on the dropping thread after shutdown
    pub processed_inline: u64,
    /// False once shut down
    pub running: bool,
}

struct ReclaimerShared {
    queue: Mutex<VecDeque<ReclaimRequest>>,
    work_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    queue_depth: AtomicUsize,
    in_flight: AtomicUsize,
    finalized: AtomicU64,
    deferred: AtomicU64,
    failures: AtomicU64,
    processed_inline: AtomicU64,
    slow_finalizer: Option<Duration>,
}

/// Dedicated worker that frees native resources whose wrappers were dropped
pub struct Reclaimer {
    inner: Arc<ReclaimerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    thread_name: String,
}

impl Reclaimer {
    /// Start a reclaimer with its own worker thread.
    pub fn start(config: &ReclaimerConfig) -> Arc<Self> {
        let slow_finalizer = match config.slow_finalizer_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        let inner = Arc::new(ReclaimerShared {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            queue_depth: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            finalized: AtomicU64::new(0),
            deferred: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            processed_inline: AtomicU64::new(0),
            slow_finalizer,
        });

        let inner_clone = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || worker_loop(&inner_clone))
            .expect("failed to spawn reclaimer thread");
        debug!(target: "tether::reclaim", thread = %config.thread_name, "Reclaimer started");

        Arc::new(Reclaimer {
            inner,
            worker: Mutex::new(Some(handle)),
            thread_name: config.thread_name.clone(),
        })
    }

    /// The process-wide reclaimer, started on first use with default settings
    pub fn global() -> Arc<Reclaimer> {
        Arc::clone(&GLOBAL_RECLAIMER)
    }

    /// Name of the worker thread
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// Queue a dropped wrapper for reclamation.
    ///
    /// After shutdown the request is processed on the calling thread.
    pub(crate) fn enqueue(&self, request: ReclaimRequest) {
        {
            let mut queue = self.inner.queue.lock();
            if !self.inner.shutdown.load(Ordering::Acquire) {
                queue.push_back(request);
                self.inner.queue_depth.fetch_add(1, Ordering::Release);
                self.inner.work_ready.notify_one();
                return;
            }
        }

        self.inner.processed_inline.fetch_add(1, Ordering::Relaxed);
        process(&self.inner, request);
    }

    /// Block until every queued request has been processed.
    ///
    /// The worker keeps running afterwards.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while self.inner.queue_depth.load(Ordering::Acquire) > 0
            || self.inner.in_flight.load(Ordering::Acquire) > 0
        {
            self.inner.drain_cond.wait(&mut queue);
        }
    }

    /// Process what is queued, then stop and join the worker.
    ///
    /// Idempotent. Requests arriving afterwards are processed inline.
    pub fn shutdown(&self) {
        {
            // Holding the queue lock orders this store against a worker that
            // is between its shutdown check and its wait
            let _queue = self.inner.queue.lock();
            self.inner.shutdown.store(true, Ordering::Release);
            self.inner.work_ready.notify_all();
        }

        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!(target: "tether::reclaim", "Reclaimer thread terminated abnormally");
            }
            debug!(target: "tether::reclaim", "Reclaimer stopped");
        }
    }

    /// True until [`Reclaimer::shutdown`]
    pub fn is_running(&self) -> bool {
        !self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Return a snapshot of reclaimer metrics.
    pub fn stats(&self) -> ReclaimerStats {
        ReclaimerStats {
            queue_depth: self.inner.queue_depth.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.load(Ordering::Relaxed),
            finalized: self.inner.finalized.load(Ordering::Relaxed),
            deferred: self.inner.deferred.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
            processed_inline: self.inner.processed_inline.load(Ordering::Relaxed),
            running: self.is_running(),
        }
    }
}

impl std::fmt::Debug for Reclaimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reclaimer")
            .field("thread_name", &self.thread_name)
            .field("running", &self.is_running())
            .field("queue_depth", &self.inner.queue_depth.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        // The last reference can be released on the worker itself, so the
        // worker is told to stop but never joined here
        let _queue = self.inner.queue.lock();
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.work_ready.notify_all();
    }
}

/// Decrements `in_flight` and wakes drain waiters, even if processing panics.
struct InFlightGuard<'a> {
    inner: &'a ReclaimerShared,
}

impl<'a> Drop for InFlightGuard<'a> {
    fn drop(&mut self) {
        let _queue = self.inner.queue.lock();
        let prev = self.inner.in_flight.fetch_sub(1, Ordering::Release);
        if prev == 1 && self.inner.queue_depth.load(Ordering::Acquire) == 0 {
            self.inner.drain_cond.notify_all();
        }
    }
}

fn worker_loop(inner: &ReclaimerShared) {
    loop {
        let request = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(request) = queue.pop_front() {
                    inner.queue_depth.fetch_sub(1, Ordering::Release);
                    inner.in_flight.fetch_add(1, Ordering::Release);
                    break request;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = InFlightGuard { inner };
        if let Err(e) =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| process(inner, request)))
        {
            error!(
                target: "tether::reclaim",
                "reclamation panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}

fn process(inner: &ReclaimerShared, request: ReclaimRequest) {
    let started = Instant::now();
    match request.context.reclaim(request.slot) {
        Ok(Disposal::Finalized) => {
            inner.finalized.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Disposal::Deferred) => {
            inner.deferred.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Disposal::Skipped) => {}
        Err(e) => {
            inner.failures.fetch_add(1, Ordering::Relaxed);
            error!(
                target: "tether::reclaim",
                context = %request.context.id(),
                error = %e,
                "Reclamation failed"
            );
        }
    }

    if let Some(threshold) = inner.slow_finalizer {
        let elapsed = started.elapsed();
        if elapsed > threshold {
            warn!(
                target: "tether::reclaim",
                context = %request.context.id(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow reclamation"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::testing::InMemoryEngine;
    use tether_core::{NativeEngine, PoolConfig, ResourceKind};

    fn context_with(reclaimer: &Arc<Reclaimer>) -> (Arc<InMemoryEngine>, ReclamationContext) {
        let engine = Arc::new(InMemoryEngine::new());
        let context =
            ReclamationContext::new(engine.clone(), Arc::clone(reclaimer), &PoolConfig::default());
        (engine, context)
    }

    #[test]
    fn test_drop_root_is_finalized_by_worker() {
        let reclaimer = Reclaimer::start(&ReclaimerConfig::default());
        let (engine, context) = context_with(&reclaimer);
        let root = engine.open_root().unwrap();
        let resource = context.register(root, ResourceKind::Root, true).unwrap();

        drop(resource);
        reclaimer.drain();

        assert!(!engine.is_live(root.handle));
        assert!(context.is_torn_down());
        let stats = reclaimer.stats();
        assert_eq!(stats.finalized, 1);
        assert_eq!(stats.queue_depth, 0);
        assert_eq!(stats.in_flight, 0);
        reclaimer.shutdown();
    }

    #[test]
    fn test_drop_derived_is_deferred() {
        let reclaimer = Reclaimer::start(&ReclaimerConfig::default());
        let (engine, context) = context_with(&reclaimer);
        let root = engine.open_root().unwrap();
        let table = engine.open_table(root.handle, "t").unwrap();
        let _root = context.register(root, ResourceKind::Root, true).unwrap();
        let table_resource = context.register(table, ResourceKind::Table, false).unwrap();

        drop(table_resource);
        reclaimer.drain();

        assert!(engine.is_live(table.handle));
        assert_eq!(reclaimer.stats().deferred, 1);
        reclaimer.shutdown();
    }

    #[test]
    fn test_drop_after_shutdown_is_processed_inline() {
        let reclaimer = Reclaimer::start(&ReclaimerConfig::default());
        let (engine, context) = context_with(&reclaimer);
        let root = engine.open_root().unwrap();
        let resource = context.register(root, ResourceKind::Root, true).unwrap();

        reclaimer.shutdown();
        assert!(!reclaimer.is_running());
        drop(resource);

        assert!(!engine.is_live(root.handle));
        assert_eq!(reclaimer.stats().processed_inline, 1);
    }

    #[test]
    fn test_failure_is_counted_not_propagated() {
        let reclaimer = Reclaimer::start(&ReclaimerConfig::default());
        let (engine, context) = context_with(&reclaimer);
        let root = engine.open_root().unwrap();
        engine.fail_finalizer_for(root.handle);
        let resource = context.register(root, ResourceKind::Root, true).unwrap();

        drop(resource);
        reclaimer.drain();

        assert_eq!(reclaimer.stats().failures, 1);
        assert!(context.stats().poisoned);
        assert!(reclaimer.is_running());
        reclaimer.shutdown();
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let reclaimer = Reclaimer::start(&ReclaimerConfig::default());
        reclaimer.shutdown();
        reclaimer.shutdown();
        assert!(!reclaimer.stats().running);
    }

    #[test]
    fn test_drops_from_many_threads() {
        let reclaimer = Reclaimer::start(&ReclaimerConfig::default());
        let (engine, context) = context_with(&reclaimer);
        let root = engine.open_root().unwrap();
        let _root = context.register(root, ResourceKind::Root, true).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let context = context.clone();
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let table = engine.open_table(root.handle, "t").unwrap();
                        let resource = context.register(table, ResourceKind::Table, false).unwrap();
                        drop(resource);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        reclaimer.drain();
        context.drain_all_deferred().unwrap();

        assert_eq!(engine.live_handles(), 1);
        assert_eq!(engine.rejected_finalizations(), 0);
        reclaimer.shutdown();
    }
}
