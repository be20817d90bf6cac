//! Shared test utilities for the integration test suites.
//!
//! Import via `mod common;` from any test file.

#![allow(dead_code)]

use std::sync::{Arc, Once};
use tether::testing::InMemoryEngine;
use tether::{Reclaimer, ReclaimerConfig, Session, SessionOptions};

static INIT_TRACING: Once = Once::new();

/// Install a fmt subscriber once per test binary; honours `RUST_LOG`.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Engine, dedicated reclaimer and an open session over them.
///
/// Call `reclaimer.drain()` before asserting on engine handle counts.
pub struct TestEnv {
    pub engine: Arc<InMemoryEngine>,
    pub reclaimer: Arc<Reclaimer>,
    pub session: Session,
}

impl TestEnv {
    pub fn new() -> Self {
        init_tracing();
        let engine = Arc::new(InMemoryEngine::new());
        let reclaimer = Reclaimer::start(&ReclaimerConfig::default());
        let session = Session::open_with(
            engine.clone(),
            SessionOptions::new().with_reclaimer(Arc::clone(&reclaimer)),
        )
        .unwrap();
        TestEnv {
            engine,
            reclaimer,
            session,
        }
    }

    /// Commit `count` new rows to `table`
    pub fn seed(&self, table: &str, count: usize) {
        let table = self.session.table(table).unwrap();
        self.session.begin_transaction().unwrap();
        for _ in 0..count {
            table.add_row().unwrap();
        }
        self.session.commit_transaction().unwrap();
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        self.reclaimer.shutdown();
    }
}
