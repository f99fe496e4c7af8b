//! Injectable time source for the idempotency store.
//!
//! Grounded on `_idem_store_sqlite.py`'s `now_ns_fn` constructor parameter:
//! the durable store there takes its clock as an injectable function rather
//! than calling `time.time_ns()` directly, so tests can advance time without
//! sleeping. This trait is the Rust-idiomatic equivalent, passed by
//! `Arc<dyn Clock>` at construction time rather than looked up globally.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    fn now_ns(&self) -> i64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_nanos() as i64
    }
}

/// A clock whose value is set explicitly, for deterministic TTL/retention
/// tests (spec.md §8 scenario S4: advance by 5 minutes, then 6 more, then
/// 31 days, observing `seen`/`cleanup_expired` at each step).
#[derive(Debug, Clone)]
pub struct TestClock(Arc<AtomicI64>);

impl TestClock {
    pub fn new(start_ns: i64) -> Self {
        Self(Arc::new(AtomicI64::new(start_ns)))
    }

    pub fn set_ns(&self, ns: i64) {
        self.0.store(ns, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ns: i64) {
        self.0.fetch_add(delta_ns, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now_ns(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}
