//! Durable idempotency store + the logical guard layered on top of it.
//! Grounded on `original_source/core/execution/{idempotency,idem_guard,
//! _idem_store_sqlite}.py`: a key/value store with TTL/retention semantics,
//! and a thin guard that turns "maybe duplicate" submissions into
//! "at most once observable effect" (spec.md §4.4, §4.5).

pub mod guard;
pub mod store;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use guard::IdempotencyGuard;
pub use store::{IdempotencyStore, MemoryStore, SqliteStore};

/// Order/record lifecycle status. Shared between the idempotency layer and
/// the order router since spec.md §3's terminal partial order is defined
/// over exactly this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Ack,
    Partial,
    Filled,
    Canceled,
    Rejected,
    Error,
}

impl OrderStatus {
    /// Once a record reaches one of these, spec.md §3 allows only an
    /// idempotent re-application of the same status — no regression to an
    /// earlier point in the lattice. `Error` is deliberately excluded: a
    /// timed-out submit may still be safely retried forward to a real
    /// terminal status (spec.md §4.6, §9).
    pub fn is_locked_terminal(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum IdempotencyError {
    #[error("client_order_id {coid} already has spec_hash {existing}, refusing new hash {requested}")]
    Conflict {
        coid: String,
        existing: String,
        requested: String,
    },
    #[error("client_order_id {coid} is terminal at {from:?}, refusing transition to {to:?}")]
    MonotonicityViolation {
        coid: String,
        from: OrderStatus,
        to: OrderStatus,
    },
    #[error("idempotency store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("idempotency store busy: {0}")]
    StoreBusy(String),
}

/// The logical record stored under a key, before TTL bookkeeping. Mirrors
/// the JSON envelope `idem_guard.py` writes: `{spec_hash, status, updated}`
/// plus an optional cached `result` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub spec_hash: String,
    pub status: OrderStatus,
    pub updated_ns: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_three_statuses_lock_terminal() {
        assert!(OrderStatus::Filled.is_locked_terminal());
        assert!(OrderStatus::Canceled.is_locked_terminal());
        assert!(OrderStatus::Rejected.is_locked_terminal());
        assert!(!OrderStatus::Error.is_locked_terminal());
        assert!(!OrderStatus::Pending.is_locked_terminal());
        assert!(!OrderStatus::Ack.is_locked_terminal());
        assert!(!OrderStatus::Partial.is_locked_terminal());
    }
}
