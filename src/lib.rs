//! betterbot-core: microstructure feature engine, governance/SPRT, the
//! idempotency guard+store, and the order router, wired together behind
//! the pipeline spec.md §2 describes (snapshot -> features -> score ->
//! governance -> idempotent submit). HTTP surfaces, metrics export, and
//! config-file loading are external collaborators, out of scope here.

pub mod clock;
pub mod events;
pub mod features;
pub mod governance;
pub mod idempotency;
pub mod router;
pub mod scoring;
pub mod types;

pub use clock::{Clock, SystemClock, TestClock};
pub use events::{Event, EventSink, RecordingEventSink, TracingEventSink};
pub use features::{FeatureEngine, FeatureEngineConfig, FeatureError, FeatureMap};
pub use governance::{Governance, GovernanceError, SprtUpdateResult};
pub use idempotency::{IdempotencyError, IdempotencyGuard, IdempotencyRecord, IdempotencyStore, OrderStatus};
pub use router::{OrderRequest, OrderResult, OrderRouter, RouterError};
pub use scoring::{ScoreModel, ScoreOutput};
pub use types::{EdgeBreakdown, MarketSnapshot, Side, SnapshotError, Trade};

use std::sync::Arc;

use governance::alpha_ledger::AlphaSpendingLedger;

/// Convenience bundle wiring one symbol's full per-tick pipeline (spec.md
/// §2): a snapshot update through the feature engine, scored by a
/// `ScoreModel`, with governance and idempotent submission left to the
/// caller since they depend on per-decision state (which test_id, which
/// order) that a single struct can't fix in advance. This wires the
/// collaborators that *are* shared across every tick for one symbol
/// universe, the way `AppState` wires collaborators in the teacher's
/// binaries — as a plain struct of `Arc`s, not a singleton.
pub struct DecisionCore {
    pub features: Arc<FeatureEngine>,
    pub governance: Arc<Governance>,
    pub router: Arc<OrderRouter>,
}

impl DecisionCore {
    pub fn new(features: Arc<FeatureEngine>, governance: Arc<Governance>, router: Arc<OrderRouter>) -> Self {
        Self {
            features,
            governance,
            router,
        }
    }
}

/// Builds a `Governance` instance with its alpha-spending ledger from
/// plain values, following the "construct from values, not files" rule
/// the ambient configuration surface follows (no config-file loading in
/// this crate).
pub fn governance_with_ledger(
    total_alpha: f64,
    expected_n_tests: u64,
    total_tests: u64,
    policy: governance::alpha_ledger::AlphaSpendingPolicy,
    event_sink: Arc<dyn EventSink>,
) -> Governance {
    let ledger = AlphaSpendingLedger::new(total_alpha, expected_n_tests, total_tests, policy);
    Governance::new(ledger, event_sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::alpha_ledger::AlphaSpendingPolicy;
    use crate::idempotency::store::MemoryStore;
    use crate::router::{ShadowExchange, ShadowExchangeConfig};

    #[test]
    fn decision_core_wires_its_three_collaborators() {
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(0));
        let sink: Arc<dyn EventSink> = Arc::new(RecordingEventSink::new());

        let features = Arc::new(FeatureEngine::new(FeatureEngineConfig::default()));
        let governance = Arc::new(governance_with_ledger(0.05, 1, 1, AlphaSpendingPolicy::Pocock, sink.clone()));

        let store: Arc<dyn IdempotencyStore> = Arc::new(MemoryStore::new(clock.clone()));
        let guard = IdempotencyGuard::new(store, clock.clone(), sink.clone());
        let exchange = Arc::new(ShadowExchange::new(ShadowExchangeConfig::default(), clock.clone()));
        let router = Arc::new(OrderRouter::new(exchange, guard, clock));

        let core = DecisionCore::new(features, governance, router);
        assert!(Arc::strong_count(&core.features) >= 1);
    }
}
