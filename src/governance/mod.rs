//! Governance: composite SPRT tests backed by a shared alpha-spending
//! ledger, plus the static risk-gate layer. Wires spec.md §4.3's
//! per-update algorithm: fold an observation in, evaluate the boundary,
//! and on a terminal decision spend alpha and emit a governance event.

pub mod alpha_ledger;
pub mod gates;
pub mod sprt;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::events::{codes, Event, EventSink};
use alpha_ledger::AlphaSpendingLedger;
use gates::{GateConfig, GateDecision, RiskState, StaticGates};
use sprt::{Hypothesis, SprtDecision, SprtTest};

#[derive(Debug, Error, PartialEq)]
pub enum GovernanceError {
    #[error("no SPRT test registered for test_id {0}")]
    TestNotFound(String),
    #[error("alpha budget exhausted for test_id {0}; proceeding without spending")]
    BudgetExhausted(String),
}

#[derive(Debug, Clone)]
pub struct SprtUpdateResult {
    pub decision: SprtDecision,
    pub llr: f64,
    pub n_samples: u64,
    pub alpha_spent: Option<f64>,
    pub diagnostic_p_value: f64,
    pub confidence: f64,
}

pub struct Governance {
    tests: RwLock<HashMap<String, Mutex<SprtTest>>>,
    pub ledger: AlphaSpendingLedger,
    pub gates: StaticGates,
    event_sink: Arc<dyn EventSink>,
}

impl Governance {
    pub fn new(ledger: AlphaSpendingLedger, event_sink: Arc<dyn EventSink>) -> Self {
        Self {
            tests: RwLock::new(HashMap::new()),
            ledger,
            gates: StaticGates::new(),
            event_sink,
        }
    }

    pub fn register_test(&self, test_id: impl Into<String>, h0: Hypothesis, h1: Hypothesis, alpha: f64, beta: f64) {
        self.tests
            .write()
            .insert(test_id.into(), Mutex::new(SprtTest::new(h0, h1, alpha, beta)));
    }

    /// Folds one observation into the named test's running LLR. On a
    /// terminal decision, computes the bounded alpha spend and asks the
    /// ledger to record it; if the ledger refuses (budget exhausted), the
    /// decision is still returned but `alpha_spent` is `None` and the caller
    /// receives `GovernanceError::BudgetExhausted` alongside the result —
    /// the test itself is not rolled back, matching the "proceeds without
    /// spending" non-terminal-failure semantics of spec.md §7.
    pub fn update_test(
        &self,
        now_ns: i64,
        test_id: &str,
        x: f64,
        weight: f64,
        test_type: &str,
    ) -> Result<SprtUpdateResult, GovernanceError> {
        let tests = self.tests.read();
        let test_mutex = tests
            .get(test_id)
            .ok_or_else(|| GovernanceError::TestNotFound(test_id.to_string()))?;
        let mut test = test_mutex.lock();

        let decision = test.update(x, weight);
        let llr = test.llr;
        let n_samples = test.n_samples;
        let diagnostic_p_value = test.diagnostic_p_value();
        let confidence = test.confidence();

        let mut alpha_spent = None;
        let mut budget_exhausted = false;
        if let Some(requested) = test.alpha_spent() {
            let accepted = self.ledger.spend_alpha(
                now_ns,
                test_id,
                requested,
                decision,
                llr,
                n_samples,
                test_type,
            );
            budget_exhausted = !accepted;
            if accepted {
                alpha_spent = Some(requested);
            }
        }

        let code = match decision {
            SprtDecision::AcceptH0 => codes::SPRT_DECISION_H0,
            SprtDecision::AcceptH1 => codes::SPRT_DECISION_H1,
            SprtDecision::Continue => codes::SPRT_DECISION_CONTINUE,
        };
        self.event_sink.emit(Event::new(
            code,
            test_id.to_string(),
            format!("llr={llr:.4} n={n_samples}"),
        ));

        let result = SprtUpdateResult {
            decision,
            llr,
            n_samples,
            alpha_spent,
            diagnostic_p_value,
            confidence,
        };

        if budget_exhausted {
            Err(GovernanceError::BudgetExhausted(test_id.to_string()))
        } else {
            Ok(result)
        }
    }

    pub fn evaluate_gates(&self, now_ns: i64, state: &RiskState, config: &GateConfig) -> GateDecision {
        let decision = self.gates.evaluate(now_ns, state, config);
        if let Some(code) = decision.code {
            self.event_sink
                .emit(Event::new(code, "gates".to_string(), decision.reason.clone()));
        }
        decision
    }
}
