//! Family-wise alpha-spending ledger shared across all SPRT tests.
//! Grounded on `original_source/core/governance/composite_sprt.py`'s
//! `AlphaSpendingLedger`.

use parking_lot::Mutex;

use super::sprt::SprtDecision;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaSpendingPolicy {
    Pocock,
    ObrienFleming,
    BhFdr,
}

#[derive(Debug, Clone)]
pub struct AlphaLedgerEntry {
    pub ts_ns: i64,
    pub test_id: String,
    pub policy: AlphaSpendingPolicy,
    pub alpha_spent: f64,
    pub cumulative_alpha: f64,
    pub decision: SprtDecision,
    pub llr: f64,
    pub n_observations: u64,
    pub test_type: String,
}

/// A single mutex guards the cumulative total so `spend_alpha` is atomic
/// under concurrent tests (spec.md §5). Arrival order under the lock decides
/// which test's spend lands first when two tests terminate at once.
pub struct AlphaSpendingLedger {
    pub total_alpha: f64,
    pub expected_n_tests: u64,
    pub total_tests: u64,
    pub policy: AlphaSpendingPolicy,
    state: Mutex<LedgerState>,
}

struct LedgerState {
    cumulative_alpha: f64,
    entries: Vec<AlphaLedgerEntry>,
    test_rank: std::collections::HashMap<String, u64>,
    next_rank: u64,
}

impl AlphaSpendingLedger {
    pub fn new(total_alpha: f64, expected_n_tests: u64, total_tests: u64, policy: AlphaSpendingPolicy) -> Self {
        Self {
            total_alpha,
            expected_n_tests,
            total_tests,
            policy,
            state: Mutex::new(LedgerState {
                cumulative_alpha: 0.0,
                entries: Vec::new(),
                test_rank: std::collections::HashMap::new(),
                next_rank: 0,
            }),
        }
    }

    fn allowed_for_rank(&self, rank: u64) -> f64 {
        match self.policy {
            AlphaSpendingPolicy::Pocock => {
                if self.expected_n_tests == 0 {
                    self.total_alpha
                } else {
                    self.total_alpha / self.expected_n_tests as f64
                }
            }
            AlphaSpendingPolicy::ObrienFleming => {
                (self.total_alpha * 2.0 / (rank as f64 + 1.0)).min(self.total_alpha)
            }
            AlphaSpendingPolicy::BhFdr => {
                if self.total_tests == 0 {
                    self.total_alpha
                } else {
                    self.total_alpha * (rank as f64 + 1.0) / self.total_tests as f64
                }
            }
        }
    }

    /// Clamps the requested spend to the policy's per-test allowance,
    /// returns `false` (spending nothing) if the cumulative family-wise
    /// total would be exceeded, otherwise appends a ledger entry and
    /// increments the cumulative total. Monotone — reclaim only through
    /// `release`.
    #[allow(clippy::too_many_arguments)]
    pub fn spend_alpha(
        &self,
        now_ns: i64,
        test_id: &str,
        requested: f64,
        decision: SprtDecision,
        llr: f64,
        n_observations: u64,
        test_type: &str,
    ) -> bool {
        let mut state = self.state.lock();
        let rank = match state.test_rank.get(test_id) {
            Some(&r) => r,
            None => {
                let r = state.next_rank;
                state.test_rank.insert(test_id.to_string(), r);
                state.next_rank += 1;
                r
            }
        };
        let allowed = self.allowed_for_rank(rank);
        let actual = requested.min(allowed).max(0.0);

        if state.cumulative_alpha + actual > self.total_alpha + 1e-12 {
            return false;
        }

        state.cumulative_alpha += actual;
        let cumulative_alpha = state.cumulative_alpha;
        state.entries.push(AlphaLedgerEntry {
            ts_ns: now_ns,
            test_id: test_id.to_string(),
            policy: self.policy,
            alpha_spent: actual,
            cumulative_alpha,
            decision,
            llr,
            n_observations,
            test_type: test_type.to_string(),
        });
        true
    }

    /// Explicit reclaim of previously-spent alpha (e.g. a decision is later
    /// invalidated). The only way the cumulative total moves downward.
    pub fn release(&self, amount: f64) {
        let mut state = self.state.lock();
        state.cumulative_alpha = (state.cumulative_alpha - amount).max(0.0);
    }

    pub fn cumulative_alpha(&self) -> f64 {
        self.state.lock().cumulative_alpha
    }

    pub fn entries(&self) -> Vec<AlphaLedgerEntry> {
        self.state.lock().entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pocock_allowance_is_constant() {
        let ledger = AlphaSpendingLedger::new(0.05, 10, 10, AlphaSpendingPolicy::Pocock);
        assert!(ledger.spend_alpha(0, "t1", 0.10, SprtDecision::AcceptH1, 3.0, 5, "gaussian"));
        // allowed = 0.05/10 = 0.005, requested 0.10 clamped to 0.005.
        assert!((ledger.cumulative_alpha() - 0.005).abs() < 1e-9);
    }

    #[test]
    fn spend_rejected_once_total_exhausted() {
        let ledger = AlphaSpendingLedger::new(0.01, 1, 1, AlphaSpendingPolicy::Pocock);
        assert!(ledger.spend_alpha(0, "t1", 0.01, SprtDecision::AcceptH1, 3.0, 5, "gaussian"));
        assert!(!ledger.spend_alpha(0, "t2", 0.01, SprtDecision::AcceptH1, 3.0, 5, "gaussian"));
    }

    #[test]
    fn release_reclaims_alpha() {
        let ledger = AlphaSpendingLedger::new(0.05, 1, 1, AlphaSpendingPolicy::Pocock);
        ledger.spend_alpha(0, "t1", 0.05, SprtDecision::AcceptH1, 3.0, 5, "gaussian");
        ledger.release(0.02);
        assert!((ledger.cumulative_alpha() - 0.03).abs() < 1e-9);
    }

    #[test]
    fn bh_fdr_scales_with_rank() {
        let ledger = AlphaSpendingLedger::new(0.10, 4, 4, AlphaSpendingPolicy::BhFdr);
        ledger.spend_alpha(0, "t1", 1.0, SprtDecision::AcceptH1, 1.0, 1, "x"); // rank 0: alpha*1/4=0.025
        ledger.spend_alpha(0, "t2", 1.0, SprtDecision::AcceptH1, 1.0, 1, "x"); // rank 1: alpha*2/4=0.05
        assert!((ledger.cumulative_alpha() - 0.075).abs() < 1e-9);
    }
}
