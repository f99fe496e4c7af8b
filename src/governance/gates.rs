//! Static risk-gate layer, independent of SPRT, evaluated in a fixed
//! precedence order. Grounded on `original_source/aurora/governance.py`.

use parking_lot::Mutex;

use crate::events::codes;

#[derive(Debug, Clone, Copy, Default)]
pub struct RiskState {
    pub pnl_today_pct: f64,
    pub spread_bps: f64,
    pub latency_ms: f64,
    pub vol_std_bps: f64,
    pub cvar_hist_pct: f64,
    pub pos_now: u64,
    pub reject_rate: f64,
    pub dq_stale_book: bool,
    pub dq_crossed_book: bool,
    pub dq_abnormal_spread: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    pub daily_dd_limit_pct: f64,
    pub cvar_limit_pct: f64,
    pub spread_bps_limit: f64,
    pub latency_ms_limit: f64,
    pub volatility_bps_limit: f64,
    pub max_position_count: u64,
    pub storm_reject_rate: f64,
    pub cooldown_s: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            daily_dd_limit_pct: 10.0,
            cvar_limit_pct: 10.0,
            spread_bps_limit: 80.0,
            latency_ms_limit: 500.0,
            volatility_bps_limit: 300.0,
            max_position_count: 999,
            storm_reject_rate: 0.5,
            cooldown_s: 60.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GateDecision {
    pub allow: bool,
    pub code: Option<&'static str>,
    pub reason: String,
}

impl GateDecision {
    fn approve() -> Self {
        Self {
            allow: true,
            code: None,
            reason: String::new(),
        }
    }

    fn deny(code: &'static str, reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            code: Some(code),
            reason: reason.into(),
        }
    }
}

/// Evaluates the six-step static gate chain, with a kill-switch that halts
/// all approvals until `now + cooldown_s` once tripped. Holds its own
/// cooldown-timestamp state (the only gate-layer state that persists across
/// calls); all other checks are pure functions of the current `RiskState`.
pub struct StaticGates {
    halt_until_ns: Mutex<Option<i64>>,
}

impl Default for StaticGates {
    fn default() -> Self {
        Self {
            halt_until_ns: Mutex::new(None),
        }
    }
}

impl StaticGates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_halted(&self, now_ns: i64) -> bool {
        self.halt_until_ns
            .lock()
            .map(|until| now_ns < until)
            .unwrap_or(false)
    }

    pub fn resume(&self) {
        *self.halt_until_ns.lock() = None;
    }

    pub fn evaluate(&self, now_ns: i64, state: &RiskState, config: &GateConfig) -> GateDecision {
        // 1. Kill-switch: a reject storm or a critical data-quality flag
        //    (stale/crossed book — not abnormal spread) halts until cooldown.
        if state.reject_rate >= config.storm_reject_rate
            || state.dq_stale_book
            || state.dq_crossed_book
        {
            let mut halt = self.halt_until_ns.lock();
            let candidate = now_ns + (config.cooldown_s * 1e9) as i64;
            *halt = Some(halt.map(|existing| existing.max(candidate)).unwrap_or(candidate));
        }
        if self.is_halted(now_ns) {
            return GateDecision::deny(codes::AURORA_HALT, "kill-switch active, cooling down");
        }

        // 2. Data-quality gates.
        if state.dq_stale_book {
            return GateDecision::deny(codes::DQ_STALE_BOOK, "stale order book");
        }
        if state.dq_crossed_book {
            return GateDecision::deny(codes::DQ_CROSSED_BOOK, "crossed order book");
        }
        if state.dq_abnormal_spread {
            return GateDecision::deny(codes::DQ_ABNORMAL_SPREAD, "abnormal spread");
        }

        // 3. Daily drawdown.
        if state.pnl_today_pct < -config.daily_dd_limit_pct.abs() {
            return GateDecision::deny(
                codes::RISK_DENY_DRAWDOWN,
                format!(
                    "pnl_today_pct {} below -{}",
                    state.pnl_today_pct,
                    config.daily_dd_limit_pct.abs()
                ),
            );
        }

        // 4. CVaR.
        if state.cvar_hist_pct < -config.cvar_limit_pct.abs() {
            return GateDecision::deny(
                codes::RISK_DENY_CVAR,
                format!(
                    "cvar_hist_pct {} below -{}",
                    state.cvar_hist_pct,
                    config.cvar_limit_pct.abs()
                ),
            );
        }

        // 5. Spread / latency / volatility caps.
        if state.spread_bps > config.spread_bps_limit {
            return GateDecision::deny(
                codes::SPREAD_GUARD_TRIP,
                format!("spread_bps {} above {}", state.spread_bps, config.spread_bps_limit),
            );
        }
        if state.latency_ms > config.latency_ms_limit {
            return GateDecision::deny(
                codes::LATENCY_GUARD_TRIP,
                format!("latency_ms {} above {}", state.latency_ms, config.latency_ms_limit),
            );
        }
        if state.vol_std_bps > config.volatility_bps_limit {
            return GateDecision::deny(
                codes::VOLATILITY_GUARD_TRIP,
                format!(
                    "vol_std_bps {} above {}",
                    state.vol_std_bps, config.volatility_bps_limit
                ),
            );
        }

        // 6. Position count.
        if state.pos_now >= config.max_position_count {
            return GateDecision::deny(
                codes::RISK_DENY_POS_LIMIT,
                format!("pos_now {} >= {}", state.pos_now, config.max_position_count),
            );
        }

        GateDecision::approve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario S6: drawdown gate fires before the spread gate even though
    /// the spread is within its own limit, because drawdown is checked
    /// earlier in the fixed precedence order.
    #[test]
    fn drawdown_denies_before_spread_is_even_checked() {
        let gates = StaticGates::new();
        let state = RiskState {
            pnl_today_pct: -6.0,
            spread_bps: 10.0,
            latency_ms: 50.0,
            ..Default::default()
        };
        let config = GateConfig {
            daily_dd_limit_pct: 5.0,
            spread_bps_limit: 50.0,
            ..Default::default()
        };
        let decision = gates.evaluate(0, &state, &config);
        assert_eq!(decision.allow, false);
        assert_eq!(decision.code, Some(codes::RISK_DENY_DRAWDOWN));
    }

    #[test]
    fn kill_switch_halts_until_cooldown_elapses() {
        let gates = StaticGates::new();
        let storm = RiskState {
            reject_rate: 0.9,
            ..Default::default()
        };
        let config = GateConfig {
            cooldown_s: 60.0,
            ..Default::default()
        };
        let one_second_ns = 1_000_000_000;
        let decision = gates.evaluate(0, &storm, &config);
        assert_eq!(decision.code, Some(codes::AURORA_HALT));

        let later = gates.evaluate(30 * one_second_ns, &RiskState::default(), &config);
        assert_eq!(later.code, Some(codes::AURORA_HALT));

        let after_cooldown = gates.evaluate(61 * one_second_ns, &RiskState::default(), &config);
        assert!(after_cooldown.allow);
    }

    #[test]
    fn clean_state_is_approved() {
        let gates = StaticGates::new();
        let decision = gates.evaluate(0, &RiskState::default(), &GateConfig::default());
        assert!(decision.allow);
    }
}
