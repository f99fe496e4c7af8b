//! Stateful, per-symbol microstructure feature engine.
//!
//! Sharded by symbol (one mutex per shard, spec.md §5's single-writer-per-symbol
//! assumption) so that concurrent symbols never contend on a shared lock.

pub mod absorption;
pub mod leadlag;
pub mod obi;
pub mod tfi;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::types::{MarketSnapshot, SnapshotError};
use absorption::AbsorptionStream;
use leadlag::{LeadLagResult, LeadLagTracker};
use tfi::TradeBuffer;

#[derive(Debug, Error, PartialEq)]
pub enum FeatureError {
    #[error("snapshot for {symbol} at {timestamp} is not after the previous snapshot at {previous}")]
    OutOfOrderSnapshot {
        symbol: String,
        timestamp: f64,
        previous: f64,
    },
    #[error(transparent)]
    InvalidSnapshot(#[from] SnapshotError),
}

#[derive(Debug, Clone, Copy)]
pub struct FeatureEngineConfig {
    /// Levels at which `obi_lk` / `depth_*_lk` are additionally reported
    /// (level 1 is always reported).
    pub obi_levels: usize,
    pub tfi_window_s: f64,
    pub vpin_bucket_volume: f64,
    pub vpin_bucket_count: usize,
    pub max_trades: usize,
    pub absorption_half_life_s: f64,
    pub leadlag_max_points: usize,
    pub leadlag_window_s: f64,
}

impl Default for FeatureEngineConfig {
    fn default() -> Self {
        Self {
            obi_levels: 5,
            tfi_window_s: 60.0,
            vpin_bucket_volume: 50.0,
            vpin_bucket_count: 20,
            max_trades: 20_000,
            absorption_half_life_s: 5.0,
            leadlag_max_points: 5_000,
            leadlag_window_s: 3600.0,
        }
    }
}

/// A feature vector produced by one `FeatureEngine::update` call. Non-finite
/// values (other than the legitimately-infinite `ttd_*` fields) are replaced
/// with zero and flagged via `degraded`, per spec.md §4.1's failure policy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureMap {
    pub values: HashMap<String, f64>,
    pub degraded: bool,
}

impl FeatureMap {
    pub fn get(&self, key: &str) -> f64 {
        self.values.get(key).copied().unwrap_or(0.0)
    }

    fn insert(&mut self, key: &str, value: f64) {
        let sanitized = if key.starts_with("ttd") {
            if value.is_nan() {
                self.degraded = true;
                0.0
            } else {
                value
            }
        } else if !value.is_finite() {
            self.degraded = true;
            0.0
        } else {
            value
        };
        self.values.insert(key.to_string(), sanitized);
    }
}

struct SymbolState {
    last_ts: Option<f64>,
    trades: TradeBuffer,
    absorption: AbsorptionStream,
}

impl SymbolState {
    fn new(config: &FeatureEngineConfig) -> Self {
        Self {
            last_ts: None,
            trades: TradeBuffer::new(config.max_trades),
            absorption: AbsorptionStream::new(config.absorption_half_life_s),
        }
    }
}

pub struct FeatureEngine {
    config: FeatureEngineConfig,
    shards: RwLock<HashMap<String, Arc<Mutex<SymbolState>>>>,
    leadlag: Mutex<LeadLagTracker>,
}

impl FeatureEngine {
    pub fn new(config: FeatureEngineConfig) -> Self {
        let leadlag = LeadLagTracker::new(config.leadlag_max_points, config.leadlag_window_s);
        Self {
            config,
            shards: RwLock::new(HashMap::new()),
            leadlag: Mutex::new(leadlag),
        }
    }

    fn shard(&self, symbol: &str) -> Arc<Mutex<SymbolState>> {
        if let Some(existing) = self.shards.read().get(symbol) {
            return existing.clone();
        }
        let mut shards = self.shards.write();
        shards
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SymbolState::new(&self.config))))
            .clone()
    }

    pub fn update(&self, symbol: &str, snapshot: &MarketSnapshot) -> Result<FeatureMap, FeatureError> {
        snapshot.validate()?;

        let shard = self.shard(symbol);
        let mut state = shard.lock();

        if let Some(previous) = state.last_ts {
            if snapshot.timestamp < previous {
                return Err(FeatureError::OutOfOrderSnapshot {
                    symbol: symbol.to_string(),
                    timestamp: snapshot.timestamp,
                    previous,
                });
            }
        }
        state.last_ts = Some(snapshot.timestamp);

        for trade in &snapshot.trades {
            state.trades.push(*trade);
        }
        let horizon = snapshot.timestamp - 10.0 * self.config.tfi_window_s;
        state.trades.evict_before(horizon);

        let mut features = FeatureMap::default();
        features.insert("obi_l1", obi::obi_l1(snapshot));
        features.insert("obi_lk", obi::obi_over_levels(snapshot, self.config.obi_levels));
        features.insert("depth_bid_lk", obi::depth_bid(snapshot, self.config.obi_levels));
        features.insert("depth_ask_lk", obi::depth_ask(snapshot, self.config.obi_levels));
        features.insert("depth_ratio", obi::depth_ratio(snapshot, self.config.obi_levels));
        features.insert("mid", snapshot.mid());
        features.insert("spread", snapshot.spread());
        features.insert("spread_bps", snapshot.spread_bps());
        features.insert("micro_price", obi::micro_price(snapshot, self.config.obi_levels));

        features.insert("tfi", state.trades.tfi(snapshot.timestamp, self.config.tfi_window_s));
        features.insert(
            "vpin_like",
            state.trades.vpin_like(snapshot.timestamp, self.config.tfi_window_s),
        );
        features.insert(
            "vpin_bucketed",
            state
                .trades
                .vpin_bucketed(self.config.vpin_bucket_volume, self.config.vpin_bucket_count),
        );

        let (bid_abs, ask_abs) = state.absorption.update(snapshot);
        features.insert("absorption_frac_bid", bid_abs.absorption_frac);
        features.insert("resilience_bid", bid_abs.resilience);
        features.insert("pressure_bid", bid_abs.pressure);
        features.insert("ttd_bid", bid_abs.ttd);
        features.insert("absorption_frac_ask", ask_abs.absorption_frac);
        features.insert("resilience_ask", ask_abs.resilience);
        features.insert("pressure_ask", ask_abs.pressure);
        features.insert("ttd_ask", ask_abs.ttd);

        drop(state);

        self.leadlag.lock().add_tick(symbol, snapshot.timestamp, snapshot.mid());

        Ok(features)
    }

    /// On-demand Hayashi–Yoshida lead-lag scan between two symbols that have
    /// both been fed through `update`. Not part of the per-symbol feature
    /// map since it is inherently a cross-symbol quantity.
    pub fn cross_asset_lead_lag(&self, sym_x: &str, sym_y: &str, lags: &[f64]) -> LeadLagResult {
        self.leadlag.lock().lead_lag_scan(sym_x, sym_y, lags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Side, Trade};

    fn snap(ts: f64, bid: f64, ask: f64) -> MarketSnapshot {
        MarketSnapshot {
            timestamp: ts,
            bid_price: bid,
            ask_price: ask,
            bid_volumes_l: vec![5.0, 5.0],
            ask_volumes_l: vec![5.0, 5.0],
            trades: vec![],
        }
    }

    #[test]
    fn out_of_order_snapshot_rejected() {
        let engine = FeatureEngine::new(FeatureEngineConfig::default());
        engine.update("BTCUSDT", &snap(2.0, 100.0, 100.1)).unwrap();
        let err = engine.update("BTCUSDT", &snap(1.0, 100.0, 100.1)).unwrap_err();
        assert_eq!(
            err,
            FeatureError::OutOfOrderSnapshot {
                symbol: "BTCUSDT".to_string(),
                timestamp: 1.0,
                previous: 2.0,
            }
        );
    }

    #[test]
    fn shards_are_independent_per_symbol() {
        let engine = FeatureEngine::new(FeatureEngineConfig::default());
        engine.update("BTCUSDT", &snap(5.0, 100.0, 100.1)).unwrap();
        // A fresh symbol starting at an earlier timestamp is not out-of-order
        // relative to BTCUSDT's shard.
        let result = engine.update("ETHUSDT", &snap(1.0, 10.0, 10.01));
        assert!(result.is_ok());
    }

    #[test]
    fn feature_map_reports_obi_and_microprice() {
        let engine = FeatureEngine::new(FeatureEngineConfig::default());
        let features = engine.update("BTCUSDT", &snap(1.0, 100.0, 100.1)).unwrap();
        assert!((features.get("obi_l1")).abs() < 1e-9); // symmetric book
        assert!(features.get("micro_price") >= 100.0 && features.get("micro_price") <= 100.1);
        assert!(!features.degraded);
    }

    #[test]
    fn tfi_reflects_pushed_trades() {
        let engine = FeatureEngine::new(FeatureEngineConfig::default());
        let mut s = snap(1.0, 100.0, 100.1);
        s.trades.push(Trade {
            timestamp: 1.0,
            price: 100.05,
            size: 2.0,
            side: Side::Buy,
        });
        let features = engine.update("BTCUSDT", &s).unwrap();
        assert!((features.get("tfi") - 2.0).abs() < 1e-9);
    }
}
