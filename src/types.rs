//! Shared domain types: market data, order-flow primitives, edge accounting.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which side of the book a trade executed against or an order rests on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

/// A single executed trade. Immutable once constructed; a symbol's trade
/// stream is expected to be monotone non-decreasing in `timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: f64,
    pub price: f64,
    pub size: f64,
    pub side: Side,
}

#[derive(Debug, Error, PartialEq)]
pub enum SnapshotError {
    #[error("ask price {ask} is below bid price {bid}")]
    CrossedBook { bid: f64, ask: f64 },
    #[error("negative volume at level {level}")]
    NegativeVolume { level: usize },
    #[error("trade at index {index} has timestamp {trade_ts} before prior trade {prev_ts}")]
    OutOfOrderTrade {
        index: usize,
        trade_ts: f64,
        prev_ts: f64,
    },
    #[error("snapshot timestamp {snapshot_ts} precedes last trade timestamp {trade_ts}")]
    SnapshotBeforeTrade { snapshot_ts: f64, trade_ts: f64 },
}

/// An L2 order book snapshot with the trades observed since the previous
/// snapshot. `bid_volumes_l[0]`/`ask_volumes_l[0]` are the best-level sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub timestamp: f64,
    pub bid_price: f64,
    pub ask_price: f64,
    pub bid_volumes_l: Vec<f64>,
    pub ask_volumes_l: Vec<f64>,
    pub trades: Vec<Trade>,
}

impl MarketSnapshot {
    /// Validates the invariants spec.md §3 places on a snapshot. Construction
    /// does not enforce these automatically so that test fixtures can build
    /// intentionally-invalid snapshots to exercise error paths.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.ask_price < self.bid_price {
            return Err(SnapshotError::CrossedBook {
                bid: self.bid_price,
                ask: self.ask_price,
            });
        }
        for (level, &v) in self.bid_volumes_l.iter().enumerate() {
            if v < 0.0 {
                return Err(SnapshotError::NegativeVolume { level });
            }
        }
        for (level, &v) in self.ask_volumes_l.iter().enumerate() {
            if v < 0.0 {
                return Err(SnapshotError::NegativeVolume { level });
            }
        }
        let mut prev_ts = f64::NEG_INFINITY;
        for (index, trade) in self.trades.iter().enumerate() {
            if trade.timestamp < prev_ts {
                return Err(SnapshotError::OutOfOrderTrade {
                    index,
                    trade_ts: trade.timestamp,
                    prev_ts,
                });
            }
            prev_ts = trade.timestamp;
        }
        if let Some(last_trade) = self.trades.last() {
            if self.timestamp < last_trade.timestamp {
                return Err(SnapshotError::SnapshotBeforeTrade {
                    snapshot_ts: self.timestamp,
                    trade_ts: last_trade.timestamp,
                });
            }
        }
        Ok(())
    }

    pub fn bid_qty(&self, level: usize) -> f64 {
        self.bid_volumes_l.get(level).copied().unwrap_or(0.0)
    }

    pub fn ask_qty(&self, level: usize) -> f64 {
        self.ask_volumes_l.get(level).copied().unwrap_or(0.0)
    }

    pub fn mid(&self) -> f64 {
        0.5 * (self.bid_price + self.ask_price)
    }

    pub fn spread(&self) -> f64 {
        self.ask_price - self.bid_price
    }

    pub fn spread_bps(&self) -> f64 {
        let mid = self.mid();
        if mid <= 0.0 {
            0.0
        } else {
            10_000.0 * self.spread() / mid
        }
    }
}

/// Decomposition of expected trade edge into its named cost/benefit
/// components. `net_edge` is always derived, never stored, so the
/// components and the total can never drift out of sync.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeBreakdown {
    pub raw_edge_bps: f64,
    pub fees_bps: f64,
    pub slippage_bps: f64,
    pub adverse_bps: f64,
    pub latency_bps: f64,
    pub rebates_bps: f64,
}

impl EdgeBreakdown {
    pub fn net_edge_bps(&self) -> f64 {
        self.raw_edge_bps
            - (self.fees_bps + self.slippage_bps + self.adverse_bps + self.latency_bps)
            + self.rebates_bps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(bid: f64, ask: f64, trades: Vec<Trade>, ts: f64) -> MarketSnapshot {
        MarketSnapshot {
            timestamp: ts,
            bid_price: bid,
            ask_price: ask,
            bid_volumes_l: vec![1.0],
            ask_volumes_l: vec![1.0],
            trades,
        }
    }

    #[test]
    fn mid_and_spread_bps() {
        let s = snap(100.0, 100.1, vec![], 1.0);
        assert!((s.mid() - 100.05).abs() < 1e-9);
        assert!((s.spread_bps() - 10.0_f64 / 100.05 * 100.0).abs() < 1e-6);
    }

    #[test]
    fn crossed_book_rejected() {
        let s = snap(100.1, 100.0, vec![], 1.0);
        assert_eq!(
            s.validate(),
            Err(SnapshotError::CrossedBook {
                bid: 100.1,
                ask: 100.0
            })
        );
    }

    #[test]
    fn net_edge_is_derived() {
        let e = EdgeBreakdown {
            raw_edge_bps: 10.0,
            fees_bps: 1.0,
            slippage_bps: 2.0,
            adverse_bps: 1.5,
            latency_bps: 0.5,
            rebates_bps: 0.2,
        };
        assert!((e.net_edge_bps() - (10.0 - (1.0 + 2.0 + 1.5 + 0.5) + 0.2)).abs() < 1e-9);
    }
}
