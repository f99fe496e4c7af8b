//! Order-book-imbalance, depth, and micro-price — pure functions of a single
//! snapshot. Grounded on `original_source/core/features/obi.py`.

use crate::types::MarketSnapshot;

/// Level-1 order book imbalance: `(bid_q1 - ask_q1) / (bid_q1 + ask_q1)`,
/// in `[-1, 1]`. Zero when both sides are empty.
pub fn obi_l1(snapshot: &MarketSnapshot) -> f64 {
    obi_over_levels(snapshot, 1)
}

/// Order book imbalance summed over the first `levels` levels on each side.
pub fn obi_over_levels(snapshot: &MarketSnapshot, levels: usize) -> f64 {
    let bid = sum_levels(&snapshot.bid_volumes_l, levels);
    let ask = sum_levels(&snapshot.ask_volumes_l, levels);
    let denom = bid + ask;
    if denom <= 0.0 {
        0.0
    } else {
        (bid - ask) / denom
    }
}

pub fn depth_bid(snapshot: &MarketSnapshot, levels: usize) -> f64 {
    sum_levels(&snapshot.bid_volumes_l, levels)
}

pub fn depth_ask(snapshot: &MarketSnapshot, levels: usize) -> f64 {
    sum_levels(&snapshot.ask_volumes_l, levels)
}

/// `bid_sum / (bid_sum + ask_sum)` over the first `levels` levels. Zero when
/// both sides are empty.
pub fn depth_ratio(snapshot: &MarketSnapshot, levels: usize) -> f64 {
    let bid = depth_bid(snapshot, levels);
    let ask = depth_ask(snapshot, levels);
    let denom = bid + ask;
    if denom <= 0.0 {
        0.0
    } else {
        bid / denom
    }
}

/// Volume-weighted mid price: `(bid*ask_vol + ask*bid_vol) / (bid_vol + ask_vol)`,
/// with volumes summed over the first `levels` levels on each side (matches
/// `microstructure.py`'s `depth=5` default, not just the best level). Falls
/// back to the plain mid when both sides sum to zero, and is always bounded
/// within `[bid, ask]`.
pub fn micro_price(snapshot: &MarketSnapshot, levels: usize) -> f64 {
    let bid_vol = sum_levels(&snapshot.bid_volumes_l, levels);
    let ask_vol = sum_levels(&snapshot.ask_volumes_l, levels);
    let denom = bid_vol + ask_vol;
    if denom <= 0.0 {
        snapshot.mid()
    } else {
        (snapshot.bid_price * ask_vol + snapshot.ask_price * bid_vol) / denom
    }
}

fn sum_levels(levels: &[f64], n: usize) -> f64 {
    levels.iter().take(n).sum()
}
