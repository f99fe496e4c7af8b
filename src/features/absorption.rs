//! Queue absorption / cancellation / replenishment decomposition at the best
//! quotes, smoothed by an event-time exponential moving average.
//! Grounded on `original_source/core/features/absorption.py`.

use crate::types::{MarketSnapshot, Side};

const EPS: f64 = 1e-9;

/// Event-time EMA: on the first observation the state is set directly to
/// the input; subsequent updates blend by `w = exp(-ln2 * dt / half_life)`.
#[derive(Debug, Clone, Copy)]
struct Ema {
    half_life_s: f64,
    value: Option<f64>,
}

impl Ema {
    fn new(half_life_s: f64) -> Self {
        Self {
            half_life_s,
            value: None,
        }
    }

    fn update(&mut self, x: f64, dt: f64) -> f64 {
        let updated = match self.value {
            None => x,
            Some(v) => {
                let lambda = std::f64::consts::LN_2 / self.half_life_s;
                let w = (-lambda * dt).exp();
                w * v + (1.0 - w) * x
            }
        };
        self.value = Some(updated);
        updated
    }

    fn get(&self) -> f64 {
        self.value.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AbsorptionFeatures {
    pub absorption_frac: f64,
    pub resilience: f64,
    pub pressure: f64,
    pub ttd: f64,
}

#[derive(Debug, Clone, Copy)]
struct SidePrice {
    price: f64,
    qty: f64,
}

#[derive(Debug)]
struct SideEmas {
    mo: Ema,
    cancel: Ema,
    replenish: Ema,
}

impl SideEmas {
    fn new(half_life_s: f64) -> Self {
        Self {
            mo: Ema::new(half_life_s),
            cancel: Ema::new(half_life_s),
            replenish: Ema::new(half_life_s),
        }
    }
}

/// Per-symbol absorption state. Call `update` once per incoming snapshot, in
/// event-time order (enforced by the caller — `FeatureEngine` rejects
/// out-of-order snapshots before this is reached).
#[derive(Debug)]
pub struct AbsorptionStream {
    half_life_s: f64,
    last_ts: Option<f64>,
    last_bid: SidePrice,
    last_ask: SidePrice,
    bid: SideEmas,
    ask: SideEmas,
}

impl AbsorptionStream {
    pub fn new(half_life_s: f64) -> Self {
        Self {
            half_life_s,
            last_ts: None,
            last_bid: SidePrice { price: 0.0, qty: 0.0 },
            last_ask: SidePrice { price: 0.0, qty: 0.0 },
            bid: SideEmas::new(half_life_s),
            ask: SideEmas::new(half_life_s),
        }
    }

    pub fn update(&mut self, snapshot: &MarketSnapshot) -> (AbsorptionFeatures, AbsorptionFeatures) {
        let new_bid = SidePrice {
            price: snapshot.bid_price,
            qty: snapshot.bid_qty(0),
        };
        let new_ask = SidePrice {
            price: snapshot.ask_price,
            qty: snapshot.ask_qty(0),
        };

        let Some(last_ts) = self.last_ts else {
            self.last_ts = Some(snapshot.timestamp);
            self.last_bid = new_bid;
            self.last_ask = new_ask;
            return (AbsorptionFeatures::default(), AbsorptionFeatures::default());
        };

        let dt = (snapshot.timestamp - last_ts).max(1e-6);

        let sell_mo: f64 = snapshot
            .trades
            .iter()
            .filter(|t| t.timestamp > last_ts && matches!(t.side, Side::Sell))
            .map(|t| t.size)
            .sum();
        let buy_mo: f64 = snapshot
            .trades
            .iter()
            .filter(|t| t.timestamp > last_ts && matches!(t.side, Side::Buy))
            .map(|t| t.size)
            .sum();

        let (mo_to_bid, cancel_bid, repl_bid) =
            decompose(self.last_bid, new_bid, sell_mo, true);
        let (mo_to_ask, cancel_ask, repl_ask) =
            decompose(self.last_ask, new_ask, buy_mo, false);

        let mo_rate_bid = self.bid.mo.update(mo_to_bid / dt, dt);
        let cancel_rate_bid = self.bid.cancel.update(cancel_bid / dt, dt);
        let replenish_rate_bid = self.bid.replenish.update(repl_bid / dt, dt);

        let mo_rate_ask = self.ask.mo.update(mo_to_ask / dt, dt);
        let cancel_rate_ask = self.ask.cancel.update(cancel_ask / dt, dt);
        let replenish_rate_ask = self.ask.replenish.update(repl_ask / dt, dt);

        self.last_ts = Some(snapshot.timestamp);
        self.last_bid = new_bid;
        self.last_ask = new_ask;

        let bid_features = features_from_rates(
            mo_rate_bid,
            cancel_rate_bid,
            replenish_rate_bid,
            new_bid.qty,
        );
        let ask_features = features_from_rates(
            mo_rate_ask,
            cancel_rate_ask,
            replenish_rate_ask,
            new_ask.qty,
        );

        (bid_features, ask_features)
    }

    /// Expected queue ahead of a newly-placed order, per
    /// `estimate_queue_ahead` in the original: a resting order absorbs
    /// liquidity on the side opposite its own (a BUY order rests against the
    /// ask-side queue it would need to walk through).
    pub fn estimate_queue_ahead(&self, order_side: Side, horizon_s: f64) -> f64 {
        match order_side {
            Side::Buy => self.last_ask.qty + self.ask.replenish.get() * horizon_s,
            Side::Sell => self.last_bid.qty + self.bid.replenish.get() * horizon_s,
        }
    }
}

/// Splits the change in best-level queue size into (market-order-take,
/// cancellation, replenishment), given the market-order volume observed on
/// the side that would consume this queue since the last update.
/// `is_bid` controls which direction counts as "price moved toward" vs
/// "moved away".
fn decompose(prev: SidePrice, cur: SidePrice, consuming_mo: f64, is_bid: bool) -> (f64, f64, f64) {
    let price_unchanged = (cur.price - prev.price).abs() < 1e-12;
    let moved_toward = if is_bid {
        cur.price > prev.price
    } else {
        cur.price < prev.price
    };

    if price_unchanged {
        let dq = cur.qty - prev.qty;
        if dq < -EPS {
            let removal = -dq;
            let mo = removal.min(consuming_mo);
            let cancel = (removal - mo).max(0.0);
            (mo, cancel, 0.0)
        } else if dq > EPS {
            (0.0, 0.0, dq)
        } else {
            (0.0, 0.0, 0.0)
        }
    } else if moved_toward {
        // Quote improved: new queue is entirely fresh replenishment.
        (0.0, 0.0, cur.qty)
    } else {
        // Quote moved away: the old queue is depleted but unattributed.
        (0.0, 0.0, 0.0)
    }
}

fn features_from_rates(
    mo_rate: f64,
    cancel_rate: f64,
    replenish_rate: f64,
    queue: f64,
) -> AbsorptionFeatures {
    let removal_rate = mo_rate + cancel_rate;
    let absorption_frac = if removal_rate <= 0.0 {
        0.0
    } else {
        mo_rate / removal_rate
    };
    let resilience = replenish_rate / removal_rate.max(EPS);
    let pressure = (mo_rate - replenish_rate) / removal_rate.max(EPS);
    let depletion_rate = removal_rate - replenish_rate;
    let ttd = if depletion_rate <= EPS {
        f64::INFINITY
    } else {
        queue / depletion_rate.max(EPS)
    };
    AbsorptionFeatures {
        absorption_frac,
        resilience,
        pressure,
        ttd,
    }
}
