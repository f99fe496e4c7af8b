//! Per-symbol exchange filters: validate + round `OrderRequest`s to
//! lot/tick/notional granularity. Grounded literally on
//! `original_source/core/execution/shadow_broker.py`'s `BinanceFilters`,
//! `_round_quantity`/`_round_price` (round-down-then-requantize), and
//! `_validate_order`'s check order.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// First-match-wins rejection reason, carrying the exact code spec.md §4.6
/// lists (`UNKNOWN_SYMBOL`, `LOT_SIZE`, `PRICE_FILTER`, `MIN_NOTIONAL`).
#[derive(Debug, Clone, PartialEq)]
pub struct FilterRejection {
    pub code: &'static str,
    pub reason: String,
}

impl FilterRejection {
    fn new(code: &'static str, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymbolFilters {
    pub lot_min_qty: Decimal,
    pub lot_max_qty: Decimal,
    pub lot_step: Decimal,
    pub price_min: Decimal,
    pub price_max: Decimal,
    pub price_tick: Decimal,
    pub min_notional: Decimal,
}

impl SymbolFilters {
    /// Conservative fallback used when the exchange's filter-info fetch
    /// fails at startup (spec.md §4.6): validation still runs against these
    /// rather than being skipped. Values mirror
    /// `shadow_broker.py::_set_default_filters`.
    pub fn conservative_default() -> Self {
        Self {
            lot_min_qty: dec!(0.001),
            lot_max_qty: dec!(999_999_999),
            lot_step: dec!(0.001),
            price_min: dec!(0.01),
            price_max: dec!(999_999_999),
            price_tick: dec!(0.01),
            min_notional: dec!(10.0),
        }
    }

    /// Rounds `value` down to the nearest multiple of `step` (spec.md
    /// §4.6's rounding rule). `step` of zero is treated as "no rounding".
    fn round_down_to_step(value: Decimal, step: Decimal) -> Decimal {
        if step.is_zero() {
            return value;
        }
        let quotient = (value / step).floor();
        (quotient * step).round_dp(step.scale())
    }

    pub fn round_quantity(&self, quantity: Decimal) -> Decimal {
        Self::round_down_to_step(quantity, self.lot_step)
    }

    pub fn round_price(&self, price: Decimal) -> Decimal {
        Self::round_down_to_step(price, self.price_tick)
    }

    /// The six-step validation chain of spec.md §4.6, steps 2-6 (step 1,
    /// "symbol known", happens one level up since it requires the filter
    /// registry, not just one `SymbolFilters`). Returns the first matching
    /// rejection; `None` means approved.
    pub fn validate(&self, quantity: Decimal, price: Option<Decimal>, reference_price: Decimal) -> Option<FilterRejection> {
        if quantity < self.lot_min_qty {
            return Some(FilterRejection::new(
                "LOT_SIZE",
                format!("quantity {quantity} below minimum {}", self.lot_min_qty),
            ));
        }
        if quantity > self.lot_max_qty {
            return Some(FilterRejection::new(
                "LOT_SIZE",
                format!("quantity {quantity} above maximum {}", self.lot_max_qty),
            ));
        }
        if !self.lot_step.is_zero() && !(quantity % self.lot_step).is_zero() {
            return Some(FilterRejection::new(
                "LOT_SIZE",
                format!("quantity {quantity} not a multiple of step {}", self.lot_step),
            ));
        }

        if let Some(price) = price {
            if price < self.price_min {
                return Some(FilterRejection::new(
                    "PRICE_FILTER",
                    format!("price {price} below minimum {}", self.price_min),
                ));
            }
            if price > self.price_max {
                return Some(FilterRejection::new(
                    "PRICE_FILTER",
                    format!("price {price} above maximum {}", self.price_max),
                ));
            }
            if !self.price_tick.is_zero() && !(price % self.price_tick).is_zero() {
                return Some(FilterRejection::new(
                    "PRICE_FILTER",
                    format!("price {price} not a multiple of tick {}", self.price_tick),
                ));
            }
        }

        let notional_price = price.unwrap_or(reference_price);
        let notional = quantity * notional_price;
        if notional < self.min_notional {
            return Some(FilterRejection::new(
                "MIN_NOTIONAL",
                format!("notional {notional} below minimum {}", self.min_notional),
            ));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btcusdt() -> SymbolFilters {
        SymbolFilters {
            lot_min_qty: dec!(0.001),
            lot_max_qty: dec!(1000),
            lot_step: dec!(0.001),
            price_min: dec!(0.01),
            price_max: dec!(9_000_000),
            price_tick: dec!(0.01),
            min_notional: dec!(10),
        }
    }

    /// Scenario S5: rounding then re-validating an otherwise-valid order.
    #[test]
    fn s5_rounds_down_and_accepts() {
        let filters = btcusdt();
        let qty = filters.round_quantity(dec!(0.00123456));
        let price = filters.round_price(dec!(50000.127));
        assert_eq!(qty, dec!(0.001));
        assert_eq!(price, dec!(50000.12));
        assert!(filters.validate(qty, Some(price), price).is_none());
    }

    /// Scenario S5: below minimum lot size rejects with LOT_SIZE.
    #[test]
    fn s5_below_lot_min_rejects() {
        let filters = btcusdt();
        let qty = filters.round_quantity(dec!(0.0001));
        let rejection = filters.validate(qty, Some(dec!(50000)), dec!(50000)).unwrap();
        assert_eq!(rejection.code, "LOT_SIZE");
    }

    #[test]
    fn price_not_on_tick_rejects() {
        let filters = btcusdt();
        let rejection = filters.validate(dec!(1), Some(dec!(50000.005)), dec!(50000)).unwrap();
        assert_eq!(rejection.code, "PRICE_FILTER");
    }

    #[test]
    fn notional_below_minimum_rejects() {
        let filters = btcusdt();
        let rejection = filters.validate(dec!(0.001), Some(dec!(1.0)), dec!(1.0)).unwrap();
        assert_eq!(rejection.code, "MIN_NOTIONAL");
    }
}
