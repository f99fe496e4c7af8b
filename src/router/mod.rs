//! Order router: validate + round against per-symbol filters, submit
//! through a backend (shadow or live), and wire submission through the
//! idempotency guard so retries and duplicate fills are netto-invariant.
//! Grounded on `original_source/core/execution/shadow_broker.py` (filter
//! validation/rounding order, IOC/FOK simulation) and
//! `cooprefr-bettersys/rust-backend/src/vault/execution.rs`'s
//! `ExecutionAdapter` trait pattern.

pub mod exchange;
pub mod filters;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Clock;
use crate::idempotency::guard::PreSubmitOutcome;
use crate::idempotency::{IdempotencyError, IdempotencyGuard, OrderStatus};
use crate::types::Side;

pub use exchange::{ExchangeAdapter, ShadowExchange, ShadowExchangeConfig};
pub use filters::{FilterRejection, SymbolFilters};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    StopLimit,
    TakeProfitLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
}

/// A request to place one order. Two requests have the same `spec_hash`
/// (spec.md §3) iff every field other than `client_order_id` is byte-equal
/// after canonical normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    /// Canonical, order-independent fingerprint of every field but the
    /// coid: decimal values are normalized (trailing zeros stripped) and
    /// enum fields render as fixed uppercase tokens, then joined in a fixed
    /// field order. The canonical string itself serves as the `spec_hash`
    /// (spec.md calls it "an opaque string"; no cryptographic hashing
    /// crate is part of this crate's dependency stack, see DESIGN.md).
    pub fn spec_hash(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.symbol.to_uppercase(),
            side_token(self.side),
            order_type_token(self.order_type),
            self.quantity.normalize(),
            self.price.map(|p| p.normalize().to_string()).unwrap_or_default(),
            tif_token(self.time_in_force),
        )
    }
}

fn side_token(side: Side) -> &'static str {
    match side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

fn order_type_token(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Market => "MARKET",
        OrderType::Limit => "LIMIT",
        OrderType::StopLimit => "STOP_LIMIT",
        OrderType::TakeProfitLimit => "TAKE_PROFIT_LIMIT",
    }
}

fn tif_token(tif: TimeInForce) -> &'static str {
    match tif {
        TimeInForce::Gtc => "GTC",
        TimeInForce::Ioc => "IOC",
        TimeInForce::Fok => "FOK",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub price: Decimal,
    pub qty: Decimal,
    pub commission: Decimal,
    pub commission_asset: String,
    pub trade_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub client_order_id: String,
    pub status: OrderStatus,
    pub executed_qty: Decimal,
    pub cumm_quote_cost: Decimal,
    pub fills: Vec<Fill>,
    pub server_time_ns: i64,
    pub raw: serde_json::Value,
}

#[derive(Debug, Error, PartialEq)]
pub enum RouterError {
    #[error("unknown symbol {0}")]
    UnknownSymbol(String),
    #[error("{code}: {reason}")]
    Rejected { code: &'static str, reason: String },
    #[error("idempotency error: {0}")]
    Idempotency(#[from] IdempotencyError),
    #[error("exchange transport error: {0}")]
    Transport(String),
}

/// `OrderRouter::place_order_idempotent` wires spec.md §4.6's submission
/// pipeline: spec_hash -> guard pre-check -> validate/round -> submit ->
/// guard mark_status.
pub struct OrderRouter {
    adapter: Arc<dyn ExchangeAdapter>,
    guard: IdempotencyGuard,
    clock: Arc<dyn Clock>,
    filters_cache: RwLock<HashMap<String, SymbolFilters>>,
    order_seq: AtomicU64,
}

impl OrderRouter {
    pub fn new(adapter: Arc<dyn ExchangeAdapter>, guard: IdempotencyGuard, clock: Arc<dyn Clock>) -> Self {
        Self {
            adapter,
            guard,
            clock,
            filters_cache: RwLock::new(HashMap::new()),
            order_seq: AtomicU64::new(0),
        }
    }

    fn generate_coid(&self) -> String {
        let seq = self.order_seq.fetch_add(1, Ordering::Relaxed);
        let millis = self.clock.now_ns() / 1_000_000;
        format!("auto-{millis}-{seq}")
    }

    /// Resolves a symbol's filters, validation step 1 (`UNKNOWN_SYMBOL`)
    /// included. A symbol the adapter explicitly reports as unconfigured
    /// is rejected; any other fetch failure (timeout, transport error)
    /// falls back to conservative default filters with a logged warning
    /// rather than blocking validation (spec.md §4.6).
    async fn resolve_filters(&self, symbol: &str) -> Result<SymbolFilters, RouterError> {
        if let Some(existing) = self.filters_cache.read().get(symbol).copied() {
            return Ok(existing);
        }
        let filters = match self.adapter.get_symbol_info(symbol).await {
            Ok(f) => f,
            Err(RouterError::UnknownSymbol(symbol)) => return Err(RouterError::UnknownSymbol(symbol)),
            Err(err) => {
                tracing::warn!(symbol = %symbol, error = %err, "filter-info fetch failed, using conservative defaults");
                SymbolFilters::conservative_default()
            }
        };
        self.filters_cache.write().insert(symbol.to_string(), filters);
        Ok(filters)
    }

    fn validate_and_round(
        &self,
        request: &OrderRequest,
        filters: &SymbolFilters,
        reference_price: Decimal,
    ) -> Result<(Decimal, Option<Decimal>), FilterRejection> {
        let rounded_qty = filters.round_quantity(request.quantity);
        let rounded_price = request.price.map(|p| filters.round_price(p));
        match filters.validate(rounded_qty, rounded_price, reference_price) {
            Some(rejection) => Err(rejection),
            None => Ok((rounded_qty, rounded_price)),
        }
    }

    fn rejection_result(&self, coid: &str, rejection: &FilterRejection) -> OrderResult {
        OrderResult {
            order_id: String::new(),
            client_order_id: coid.to_string(),
            status: OrderStatus::Rejected,
            executed_qty: Decimal::ZERO,
            cumm_quote_cost: Decimal::ZERO,
            fills: vec![],
            server_time_ns: self.clock.now_ns(),
            raw: serde_json::json!({"code": rejection.code, "reason": rejection.reason}),
        }
    }

    /// Reconstructs an `OrderResult` from a cached idempotency record. A
    /// `result` that fails to deserialize as a full `OrderResult` is
    /// treated as a degraded HIT (spec.md §9, Open Question 1): the raw
    /// status is returned with empty fills rather than dropping the
    /// record as if it had never existed.
    fn result_from_record(&self, coid: &str, record: &crate::idempotency::IdempotencyRecord) -> OrderResult {
        if let Some(value) = &record.result {
            if let Ok(result) = serde_json::from_value::<OrderResult>(value.clone()) {
                return result;
            }
        }
        OrderResult {
            order_id: String::new(),
            client_order_id: coid.to_string(),
            status: record.status,
            executed_qty: Decimal::ZERO,
            cumm_quote_cost: Decimal::ZERO,
            fills: vec![],
            server_time_ns: record.updated_ns,
            raw: record.result.clone().unwrap_or(serde_json::Value::Null),
        }
    }

    pub async fn place_order_idempotent(&self, mut request: OrderRequest) -> Result<OrderResult, RouterError> {
        let spec_hash = request.spec_hash();
        let coid = request
            .client_order_id
            .clone()
            .unwrap_or_else(|| self.generate_coid());
        request.client_order_id = Some(coid.clone());

        match self.guard.pre_submit_check(&coid, &spec_hash, IdempotencyGuard::default_ttl_s())? {
            PreSubmitOutcome::Hit(record) => return Ok(self.result_from_record(&coid, &record)),
            PreSubmitOutcome::Fresh => {}
        }

        let filters = match self.resolve_filters(&request.symbol).await {
            Ok(filters) => filters,
            Err(err) => {
                self.guard.mark_status(
                    &coid,
                    &spec_hash,
                    OrderStatus::Rejected,
                    3600.0,
                    Some(serde_json::json!({"code": "UNKNOWN_SYMBOL", "reason": err.to_string()})),
                )?;
                return Err(err);
            }
        };
        let reference_price = request.price.unwrap_or(filters.price_min.max(Decimal::ONE));
        match self.validate_and_round(&request, &filters, reference_price) {
            Ok((rounded_qty, rounded_price)) => {
                match self
                    .adapter
                    .place_order(&request, rounded_qty, rounded_price)
                    .await
                {
                    Ok(result) => {
                        let raw = serde_json::to_value(&result)
                            .map_err(|e| RouterError::Transport(e.to_string()))?;
                        self.guard
                            .mark_status(&coid, &spec_hash, result.status, 3600.0, Some(raw))?;
                        Ok(result)
                    }
                    Err(err) => {
                        self.guard
                            .mark_status(&coid, &spec_hash, OrderStatus::Error, 3600.0, None)?;
                        Err(err)
                    }
                }
            }
            Err(rejection) => {
                let result = self.rejection_result(&coid, &rejection);
                let raw = serde_json::to_value(&result).map_err(|e| RouterError::Transport(e.to_string()))?;
                self.guard
                    .mark_status(&coid, &spec_hash, OrderStatus::Rejected, 3600.0, Some(raw))?;
                Err(RouterError::Rejected {
                    code: rejection.code,
                    reason: rejection.reason,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::events::RecordingEventSink;
    use crate::idempotency::store::MemoryStore;
    use crate::idempotency::IdempotencyStore as _;
    use rust_decimal_macros::dec;

    fn router() -> (OrderRouter, Arc<ShadowExchange>) {
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(0));
        let store: Arc<dyn IdempotencyStore> = Arc::new(MemoryStore::new(clock.clone()));
        let sink = Arc::new(RecordingEventSink::new());
        let guard = IdempotencyGuard::new(store, clock.clone(), sink);
        let exchange = Arc::new(ShadowExchange::new(ShadowExchangeConfig::default(), clock.clone()));
        exchange.register_symbol(
            "BTCUSDT",
            SymbolFilters {
                lot_min_qty: dec!(0.001),
                lot_max_qty: dec!(1000),
                lot_step: dec!(0.001),
                price_min: dec!(0.01),
                price_max: dec!(9_000_000),
                price_tick: dec!(0.01),
                min_notional: dec!(10),
            },
        );
        (OrderRouter::new(exchange.clone(), guard, clock), exchange)
    }

    fn request(coid: &str) -> OrderRequest {
        OrderRequest {
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            quantity: dec!(0.001),
            price: Some(dec!(50000)),
            time_in_force: TimeInForce::Gtc,
            client_order_id: Some(coid.to_string()),
        }
    }

    #[tokio::test]
    async fn duplicate_submit_is_a_hit_not_a_second_exchange_call() {
        let (router, exchange) = router();
        let first = router.place_order_idempotent(request("ord-1")).await.unwrap();
        let second = router.place_order_idempotent(request("ord-1")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(exchange.call_count(), 1);
    }

    #[tokio::test]
    async fn conflicting_spec_hash_is_rejected_without_a_call() {
        let (router, exchange) = router();
        router.place_order_idempotent(request("ord-2")).await.unwrap();
        let mut conflicting = request("ord-2");
        conflicting.quantity = dec!(0.002);
        let err = router.place_order_idempotent(conflicting).await.unwrap_err();
        assert!(matches!(err, RouterError::Idempotency(IdempotencyError::Conflict { .. })));
        assert_eq!(exchange.call_count(), 1);
    }

    #[tokio::test]
    async fn below_lot_min_is_rejected_and_cached() {
        let (router, exchange) = router();
        let mut req = request("ord-3");
        req.quantity = dec!(0.0001);
        let err = router.place_order_idempotent(req.clone()).await.unwrap_err();
        assert!(matches!(err, RouterError::Rejected { code: "LOT_SIZE", .. }));
        // Retrying the identical (now-rejected, terminal) request returns
        // the cached rejection rather than calling the exchange again.
        let cached = router.place_order_idempotent(req).await.unwrap();
        assert_eq!(cached.status, OrderStatus::Rejected);
        assert_eq!(exchange.call_count(), 0);
    }
}
