//! Exchange adapters: an abstract async boundary (spec.md §5, §6) with a
//! shadow (simulated) backend and a live HTTP backend. Grounded on
//! `original_source/core/execution/shadow_broker.py` (validation/simulated
//! fill behavior) and
//! `cooprefr-bettersys/rust-backend/src/vault/execution.rs`'s
//! `ExecutionAdapter`/`PaperExecutionAdapter` trait-object pattern.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::clock::Clock;
use crate::idempotency::OrderStatus;

use super::{Fill, OrderRequest, OrderResult, OrderType, RouterError, SymbolFilters, TimeInForce};

/// The abstract exchange boundary spec.md §6 names: fetch a symbol's
/// filters, place an order. The only suspension points in the whole core
/// (spec.md §5) live behind this trait.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolFilters, RouterError>;
    async fn place_order(
        &self,
        request: &OrderRequest,
        rounded_qty: Decimal,
        rounded_price: Option<Decimal>,
    ) -> Result<OrderResult, RouterError>;
}

#[derive(Debug, Clone, Copy)]
pub struct ShadowExchangeConfig {
    /// Slippage applied to MARKET fills, in basis points.
    pub slippage_bps: f64,
    /// IOC orders larger than this quantity only partially fill.
    pub ioc_partial_fill_threshold_qty: Decimal,
    /// Fraction of quantity filled when an IOC order triggers a partial.
    pub ioc_fill_ratio: Decimal,
    /// FOK orders larger than this quantity are rejected outright.
    pub fok_reject_qty_threshold: Decimal,
    /// Fallback reference price used for MARKET fills and notional checks
    /// when no limit price is given.
    pub reference_price: Decimal,
}

impl Default for ShadowExchangeConfig {
    fn default() -> Self {
        Self {
            slippage_bps: 2.0,
            ioc_partial_fill_threshold_qty: dec!(1.0),
            ioc_fill_ratio: dec!(0.7),
            fok_reject_qty_threshold: dec!(10.0),
            reference_price: dec!(50000),
        }
    }
}

/// Simulates fills without touching a real venue (spec.md §4.6). Holds its
/// own symbol-filter registry, populated by the caller via
/// `register_symbol` (the "we know this market" universe) rather than a
/// live exchange-info fetch.
pub struct ShadowExchange {
    config: ShadowExchangeConfig,
    filters: parking_lot::RwLock<HashMap<String, SymbolFilters>>,
    order_seq: AtomicU64,
    order_calls: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl ShadowExchange {
    pub fn new(config: ShadowExchangeConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            filters: parking_lot::RwLock::new(HashMap::new()),
            order_seq: AtomicU64::new(0),
            order_calls: AtomicU64::new(0),
            clock,
        }
    }

    pub fn register_symbol(&self, symbol: &str, filters: SymbolFilters) {
        self.filters.write().insert(symbol.to_string(), filters);
    }

    /// Number of `place_order` invocations observed so far (spec.md §8's
    /// "total exchange calls observed" assertions).
    pub fn call_count(&self) -> u64 {
        self.order_calls.load(Ordering::Relaxed)
    }

    fn next_order_id(&self) -> String {
        let seq = self.order_seq.fetch_add(1, Ordering::Relaxed);
        format!("SHADOW-{}-{seq}", self.clock.now_ns() / 1_000_000)
    }
}

#[async_trait]
impl ExchangeAdapter for ShadowExchange {
    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolFilters, RouterError> {
        self.filters
            .read()
            .get(symbol)
            .copied()
            .ok_or_else(|| RouterError::UnknownSymbol(symbol.to_string()))
    }

    async fn place_order(
        &self,
        request: &OrderRequest,
        rounded_qty: Decimal,
        rounded_price: Option<Decimal>,
    ) -> Result<OrderResult, RouterError> {
        self.order_calls.fetch_add(1, Ordering::Relaxed);

        let fill_price = match request.order_type {
            OrderType::Market => {
                let slippage = Decimal::try_from(self.config.slippage_bps / 10_000.0).unwrap_or(Decimal::ZERO);
                let reference = rounded_price.unwrap_or(self.config.reference_price);
                match request.side {
                    crate::types::Side::Buy => reference * (Decimal::ONE + slippage),
                    crate::types::Side::Sell => reference * (Decimal::ONE - slippage),
                }
            }
            _ => rounded_price.unwrap_or(self.config.reference_price),
        };

        let mut filled_qty = rounded_qty;
        if request.time_in_force == TimeInForce::Ioc && rounded_qty > self.config.ioc_partial_fill_threshold_qty {
            filled_qty = rounded_qty * self.config.ioc_fill_ratio;
        }
        if request.time_in_force == TimeInForce::Fok && rounded_qty > self.config.fok_reject_qty_threshold {
            return Ok(OrderResult {
                order_id: self.next_order_id(),
                client_order_id: request.client_order_id.clone().unwrap_or_default(),
                status: OrderStatus::Rejected,
                executed_qty: Decimal::ZERO,
                cumm_quote_cost: Decimal::ZERO,
                fills: vec![],
                server_time_ns: self.clock.now_ns(),
                raw: serde_json::json!({"code": "FOK_INSUFFICIENT_LIQUIDITY"}),
            });
        }

        let status = if filled_qty < rounded_qty {
            OrderStatus::Partial
        } else {
            OrderStatus::Filled
        };
        let commission = filled_qty * fill_price * dec!(0.001);
        let fill = Fill {
            price: fill_price,
            qty: filled_qty,
            commission,
            commission_asset: "BNB".to_string(),
            trade_id: format!("T{}", self.clock.now_ns()),
        };

        Ok(OrderResult {
            order_id: self.next_order_id(),
            client_order_id: request.client_order_id.clone().unwrap_or_default(),
            status,
            executed_qty: filled_qty,
            cumm_quote_cost: filled_qty * fill_price,
            fills: vec![fill],
            server_time_ns: self.clock.now_ns(),
            raw: serde_json::json!({"simulated": true}),
        })
    }
}

/// Live HTTP backend. The wire format is intentionally left minimal and
/// venue-specific details (auth headers, endpoint paths) are left to
/// callers that construct one per venue; the core's contract with it is
/// exactly the `ExchangeAdapter` trait (spec.md §6 — the core is
/// protocol-agnostic).
#[derive(Clone)]
pub struct LiveExchange {
    client: reqwest::Client,
    base_url: String,
}

impl LiveExchange {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ExchangeAdapter for LiveExchange {
    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolFilters, RouterError> {
        let url = format!("{}/symbols/{symbol}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RouterError::Transport(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(RouterError::UnknownSymbol(symbol.to_string()));
        }
        response
            .error_for_status()
            .map_err(|e| RouterError::Transport(e.to_string()))?
            .json::<WireSymbolFilters>()
            .await
            .map(Into::into)
            .map_err(|e| RouterError::Transport(e.to_string()))
    }

    async fn place_order(
        &self,
        request: &OrderRequest,
        rounded_qty: Decimal,
        rounded_price: Option<Decimal>,
    ) -> Result<OrderResult, RouterError> {
        let mut body = serde_json::to_value(request).map_err(|e| RouterError::Transport(e.to_string()))?;
        body["quantity"] = serde_json::Value::String(rounded_qty.to_string());
        if let Some(price) = rounded_price {
            body["price"] = serde_json::Value::String(price.to_string());
        }

        let url = format!("{}/orders", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RouterError::Transport(e.to_string()))?;
        response
            .error_for_status()
            .map_err(|e| RouterError::Transport(e.to_string()))?
            .json::<OrderResult>()
            .await
            .map_err(|e| RouterError::Transport(e.to_string()))
    }
}

/// Serde shape for a live venue's symbol-info response; decoupled from
/// `SymbolFilters` so wire field renames don't leak into the domain type.
#[derive(serde::Deserialize)]
struct WireSymbolFilters {
    lot_min_qty: Decimal,
    lot_max_qty: Decimal,
    lot_step: Decimal,
    price_min: Decimal,
    price_max: Decimal,
    price_tick: Decimal,
    min_notional: Decimal,
}

impl From<WireSymbolFilters> for SymbolFilters {
    fn from(w: WireSymbolFilters) -> Self {
        Self {
            lot_min_qty: w.lot_min_qty,
            lot_max_qty: w.lot_max_qty,
            lot_step: w.lot_step,
            price_min: w.price_min,
            price_max: w.price_max,
            price_tick: w.price_tick,
            min_notional: w.min_notional,
        }
    }
}
