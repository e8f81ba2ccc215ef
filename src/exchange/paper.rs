//! Dry-run venue
//!
//! Keeps orders and positions in memory so the engine can run end to end
//! without touching a real exchange:
//! - market orders fill immediately at the current ticker
//! - post-only limit orders that would take liquidity are canceled with `retry`
//! - resting limit and stop orders fill once a ticker crosses them
//! - queued rejections and failures simulate venue hiccups

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use super::utils::nearest_size;
use super::{Exchange, OrderBag};
use crate::config::ExchangeConfig;
use crate::domain::{
    ExchangeOrder, ExchangeOrderStatus, Order, OrderType, OrderUpdate, Position, Side,
    SubmitOutcome, Ticker,
};
use crate::error::{PairSyncError, Result};
use crate::services::Tickers;

/// Scripted response for the next submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scripted {
    Reject { retry: bool },
    Fail,
}

/// Call counters
#[derive(Debug, Default)]
pub struct PaperStats {
    pub submitted: AtomicU64,
    pub updated: AtomicU64,
    pub canceled: AtomicU64,
    pub filled: AtomicU64,
}

impl PaperStats {
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::SeqCst)
    }

    pub fn updated(&self) -> u64 {
        self.updated.load(Ordering::SeqCst)
    }

    pub fn canceled(&self) -> u64 {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn filled(&self) -> u64 {
        self.filled.load(Ordering::SeqCst)
    }
}

/// In-memory venue implementing `Exchange`
pub struct PaperExchange {
    config: ExchangeConfig,
    tickers: Arc<Tickers>,
    orders: OrderBag,
    positions: RwLock<HashMap<String, Position>>,
    script: Mutex<VecDeque<Scripted>>,
    stats: PaperStats,
}

impl PaperExchange {
    pub fn new(config: ExchangeConfig, tickers: Arc<Tickers>) -> Self {
        Self {
            config,
            tickers,
            orders: OrderBag::new(),
            positions: RwLock::new(HashMap::new()),
            script: Mutex::new(VecDeque::new()),
            stats: PaperStats::default(),
        }
    }

    pub fn stats(&self) -> &PaperStats {
        &self.stats
    }

    pub fn order_bag(&self) -> &OrderBag {
        &self.orders
    }

    /// Reject the next submission; `retry` marks the rejection transient
    pub async fn queue_rejection(&self, retry: bool) {
        self.script.lock().await.push_back(Scripted::Reject { retry });
    }

    /// Fail the next submission with an error
    pub async fn queue_failure(&self) {
        self.script.lock().await.push_back(Scripted::Fail);
    }

    /// Block order submission until the returned guard is dropped
    #[cfg(test)]
    pub(crate) async fn hold_submissions(&self) -> impl Send + '_ {
        self.script.lock().await
    }

    /// Block position queries until the returned guard is dropped
    #[cfg(test)]
    pub(crate) async fn hold_positions(&self) -> impl Send + '_ {
        self.positions.write().await
    }

    pub async fn set_position(&self, position: Position) {
        self.positions
            .write()
            .await
            .insert(position.symbol.clone(), position);
    }

    pub async fn remove_position(&self, symbol: &str) -> Option<Position> {
        self.positions.write().await.remove(symbol)
    }

    /// Place an open order directly into the book, bypassing submission rules
    pub fn inject_order(&self, order: ExchangeOrder) {
        self.orders.triggered_order(order);
    }

    /// Fill a resting order at its own price
    pub async fn fill_order(&self, id: &str) -> Result<ExchangeOrder> {
        let order = self
            .orders
            .get(id)
            .filter(|o| o.is_open())
            .ok_or_else(|| PairSyncError::OrderNotFound(id.to_string()))?;

        let price = order.price;
        Ok(self.fill(order, price).await)
    }

    /// Fill every resting order the current tickers cross
    pub async fn match_resting_orders(&self) -> Vec<ExchangeOrder> {
        let mut filled = Vec::new();

        for order in self.orders.open_orders() {
            let Some(ticker) = self.tickers.get(&self.config.name, &order.symbol) else {
                continue;
            };

            if let Some(price) = crossing_price(&order, &ticker) {
                filled.push(self.fill(order, price).await);
            }
        }

        filled
    }

    fn new_exchange_order(
        &self,
        order: &Order,
        status: ExchangeOrderStatus,
        price: Decimal,
        amount: Decimal,
        retry: bool,
    ) -> ExchangeOrder {
        let now = Utc::now();
        ExchangeOrder {
            id: Uuid::new_v4().to_string(),
            symbol: order.symbol.clone(),
            status,
            price: price.abs(),
            amount: amount.abs(),
            retry,
            our_id: Some(order.id.clone()),
            side: order.side,
            order_type: order.order_type,
            created_at: now,
            updated_at: now,
            raw: serde_json::json!({ "venue": self.config.name, "options": order.options }),
        }
    }

    async fn fill(&self, order: ExchangeOrder, price: Decimal) -> ExchangeOrder {
        let reduce_only = order.order_type == OrderType::Stop
            || order.raw["options"]["reduce_only"].as_bool().unwrap_or(false);

        self.apply_fill(&order.symbol, order.signed_amount(), price, reduce_only)
            .await;

        let filled = ExchangeOrder {
            status: ExchangeOrderStatus::Done,
            updated_at: Utc::now(),
            ..order
        };

        self.orders.triggered_order(filled.clone());
        self.stats.filled.fetch_add(1, Ordering::SeqCst);

        info!(
            "Paper {}: filled {} {} {} @ {}",
            self.config.name, filled.symbol, filled.side, filled.amount, price
        );

        filled
    }

    /// Move the position by a signed amount
    async fn apply_fill(&self, symbol: &str, delta: Decimal, price: Decimal, reduce_only: bool) {
        let mut positions = self.positions.write().await;
        let current = positions.get(symbol).cloned();
        let held = current.as_ref().map(|p| p.amount).unwrap_or(Decimal::ZERO);

        let mut delta = delta;
        if reduce_only {
            // never grow or flip a position
            if held.is_zero() || held.is_sign_positive() == delta.is_sign_positive() {
                return;
            }
            if delta.abs() > held.abs() {
                delta = -held;
            }
        }

        let next = held + delta;
        if next.is_zero() {
            positions.remove(symbol);
            return;
        }

        let side = if next > Decimal::ZERO { Side::Long } else { Side::Short };
        let entry = match current {
            // increasing in the same direction: volume weighted entry
            Some(ref p) if p.side == side && next.abs() > held.abs() => p
                .entry
                .map(|e| (e * held.abs() + price * delta.abs()) / next.abs())
                .or(Some(price)),
            Some(ref p) if p.side == side => p.entry,
            _ => Some(price),
        };
        let created_at = current
            .as_ref()
            .filter(|p| p.side == side)
            .map(|p| p.created_at)
            .unwrap_or_else(Utc::now);

        if let Ok(position) = Position::new(symbol, side, next, None, entry, created_at) {
            positions.insert(symbol.to_string(), position);
        }
    }
}

/// Price at which a resting order executes against the ticker, if it does
fn crossing_price(order: &ExchangeOrder, ticker: &Ticker) -> Option<Decimal> {
    match (order.order_type, order.side) {
        (OrderType::Limit, Side::Long) if ticker.ask <= order.price => Some(order.price),
        (OrderType::Limit, Side::Short) if ticker.bid >= order.price => Some(order.price),
        (OrderType::Stop, Side::Long) if ticker.ask >= order.price => Some(ticker.ask),
        (OrderType::Stop, Side::Short) if ticker.bid <= order.price => Some(ticker.bid),
        _ => None,
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn order(&self, order: &Order) -> Result<SubmitOutcome> {
        self.stats.submitted.fetch_add(1, Ordering::SeqCst);

        let amount = order
            .amount
            .ok_or_else(|| PairSyncError::exchange(&self.config.name, "order without amount"))?;
        let ticker = self.tickers.get(&self.config.name, &order.symbol);

        match self.script.lock().await.pop_front() {
            Some(Scripted::Fail) => {
                return Err(PairSyncError::exchange(&self.config.name, "simulated venue failure"));
            }
            Some(Scripted::Reject { retry }) => {
                let status = if retry {
                    ExchangeOrderStatus::Canceled
                } else {
                    ExchangeOrderStatus::Rejected
                };
                let price = order.price.unwrap_or(Decimal::ZERO);
                let rejected = self.new_exchange_order(order, status, price, amount, retry);
                self.orders.triggered_order(rejected.clone());
                return Ok(rejected.classify());
            }
            None => {}
        }

        if order.order_type == OrderType::Market {
            let ticker = ticker.ok_or_else(|| {
                PairSyncError::exchange(&self.config.name, format!("no ticker for {}", order.symbol))
            })?;
            let price = match order.side {
                Side::Long => ticker.ask,
                Side::Short => ticker.bid,
            };

            let accepted =
                self.new_exchange_order(order, ExchangeOrderStatus::Open, price, amount, false);
            let filled = self.fill(accepted, price).await;
            return Ok(SubmitOutcome::Accepted(filled));
        }

        let price = order
            .price()
            .ok_or_else(|| PairSyncError::exchange(&self.config.name, "limit order without price"))?;

        // post-only orders must not take liquidity
        let would_take = match (&ticker, order.side) {
            (Some(t), Side::Long) => price >= t.ask,
            (Some(t), Side::Short) => price <= t.bid,
            (None, _) => false,
        };
        if order.order_type == OrderType::Limit && order.is_post_only() && would_take {
            debug!(
                "Paper {}: post-only {} {} @ {} would take liquidity",
                self.config.name, order.symbol, order.side, price
            );
            let canceled =
                self.new_exchange_order(order, ExchangeOrderStatus::Canceled, price, amount, true);
            self.orders.triggered_order(canceled.clone());
            return Ok(canceled.classify());
        }

        let open = self.new_exchange_order(order, ExchangeOrderStatus::Open, price, amount, false);
        self.orders.triggered_order(open.clone());
        Ok(SubmitOutcome::Accepted(open))
    }

    async fn cancel_order(&self, id: &str) -> Result<Option<ExchangeOrder>> {
        let Some(order) = self.orders.find_order_by_id(id).filter(|o| o.is_open()) else {
            return Ok(None);
        };

        let canceled = ExchangeOrder {
            status: ExchangeOrderStatus::Canceled,
            updated_at: Utc::now(),
            ..order
        };
        self.orders.triggered_order(canceled.clone());
        self.stats.canceled.fetch_add(1, Ordering::SeqCst);

        Ok(Some(canceled))
    }

    async fn cancel_all(&self, symbol: &str) -> Result<Vec<ExchangeOrder>> {
        let mut canceled = Vec::new();
        for order in self.orders.open_orders_for_symbol(symbol) {
            if let Some(order) = self.cancel_order(&order.id).await? {
                canceled.push(order);
            }
        }
        Ok(canceled)
    }

    async fn update_order(&self, id: &str, update: &OrderUpdate) -> Result<ExchangeOrder> {
        let order = self
            .orders
            .find_order_by_id(id)
            .filter(|o| o.is_open())
            .ok_or_else(|| PairSyncError::OrderNotFound(id.to_string()))?;

        let updated = ExchangeOrder {
            price: update.price.map(|p| p.abs()).unwrap_or(order.price),
            amount: update.amount.map(|a| a.abs()).unwrap_or(order.amount),
            updated_at: Utc::now(),
            ..order
        };
        self.orders.triggered_order(updated.clone());
        self.stats.updated.fetch_add(1, Ordering::SeqCst);

        Ok(updated)
    }

    async fn find_order_by_id(&self, id: &str) -> Result<Option<ExchangeOrder>> {
        Ok(self.orders.find_order_by_id(id))
    }

    async fn get_orders(&self) -> Result<Vec<ExchangeOrder>> {
        Ok(self.orders.open_orders())
    }

    async fn get_orders_for_symbol(&self, symbol: &str) -> Result<Vec<ExchangeOrder>> {
        Ok(self.orders.open_orders_for_symbol(symbol))
    }

    async fn get_positions(&self) -> Result<Vec<Position>> {
        Ok(self.positions.read().await.values().cloned().collect())
    }

    async fn get_position_for_symbol(&self, symbol: &str) -> Result<Option<Position>> {
        Ok(self.positions.read().await.get(symbol).cloned())
    }

    fn calculate_price(&self, price: Decimal, symbol: &str) -> Option<Decimal> {
        let rounded = nearest_size(price, self.config.symbol_spec(symbol).tick_size);
        (!rounded.is_zero()).then_some(rounded)
    }

    fn calculate_amount(&self, amount: Decimal, symbol: &str) -> Option<Decimal> {
        let rounded = nearest_size(amount, self.config.symbol_spec(symbol).lot_size);
        (!rounded.is_zero()).then_some(rounded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn venue() -> (PaperExchange, Arc<Tickers>) {
        let tickers = Arc::new(Tickers::new());
        tickers.set(Ticker::new("paper", "BTCUSD", dec!(99), dec!(101)));
        (PaperExchange::new(ExchangeConfig::new("paper"), tickers.clone()), tickers)
    }

    #[tokio::test]
    async fn test_market_order_opens_position() {
        let (paper, _) = venue();
        let outcome = paper.order(&Order::market("BTCUSD", dec!(-2)).unwrap()).await.unwrap();

        let order = outcome.into_exchange_order();
        assert!(order.is_done());
        let position = paper.get_position_for_symbol("BTCUSD").await.unwrap().unwrap();
        assert_eq!(position.amount, dec!(-2));
        assert_eq!(position.entry, Some(dec!(99)));
    }

    #[tokio::test]
    async fn test_crossing_post_only_is_retryable() {
        let (paper, _) = venue();
        let order = Order::limit_post_only("BTCUSD", Side::Long, dec!(101), dec!(1)).unwrap();
        assert!(matches!(
            paper.order(&order).await.unwrap(),
            SubmitOutcome::RetryableRejection(_)
        ));
    }

    #[tokio::test]
    async fn test_resting_order_fills_when_crossed() {
        let (paper, tickers) = venue();
        let order = Order::limit_post_only("BTCUSD", Side::Long, dec!(99), dec!(1)).unwrap();
        paper.order(&order).await.unwrap();
        assert!(paper.match_resting_orders().await.is_empty());

        tickers.set(Ticker::new("paper", "BTCUSD", dec!(97), dec!(98)));
        assert_eq!(paper.match_resting_orders().await.len(), 1);

        let position = paper.get_position_for_symbol("BTCUSD").await.unwrap().unwrap();
        assert_eq!(position.amount, dec!(1));
        assert!(paper.get_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reduce_only_never_flips() {
        let (paper, _) = venue();
        paper.order(&Order::market("BTCUSD", dec!(1)).unwrap()).await.unwrap();
        paper
            .order(&Order::market_close("BTCUSD", dec!(-3)).unwrap())
            .await
            .unwrap();

        assert!(paper.get_position_for_symbol("BTCUSD").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scripted_responses() {
        let (paper, _) = venue();
        paper.queue_failure().await;
        paper.queue_rejection(false).await;

        let order = Order::limit_post_only("BTCUSD", Side::Long, dec!(95), dec!(1)).unwrap();
        assert!(paper.order(&order).await.is_err());
        assert!(matches!(
            paper.order(&order).await.unwrap(),
            SubmitOutcome::PermanentRejection(_)
        ));
        assert!(paper.order(&order).await.unwrap().is_accepted());
        assert_eq!(paper.stats().submitted(), 3);
    }
}
