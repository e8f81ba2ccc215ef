//! Order executor
//!
//! Submits engine orders to a venue, resubmitting transient rejections with a
//! fresh id and a fresh front-of-book price, and keeps resting auto-priced
//! orders at the front of the book.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::ExecutionConfig;
use crate::domain::{ExchangeOrder, Order, OrderType, OrderUpdate, Side, SubmitOutcome};
use crate::error::Result;
use crate::exchange::{Exchange, ExchangeManager};
use crate::services::Tickers;

/// Resting order submitted through the executor
#[derive(Debug, Clone)]
pub struct ManagedOrder {
    pub exchange: String,
    pub order: Order,
    pub exchange_order: ExchangeOrder,
    pub submitted_at: DateTime<Utc>,
}

/// Executes orders against the registered venues
pub struct OrderExecutor {
    exchanges: Arc<ExchangeManager>,
    tickers: Arc<Tickers>,
    config: ExecutionConfig,
    /// Keyed by venue order id
    managed: RwLock<HashMap<String, ManagedOrder>>,
    /// Orders currently being re-priced, with the time the lock was taken
    adjusting: DashMap<String, Instant>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl OrderExecutor {
    pub fn new(exchanges: Arc<ExchangeManager>, tickers: Arc<Tickers>, config: ExecutionConfig) -> Self {
        Self {
            exchanges,
            tickers,
            config,
            managed: RwLock::new(HashMap::new()),
            adjusting: DashMap::new(),
            shutdown: None,
        }
    }

    /// Abort retry backoffs once the shutdown flag flips
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Submit an order and resubmit it while the venue answers with a
    /// retryable rejection, up to `max_retries` times.
    ///
    /// `None` means the order never reached a definite outcome (unknown
    /// exchange, missing ticker, rounding to zero, venue error). Every such
    /// case is logged here.
    pub async fn execute_order(&self, exchange_name: &str, order: &Order) -> Option<SubmitOutcome> {
        let Some(exchange) = self.exchanges.get(exchange_name) else {
            error!("Order {}: unknown exchange {}", order.id, exchange_name);
            return None;
        };

        let mut order = self.prepare(exchange.as_ref(), exchange_name, order.clone())?;
        let mut attempt: u32 = 0;

        loop {
            let outcome = match exchange.order(&order).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(
                        "Order {} on {}:{} failed: {}",
                        order.id, exchange_name, order.symbol, e
                    );
                    return None;
                }
            };

            let retryable = matches!(outcome, SubmitOutcome::RetryableRejection(_));
            if !retryable || attempt >= self.config.max_retries {
                self.on_outcome(exchange_name, &order, &outcome).await;
                return Some(outcome);
            }

            attempt += 1;
            warn!(
                "Order {} on {}:{} rejected as retryable, attempt {}/{}",
                order.id, exchange_name, order.symbol, attempt, self.config.max_retries
            );

            if !self.backoff().await {
                info!("Shutdown requested, order {} not resubmitted", order.id);
                return Some(outcome);
            }

            let price = if order.has_adjusted_price() {
                self.get_current_price(exchange_name, &order.symbol, order.side)
            } else {
                None
            };

            let next = match order.retry(price, None) {
                Ok(next) => next,
                Err(e) => {
                    warn!("Order {} could not be rebuilt for retry: {}", order.id, e);
                    return Some(outcome);
                }
            };

            order = match self.prepare(exchange.as_ref(), exchange_name, next) {
                Some(next) => next,
                None => return Some(outcome),
            };
        }
    }

    async fn on_outcome(&self, exchange_name: &str, order: &Order, outcome: &SubmitOutcome) {
        let exchange_order = outcome.exchange_order();

        match outcome {
            SubmitOutcome::Accepted(accepted) => {
                info!(
                    "Order {} on {}:{} accepted as {} ({})",
                    order.id, exchange_name, order.symbol, accepted.id, accepted.status.as_str()
                );

                if accepted.is_open() {
                    self.managed.write().await.insert(
                        accepted.id.clone(),
                        ManagedOrder {
                            exchange: exchange_name.to_string(),
                            order: order.clone(),
                            exchange_order: accepted.clone(),
                            submitted_at: Utc::now(),
                        },
                    );
                }
            }
            SubmitOutcome::RetryableRejection(_) => {
                warn!(
                    "Order {} on {}:{} still rejected after {} retries",
                    order.id, exchange_name, order.symbol, self.config.max_retries
                );
            }
            SubmitOutcome::PermanentRejection(_) => {
                warn!(
                    "Order {} on {}:{} rejected ({})",
                    order.id,
                    exchange_name,
                    order.symbol,
                    exchange_order.status.as_str()
                );
            }
        }
    }

    /// Fill in the price of auto-priced orders and round to venue precision
    fn prepare(&self, exchange: &dyn Exchange, exchange_name: &str, order: Order) -> Option<Order> {
        let mut order = order;

        if order.has_adjusted_price() && order.price.is_none() && order.order_type != OrderType::Market {
            let Some(price) = self.get_current_price(exchange_name, &order.symbol, order.side) else {
                warn!(
                    "Order {}: no ticker for {}:{}, cannot price",
                    order.id, exchange_name, order.symbol
                );
                return None;
            };

            order = match order.with_price(price) {
                Ok(order) => order,
                Err(e) => {
                    warn!("Order {}: {}", order.id, e);
                    return None;
                }
            };
        }

        if let Some(amount) = order.amount() {
            let Some(rounded) = exchange.calculate_amount(amount, &order.symbol) else {
                warn!(
                    "Order {}: amount {} rounds to nothing on {}",
                    order.id, amount, exchange_name
                );
                return None;
            };
            order = order.with_amount(order.side.signed(rounded)).ok()?;
        }

        if let Some(price) = order.price() {
            let Some(rounded) = exchange.calculate_price(price, &order.symbol) else {
                warn!(
                    "Order {}: price {} rounds to nothing on {}",
                    order.id, price, exchange_name
                );
                return None;
            };
            order = order.with_price(order.side.signed(rounded)).ok()?;
        }

        Some(order)
    }

    /// Sleep for the retry backoff; false when shutdown interrupted it
    async fn backoff(&self) -> bool {
        let delay = Duration::from_millis(self.config.retry_backoff_ms);

        let Some(mut shutdown) = self.shutdown.clone() else {
            sleep(delay).await;
            return true;
        };

        if *shutdown.borrow() {
            return false;
        }

        tokio::select! {
            _ = sleep(delay) => true,
            changed = shutdown.changed() => match changed {
                Ok(()) => !*shutdown.borrow(),
                // sender gone, nobody can request a shutdown anymore
                Err(_) => {
                    sleep(delay).await;
                    true
                }
            },
        }
    }

    /// Re-price every managed auto-priced order that drifted off the front of
    /// the book. Returns the orders the venue accepted an update for.
    ///
    /// Every managed order is re-validated on the way, so orders that left
    /// the venue (filled stops, externally canceled targets) stop being managed.
    pub async fn adjust_open_orders_price(&self) -> Vec<ExchangeOrder> {
        let candidates: Vec<ManagedOrder> =
            self.managed.read().await.values().cloned().collect();

        if candidates.is_empty() {
            return Vec::new();
        }

        debug!("Adjusting price of {} managed orders", candidates.len());

        join_all(candidates.into_iter().map(|managed| self.adjust_locked(managed)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn adjust_locked(&self, managed: ManagedOrder) -> Option<ExchangeOrder> {
        let id = managed.exchange_order.id.clone();

        if !self.try_lock_adjust(&id) {
            debug!("Order {} already being adjusted", id);
            return None;
        }

        let result = self.adjust_order(managed).await;
        self.adjusting.remove(&id);
        result
    }

    fn try_lock_adjust(&self, id: &str) -> bool {
        let ttl = Duration::from_secs(self.config.adjust_lock_ttl_secs);

        match self.adjusting.entry(id.to_string()) {
            Entry::Occupied(entry) if entry.get().elapsed() < ttl => false,
            Entry::Occupied(mut entry) => {
                entry.insert(Instant::now());
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(Instant::now());
                true
            }
        }
    }

    async fn adjust_order(&self, managed: ManagedOrder) -> Option<ExchangeOrder> {
        let id = managed.exchange_order.id.clone();
        let exchange = self.exchanges.get(&managed.exchange)?;

        let current = match exchange.find_order_by_id(&id).await {
            Ok(Some(current)) if current.is_open() => current,
            Ok(_) => {
                debug!("Managed order {} no longer open, dropping", id);
                self.managed.write().await.remove(&id);
                return None;
            }
            Err(e) => {
                warn!("Failed to look up managed order {}: {}", id, e);
                return None;
            }
        };

        if !managed.order.has_adjusted_price() {
            return None;
        }

        let symbol = &managed.order.symbol;
        let Some(ticker) =
            self.tickers
                .get_if_up_to_date(&managed.exchange, symbol, self.config.ticker_max_age_ms)
        else {
            debug!("No up to date ticker for {}:{}, skipping {}", managed.exchange, symbol, id);
            return None;
        };

        let target = exchange.calculate_price(ticker.price_for_side(managed.order.side).abs(), symbol)?;
        if target == current.price {
            return None;
        }

        let update = OrderUpdate::price(managed.order.side.signed(target));
        match exchange.update_order(&id, &update).await {
            Ok(updated) => {
                info!(
                    "Order {} {}:{} re-priced {} -> {}",
                    id, managed.exchange, symbol, current.price, target
                );

                let mut orders = self.managed.write().await;
                orders.remove(&id);
                if updated.is_open() {
                    orders.insert(
                        updated.id.clone(),
                        ManagedOrder {
                            exchange_order: updated.clone(),
                            ..managed
                        },
                    );
                }

                Some(updated)
            }
            Err(e) => {
                warn!("Failed to re-price order {}: {}", id, e);
                None
            }
        }
    }

    pub async fn cancel_order(&self, exchange_name: &str, id: &str) -> Result<Option<ExchangeOrder>> {
        let canceled = self.exchanges.get_or_err(exchange_name)?.cancel_order(id).await?;
        self.managed.write().await.remove(id);

        if canceled.is_some() {
            info!("Order {} on {} canceled", id, exchange_name);
        }

        Ok(canceled)
    }

    pub async fn cancel_all(&self, exchange_name: &str, symbol: &str) -> Result<Vec<ExchangeOrder>> {
        let canceled = self.exchanges.get_or_err(exchange_name)?.cancel_all(symbol).await?;

        self.managed
            .write()
            .await
            .retain(|_, m| !(m.exchange == exchange_name && m.order.symbol == symbol));

        if !canceled.is_empty() {
            info!("Canceled {} orders on {}:{}", canceled.len(), exchange_name, symbol);
        }

        Ok(canceled)
    }

    pub async fn update_order(
        &self,
        exchange_name: &str,
        id: &str,
        update: &OrderUpdate,
    ) -> Result<ExchangeOrder> {
        let updated = self
            .exchanges
            .get_or_err(exchange_name)?
            .update_order(id, update)
            .await?;

        let mut orders = self.managed.write().await;
        if let Some(mut managed) = orders.remove(id) {
            managed.exchange_order = updated.clone();
            orders.insert(updated.id.clone(), managed);
        }

        Ok(updated)
    }

    /// Signed front-of-book price for a side (bid for long, negated ask for short)
    pub fn get_current_price(&self, exchange_name: &str, symbol: &str, side: Side) -> Option<Decimal> {
        self.tickers.price_for_side(exchange_name, symbol, side)
    }

    pub async fn managed_orders(&self) -> Vec<ManagedOrder> {
        self.managed.read().await.values().cloned().collect()
    }

    pub async fn is_managed(&self, id: &str) -> bool {
        self.managed.read().await.contains_key(id)
    }
}
