//! Reconciliation loop
//!
//! Once per tick every desired pair state is compared against venue truth
//! (positions and open orders) and the corrective action is taken:
//! - `long` / `short`: open the position unless one already exists
//! - `close`: flatten the position
//! - `cancel`: cancel every open order and forget the pair
//!
//! Ticks never overlap: a tick that finds the previous one still running is
//! skipped and reported.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::PairStateConfig;
use crate::domain::{ExchangeOrder, Order, PairState, PairStateKind, Side, SubmitOutcome};
use crate::error::OrderError;
use crate::exchange::ExchangeManager;
use crate::state::PairStateManager;

use super::{OrderCalculator, OrderExecutor};

/// What the venue says about the order a pair state tracks
enum TrackedOrder {
    Open(ExchangeOrder),
    Gone,
    Unknown,
}

pub struct PairStateExecution {
    exchanges: Arc<ExchangeManager>,
    pair_states: Arc<PairStateManager>,
    executor: Arc<OrderExecutor>,
    calculator: Arc<OrderCalculator>,
    config: PairStateConfig,
    tick_block_threshold: Duration,
    tick_lock: Mutex<()>,
    tick_started_at: RwLock<Option<DateTime<Utc>>>,
}

impl PairStateExecution {
    pub fn new(
        exchanges: Arc<ExchangeManager>,
        pair_states: Arc<PairStateManager>,
        executor: Arc<OrderExecutor>,
        calculator: Arc<OrderCalculator>,
        config: PairStateConfig,
        tick_block_threshold: Duration,
    ) -> Self {
        Self {
            exchanges,
            pair_states,
            executor,
            calculator,
            config,
            tick_block_threshold,
            tick_lock: Mutex::new(()),
            tick_started_at: RwLock::new(None),
        }
    }

    /// Run one reconciliation pass over every pair state.
    ///
    /// Returns false when the pass was skipped because the previous one is
    /// still running.
    pub async fn on_pair_state_execution_tick(&self) -> bool {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            let started = *self.tick_started_at.read().await;
            let elapsed = started
                .map(|t| (Utc::now() - t).to_std().unwrap_or_default())
                .unwrap_or_default();

            if elapsed > self.tick_block_threshold {
                warn!(
                    "Pair state tick blocked: previous pass running for {}s",
                    elapsed.as_secs()
                );
            } else {
                debug!("Pair state tick skipped, previous pass still running");
            }
            return false;
        };

        *self.tick_started_at.write().await = Some(Utc::now());

        let pairs = self.pair_states.all();
        if !pairs.is_empty() {
            debug!("Pair state tick: {} pairs", pairs.len());
        }

        join_all(pairs.into_iter().map(|pair| self.execute_pair(pair))).await;

        *self.tick_started_at.write().await = None;
        true
    }

    async fn execute_pair(&self, pair: PairState) {
        if pair.retries > self.config.max_retries {
            warn!(
                "Pair {} exceeded {} retries ({}), canceling",
                pair.key(),
                self.config.max_retries,
                pair.retries
            );
            self.on_cancel_pair(&pair).await;
            return;
        }

        if Utc::now() - pair.time > chrono::Duration::minutes(self.config.timeout_minutes) {
            warn!(
                "Pair {} timed out after {} minutes in state {}, canceling",
                pair.key(),
                pair.age_minutes(),
                pair.state
            );
            self.on_cancel_pair(&pair).await;
            return;
        }

        match pair.state {
            PairStateKind::Cancel => self.on_cancel_pair(&pair).await,
            PairStateKind::Close => self.on_close_pair(&pair).await,
            PairStateKind::Long => self.on_sell_buy_pair(&pair, Side::Long).await,
            PairStateKind::Short => self.on_sell_buy_pair(&pair, Side::Short).await,
        }
    }

    /// Open a position on `side` unless one already exists
    pub async fn on_sell_buy_pair(&self, pair: &PairState, side: Side) {
        let (exchange, symbol) = (pair.exchange.as_str(), pair.symbol.as_str());

        let position = match self.exchanges.get_position(exchange, symbol).await {
            Ok(position) => position,
            Err(e) => {
                warn!("Pair {}: failed to fetch position: {}", pair.key(), e);
                return;
            }
        };

        if let Some(position) = position {
            info!(
                "Pair {}: position already open ({} {}), state {} done",
                pair.key(),
                position.side,
                position.amount,
                pair.state
            );
            self.pair_states.clear_if(pair);
            return;
        }

        if let Some(tracked) = &pair.exchange_order {
            if !self.keep_tracked_order(pair, tracked).await {
                return;
            }
        } else {
            let Some(size) = self.calculator.calculate_order_size(exchange, symbol) else {
                warn!("Pair {}: no order size available", pair.key());
                self.pair_states.trigger_retry(pair);
                return;
            };

            let amount = side.signed(size);
            let order = if pair.options.market {
                Order::market(symbol, amount)
            } else {
                Order::limit_post_only_auto_adjusted(symbol, amount)
            };

            self.submit(pair, order).await;
        }

        self.cancel_duplicates(pair).await;
    }

    /// Flatten the position of a pair
    pub async fn on_close_pair(&self, pair: &PairState) {
        let (exchange, symbol) = (pair.exchange.as_str(), pair.symbol.as_str());

        let position = match self.exchanges.get_position(exchange, symbol).await {
            Ok(position) => position,
            Err(e) => {
                warn!("Pair {}: failed to fetch position: {}", pair.key(), e);
                return;
            }
        };

        let Some(position) = position else {
            info!("Pair {}: no position to close", pair.key());
            self.on_cancel_pair(pair).await;
            return;
        };

        if let Some(tracked) = &pair.exchange_order {
            if !self.keep_tracked_order(pair, tracked).await {
                return;
            }
        } else {
            // protective orders would otherwise outlive the position
            if let Err(e) = self.executor.cancel_all(exchange, symbol).await {
                warn!("Pair {}: failed to cancel open orders before close: {}", pair.key(), e);
                self.pair_states.trigger_retry(pair);
                return;
            }

            let amount = -position.amount;
            let order = if pair.options.market {
                Order::market_close(symbol, amount)
            } else {
                Order::close_with_price_adjustment(symbol, amount)
            };

            info!(
                "Pair {}: closing {} {} position",
                pair.key(),
                position.side,
                position.amount
            );
            self.submit(pair, order).await;
        }

        self.cancel_duplicates(pair).await;
    }

    /// Cancel every open order of a pair and forget it
    pub async fn on_cancel_pair(&self, pair: &PairState) {
        match self.executor.cancel_all(&pair.exchange, &pair.symbol).await {
            Ok(canceled) => debug!("Pair {}: {} orders canceled", pair.key(), canceled.len()),
            Err(e) => error!("Pair {}: failed to cancel orders: {}", pair.key(), e),
        }

        self.pair_states.clear_if(pair);
    }

    /// Drain every tracked pair on shutdown.
    ///
    /// Waits for a reconciliation pass still in flight, so the orders it
    /// submits are tracked before the drain reads the pair states. No new
    /// pass can start until the drain is done.
    pub async fn on_terminate(&self) {
        let _guard = self.tick_lock.lock().await;

        let pairs = self.pair_states.all();
        if pairs.is_empty() {
            return;
        }

        info!("Terminating: canceling {} tracked pairs", pairs.len());
        join_all(pairs.iter().map(|pair| self.on_cancel_pair(pair))).await;
    }

    /// Re-validate the tracked order; false when the caller should stop here
    async fn keep_tracked_order(&self, pair: &PairState, tracked: &ExchangeOrder) -> bool {
        match self.find_tracked_order(pair, tracked).await {
            TrackedOrder::Open(current) => {
                debug!("Pair {}: tracked order {} still open", pair.key(), current.id);
                self.pair_states.set_exchange_order(pair, Some(current), None);
                true
            }
            TrackedOrder::Gone => {
                info!(
                    "Pair {}: tracked order {} no longer open, dropping reference",
                    pair.key(),
                    tracked.id
                );
                self.pair_states.set_exchange_order(pair, None, None);
                false
            }
            TrackedOrder::Unknown => false,
        }
    }

    async fn find_tracked_order(&self, pair: &PairState, tracked: &ExchangeOrder) -> TrackedOrder {
        match self
            .exchanges
            .find_order_by_id(&pair.exchange, &tracked.id)
            .await
        {
            Ok(Some(order)) if order.is_open() => TrackedOrder::Open(order),
            Ok(_) => TrackedOrder::Gone,
            Err(e) => {
                warn!(
                    "Pair {}: failed to look up tracked order {}: {}",
                    pair.key(),
                    tracked.id,
                    e
                );
                TrackedOrder::Unknown
            }
        }
    }

    async fn submit(&self, pair: &PairState, order: Result<Order, OrderError>) {
        let order = match order {
            Ok(order) => order,
            Err(e) => {
                error!("Pair {}: invalid order: {}", pair.key(), e);
                self.pair_states.clear_if(pair);
                return;
            }
        };

        let outcome = self.executor.execute_order(&pair.exchange, &order).await;

        match outcome {
            None => {
                warn!("Pair {}: order {} got no result", pair.key(), order.id);
                self.pair_states.trigger_retry(pair);
            }
            Some(SubmitOutcome::RetryableRejection(rejected)) => {
                info!(
                    "Pair {}: order {} rejected as retryable ({})",
                    pair.key(),
                    rejected.id,
                    rejected.status.as_str()
                );
                self.pair_states.trigger_retry(pair);
            }
            Some(SubmitOutcome::PermanentRejection(rejected)) if rejected.is_rejected() => {
                warn!(
                    "Pair {}: order {} rejected, giving up on state {}",
                    pair.key(),
                    rejected.id,
                    pair.state
                );
                self.pair_states.clear_if(pair);
            }
            Some(SubmitOutcome::PermanentRejection(canceled)) => {
                info!(
                    "Pair {}: order {} {} by venue, retrying",
                    pair.key(),
                    canceled.id,
                    canceled.status.as_str()
                );
                self.pair_states.trigger_retry(pair);
            }
            Some(SubmitOutcome::Accepted(done)) if done.is_done() => {
                info!("Pair {}: order {} filled, state {} done", pair.key(), done.id, pair.state);
                self.pair_states.clear_if(pair);
            }
            Some(SubmitOutcome::Accepted(open)) => {
                info!("Pair {}: tracking order {}", pair.key(), open.id);
                self.pair_states.set_exchange_order(pair, Some(open), Some(order));
            }
        }
    }

    /// Keep only the tracked order when the venue reports several open ones
    async fn cancel_duplicates(&self, pair: &PairState) {
        let Some(current) = self
            .pair_states
            .get(&pair.exchange, &pair.symbol)
            .filter(|current| current.id == pair.id)
        else {
            return;
        };

        let open = match self.exchanges.get_orders(&pair.exchange, &pair.symbol).await {
            Ok(open) => open,
            Err(e) => {
                warn!("Pair {}: failed to list open orders: {}", pair.key(), e);
                return;
            }
        };

        if open.len() <= 1 {
            return;
        }

        let tracked_id = current.exchange_order.as_ref().map(|o| o.id.as_str());
        warn!(
            "Pair {}: {} open orders, keeping {:?}",
            pair.key(),
            open.len(),
            tracked_id
        );

        for order in open.iter().filter(|o| Some(o.id.as_str()) != tracked_id) {
            if let Err(e) = self.executor.cancel_order(&pair.exchange, &order.id).await {
                warn!("Pair {}: failed to cancel duplicate {}: {}", pair.key(), order.id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExchangeConfig, ExecutionConfig, PairConfig, PairsConfig};
    use crate::domain::{PairStateOptions, Ticker};
    use crate::exchange::{Exchange, PaperExchange};
    use crate::services::Tickers;
    use rust_decimal_macros::dec;

    struct Fixture {
        paper: Arc<PaperExchange>,
        pair_states: Arc<PairStateManager>,
        execution: PairStateExecution,
    }

    fn fixture() -> Fixture {
        let tickers = Arc::new(Tickers::new());
        tickers.set(Ticker::new("paper", "BTCUSD", dec!(99), dec!(101)));

        let paper = Arc::new(PaperExchange::new(ExchangeConfig::new("paper"), tickers.clone()));
        let exchanges = Arc::new(ExchangeManager::new(vec![paper.clone() as Arc<dyn Exchange>]));
        let pair_states = Arc::new(PairStateManager::new());
        let executor = Arc::new(OrderExecutor::new(
            exchanges.clone(),
            tickers.clone(),
            ExecutionConfig {
                retry_backoff_ms: 1,
                ..Default::default()
            },
        ));
        let calculator = Arc::new(OrderCalculator::new(
            PairsConfig::new(vec![PairConfig::new("paper", "BTCUSD").with_capital(dec!(1))]),
            tickers,
            exchanges.clone(),
        ));

        let execution = PairStateExecution::new(
            exchanges,
            pair_states.clone(),
            executor,
            calculator,
            PairStateConfig::default(),
            Duration::from_secs(120),
        );

        Fixture {
            paper,
            pair_states,
            execution,
        }
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let f = fixture();
        let _running = f.execution.tick_lock.lock().await;
        assert!(!f.execution.on_pair_state_execution_tick().await);
    }

    #[tokio::test]
    async fn test_long_state_opens_tracked_order() {
        let f = fixture();
        f.pair_states
            .update("paper", "BTCUSD", PairStateKind::Long, PairStateOptions::default());

        assert!(f.execution.on_pair_state_execution_tick().await);

        let state = f.pair_states.get("paper", "BTCUSD").unwrap();
        let tracked = state.exchange_order.unwrap();
        assert!(tracked.is_open());
        assert_eq!(tracked.price, dec!(99));
        assert!(state.order.is_some());
    }

    #[tokio::test]
    async fn test_market_long_clears_once_filled() {
        let f = fixture();
        f.pair_states.update(
            "paper",
            "BTCUSD",
            PairStateKind::Long,
            PairStateOptions { market: true },
        );

        f.execution.on_pair_state_execution_tick().await;

        assert!(f.pair_states.is_neutral("paper", "BTCUSD"));
        let position = f.paper.get_position_for_symbol("BTCUSD").await.unwrap().unwrap();
        assert_eq!(position.amount, dec!(1));
    }

    #[tokio::test]
    async fn test_hard_rejection_gives_up() {
        let f = fixture();
        f.paper.queue_rejection(false).await;
        f.pair_states
            .update("paper", "BTCUSD", PairStateKind::Short, PairStateOptions::default());

        f.execution.on_pair_state_execution_tick().await;
        assert!(f.pair_states.is_neutral("paper", "BTCUSD"));
    }

    #[tokio::test]
    async fn test_venue_failure_counts_a_retry() {
        let f = fixture();
        f.paper.queue_failure().await;
        f.pair_states
            .update("paper", "BTCUSD", PairStateKind::Long, PairStateOptions::default());

        f.execution.on_pair_state_execution_tick().await;
        assert_eq!(f.pair_states.get("paper", "BTCUSD").unwrap().retries, 1);
    }

    #[tokio::test]
    async fn test_close_without_position_cancels() {
        let f = fixture();
        let stray = Order::limit_post_only("BTCUSD", Side::Long, dec!(90), dec!(1)).unwrap();
        f.paper.order(&stray).await.unwrap();
        f.pair_states
            .update("paper", "BTCUSD", PairStateKind::Close, PairStateOptions::default());

        f.execution.on_pair_state_execution_tick().await;

        assert!(f.pair_states.is_neutral("paper", "BTCUSD"));
        assert!(f.paper.get_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terminate_drains_pairs() {
        let f = fixture();
        f.pair_states
            .update("paper", "BTCUSD", PairStateKind::Long, PairStateOptions::default());
        f.execution.on_pair_state_execution_tick().await;
        assert_eq!(f.paper.get_orders().await.unwrap().len(), 1);

        f.execution.on_terminate().await;

        assert!(f.pair_states.is_empty());
        assert!(f.paper.get_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terminate_waits_for_inflight_submission() {
        let f = fixture();
        f.pair_states
            .update("paper", "BTCUSD", PairStateKind::Long, PairStateOptions::default());

        let held = f.paper.hold_submissions().await;
        let terminate = async {
            tokio::task::yield_now().await;
            f.execution.on_terminate().await
        };
        let release = async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(held);
        };

        let (ran, _, _) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(
                f.execution.on_pair_state_execution_tick(),
                terminate,
                release
            )
        })
        .await
        .unwrap();

        assert!(ran);
        assert_eq!(f.paper.stats().submitted(), 1);
        assert!(f.pair_states.is_empty());
        assert!(f.paper.get_orders().await.unwrap().is_empty());
    }
}
