//! Exchange order watchdog
//!
//! Evaluates the watchdog policies configured per pair against live
//! positions:
//! - `stoploss` keeps a stop order next to the position
//! - `risk_reward_ratio` keeps a stop and a take-profit order
//! - `stoploss_watch` requests a close once the loss passes a threshold
//!
//! Positions with an in-flight desired state are left to the reconciliation
//! loop.

use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::config::{PairsConfig, WatchdogPolicy};
use crate::domain::{
    ExchangeOrder, PairStateKind, PairStateOptions, Position, PositionStateChangeEvent, Side,
};
use crate::exchange::ExchangeManager;
use crate::risk::{OrderDelta, RiskRewardCalculator, StopLossCalculator};
use crate::services::Tickers;
use crate::state::PairStateManager;
use crate::strategy::OrderExecutor;

/// Profit of a position against the ticker, in percent (bid for long, ask for short)
pub fn position_profit(position: &Position, bid: Decimal, ask: Decimal) -> Option<Decimal> {
    let entry = position.entry.filter(|e| !e.is_zero())?;

    Some(match position.side {
        Side::Long => (bid / entry - Decimal::ONE) * Decimal::ONE_HUNDRED,
        Side::Short => (Decimal::ONE - ask / entry) * Decimal::ONE_HUNDRED,
    })
}

pub struct ExchangeOrderWatchdog {
    exchanges: Arc<ExchangeManager>,
    executor: Arc<OrderExecutor>,
    pair_states: Arc<PairStateManager>,
    tickers: Arc<Tickers>,
    pairs: PairsConfig,
    stop_loss: StopLossCalculator,
    risk_reward: RiskRewardCalculator,
}

impl ExchangeOrderWatchdog {
    pub fn new(
        exchanges: Arc<ExchangeManager>,
        executor: Arc<OrderExecutor>,
        pair_states: Arc<PairStateManager>,
        tickers: Arc<Tickers>,
        pairs: PairsConfig,
    ) -> Self {
        Self {
            exchanges,
            executor,
            pair_states,
            stop_loss: StopLossCalculator::new(tickers.clone()),
            risk_reward: RiskRewardCalculator::new(),
            tickers,
            pairs,
        }
    }

    /// Evaluate every watchdog of every open position once
    pub async fn on_tick(&self) {
        for (exchange, position) in self.exchanges.get_positions().await {
            let policies = self.pairs.watchdogs(&exchange, &position.symbol);
            if policies.is_empty() {
                continue;
            }

            if !self.pair_states.is_neutral(&exchange, &position.symbol) {
                debug!(
                    "Watchdog: {}:{} has a desired state in flight, skipping",
                    exchange, position.symbol
                );
                continue;
            }

            for policy in policies {
                if self.evaluate(&exchange, &position, policy).await {
                    break;
                }
            }
        }
    }

    /// Returns true when the policy handed the pair to the reconciliation loop
    async fn evaluate(&self, exchange: &str, position: &Position, policy: &WatchdogPolicy) -> bool {
        match policy {
            WatchdogPolicy::Stoploss { percent } => {
                let Some(orders) = self.open_orders(exchange, &position.symbol).await else {
                    return false;
                };
                let deltas = self
                    .stop_loss
                    .sync_stop_loss_order(exchange, position, *percent, &orders);
                self.apply(exchange, policy, deltas).await;
                false
            }
            WatchdogPolicy::RiskRewardRatio {
                target_percent,
                stop_percent,
            } => {
                let Some(orders) = self.open_orders(exchange, &position.symbol).await else {
                    return false;
                };
                let deltas = self.risk_reward.sync_ratio_reward_orders(
                    position,
                    *stop_percent,
                    *target_percent,
                    &orders,
                );
                self.apply(exchange, policy, deltas).await;
                false
            }
            WatchdogPolicy::StoplossWatch { stop } => self.stoploss_watch(exchange, position, *stop),
        }
    }

    fn stoploss_watch(&self, exchange: &str, position: &Position, stop: Decimal) -> bool {
        let Some(ticker) = self.tickers.get(exchange, &position.symbol) else {
            debug!("Watchdog: no ticker for {}:{}", exchange, position.symbol);
            return false;
        };

        let Some(profit) = position_profit(position, ticker.bid, ticker.ask) else {
            debug!("Watchdog: {}:{} has no entry price", exchange, position.symbol);
            return false;
        };
        let position = position.with_profit(profit);

        if profit > -stop.abs() {
            return false;
        }

        info!(
            "Watchdog stoploss_watch: {}:{} {} {} at {}% (stop {}%), closing",
            exchange,
            position.symbol,
            position.side,
            position.amount,
            profit.round_dp(2),
            stop
        );
        self.pair_states.update(
            exchange,
            &position.symbol,
            PairStateKind::Close,
            PairStateOptions::default(),
        );
        true
    }

    async fn open_orders(&self, exchange: &str, symbol: &str) -> Option<Vec<ExchangeOrder>> {
        match self.exchanges.get_orders(exchange, symbol).await {
            Ok(orders) => Some(orders),
            Err(e) => {
                warn!("Watchdog: failed to list orders for {}:{}: {}", exchange, symbol, e);
                None
            }
        }
    }

    async fn apply(&self, exchange: &str, policy: &WatchdogPolicy, deltas: Vec<OrderDelta>) {
        for delta in deltas {
            match delta {
                OrderDelta::Create(order) => {
                    info!(
                        "Watchdog {}: placing {} {} {} @ {:?} on {}",
                        policy.name(),
                        order.order_type,
                        order.symbol,
                        order.side,
                        order.price(),
                        exchange
                    );
                    if self.executor.execute_order(exchange, &order).await.is_none() {
                        warn!("Watchdog {}: order {} got no result", policy.name(), order.id);
                    }
                }
                OrderDelta::Update { id, update } => {
                    info!(
                        "Watchdog {}: resizing order {} on {} to {:?}",
                        policy.name(),
                        id,
                        exchange,
                        update.amount
                    );
                    if let Err(e) = self.executor.update_order(exchange, &id, &update).await {
                        warn!("Watchdog {}: failed to update {}: {}", policy.name(), id, e);
                    }
                }
            }
        }
    }

    /// Cancel residual orders of a pair once its position is gone
    pub async fn on_position_changed(&self, event: &PositionStateChangeEvent) {
        if !event.is_closed() {
            return;
        }

        let symbol = &event.position.symbol;
        if self.pairs.watchdogs(&event.exchange, symbol).is_empty() {
            return;
        }

        match self.executor.cancel_all(&event.exchange, symbol).await {
            Ok(canceled) if !canceled.is_empty() => info!(
                "Watchdog: position {}:{} closed, canceled {} residual orders",
                event.exchange,
                symbol,
                canceled.len()
            ),
            Ok(_) => {}
            Err(e) => error!(
                "Watchdog: failed to cancel residual orders for {}:{}: {}",
                event.exchange, symbol, e
            ),
        }
    }

    /// Handle position events until shutdown or until the sender is gone
    pub async fn run_position_events(
        &self,
        mut events: broadcast::Receiver<PositionStateChangeEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.on_position_changed(&event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Watchdog lagged behind position events, {} skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("Watchdog position event loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExchangeConfig, ExecutionConfig, PairConfig};
    use crate::domain::{OrderType, Ticker};
    use crate::exchange::{Exchange, PaperExchange};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    struct Fixture {
        paper: Arc<PaperExchange>,
        pair_states: Arc<PairStateManager>,
        watchdog: ExchangeOrderWatchdog,
    }

    fn fixture(policy: WatchdogPolicy) -> Fixture {
        let tickers = Arc::new(Tickers::new());
        tickers.set(Ticker::new("paper", "BTCUSD", dec!(99), dec!(101)));

        let paper = Arc::new(PaperExchange::new(ExchangeConfig::new("paper"), tickers.clone()));
        let exchanges = Arc::new(ExchangeManager::new(vec![paper.clone() as Arc<dyn Exchange>]));
        let executor = Arc::new(OrderExecutor::new(
            exchanges.clone(),
            tickers.clone(),
            ExecutionConfig::default(),
        ));
        let pair_states = Arc::new(PairStateManager::new());
        let pairs = PairsConfig::new(vec![PairConfig::new("paper", "BTCUSD").with_watchdog(policy)]);

        Fixture {
            paper,
            pair_states: pair_states.clone(),
            watchdog: ExchangeOrderWatchdog::new(exchanges, executor, pair_states, tickers, pairs),
        }
    }

    fn long_position() -> Position {
        Position::new("BTCUSD", Side::Long, dec!(1), None, Some(dec!(100)), Utc::now()).unwrap()
    }

    #[test]
    fn test_position_profit() {
        let long = long_position();
        assert_eq!(position_profit(&long, dec!(99), dec!(101)), Some(dec!(-1)));

        let short =
            Position::new("BTCUSD", Side::Short, dec!(-1), None, Some(dec!(100)), Utc::now()).unwrap();
        assert_eq!(position_profit(&short, dec!(99), dec!(101)), Some(dec!(-1)));
    }

    #[tokio::test]
    async fn test_stoploss_watch_triggers_close() {
        let f = fixture(WatchdogPolicy::StoplossWatch { stop: dec!(0.9) });
        f.paper.set_position(long_position()).await;

        f.watchdog.on_tick().await;

        let state = f.pair_states.get("paper", "BTCUSD").unwrap();
        assert_eq!(state.state, PairStateKind::Close);
    }

    #[tokio::test]
    async fn test_stoploss_watch_within_tolerance() {
        let f = fixture(WatchdogPolicy::StoplossWatch { stop: dec!(1.9) });
        f.paper.set_position(long_position()).await;

        f.watchdog.on_tick().await;

        assert!(f.pair_states.is_neutral("paper", "BTCUSD"));
    }

    #[tokio::test]
    async fn test_stoploss_places_stop_once() {
        let f = fixture(WatchdogPolicy::Stoploss { percent: dec!(5) });
        f.paper.set_position(long_position()).await;

        f.watchdog.on_tick().await;
        f.watchdog.on_tick().await;

        let orders = f.paper.get_orders_for_symbol("BTCUSD").await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_type, OrderType::Stop);
        assert_eq!(orders[0].side, Side::Short);
        assert_eq!(orders[0].price, dec!(95));
    }

    #[tokio::test]
    async fn test_busy_pair_is_left_alone() {
        let f = fixture(WatchdogPolicy::Stoploss { percent: dec!(5) });
        f.paper.set_position(long_position()).await;
        f.pair_states
            .update("paper", "BTCUSD", PairStateKind::Close, PairStateOptions::default());

        f.watchdog.on_tick().await;

        assert!(f.paper.get_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_position_cancels_residual_orders() {
        let f = fixture(WatchdogPolicy::Stoploss { percent: dec!(5) });
        f.paper.set_position(long_position()).await;
        f.watchdog.on_tick().await;
        assert_eq!(f.paper.get_orders().await.unwrap().len(), 1);

        let event = PositionStateChangeEvent::closed("paper", long_position());
        f.watchdog.on_position_changed(&event).await;

        assert!(f.paper.get_orders().await.unwrap().is_empty());
    }
}
