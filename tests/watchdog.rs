use chrono::Utc;
use pairsync::config::{ExchangeConfig, ExecutionConfig, PairConfig, PairsConfig, WatchdogPolicy};
use pairsync::domain::OrderType;
use pairsync::{
    Exchange, ExchangeManager, ExchangeOrderWatchdog, OrderExecutor, PaperExchange,
    PairStateKind, PairStateManager, PairStateOptions, Position, PositionWatcher, Side, Ticker,
    Tickers,
};
use rust_decimal_macros::dec;
use std::sync::Arc;

struct Harness {
    tickers: Arc<Tickers>,
    paper: Arc<PaperExchange>,
    pair_states: Arc<PairStateManager>,
    watcher: PositionWatcher,
    watchdog: ExchangeOrderWatchdog,
}

fn harness(policy: WatchdogPolicy) -> Harness {
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
    let watchdog = ExchangeOrderWatchdog::new(
        exchanges.clone(),
        executor,
        pair_states.clone(),
        tickers.clone(),
        PairsConfig::new(vec![PairConfig::new("paper", "BTCUSD").with_watchdog(policy)]),
    );

    Harness {
        tickers,
        paper,
        pair_states,
        watcher: PositionWatcher::new(exchanges),
        watchdog,
    }
}

fn long_position() -> Position {
    Position::new("BTCUSD", Side::Long, dec!(1), None, Some(dec!(100)), Utc::now()).unwrap()
}

#[tokio::test]
async fn risk_reward_brackets_the_position_once() {
    let h = harness(WatchdogPolicy::RiskRewardRatio {
        target_percent: dec!(3),
        stop_percent: dec!(2),
    });
    h.paper.set_position(long_position()).await;

    h.watchdog.on_tick().await;
    h.watchdog.on_tick().await;

    let mut orders = h.paper.get_orders_for_symbol("BTCUSD").await.unwrap();
    orders.sort_by_key(|o| o.price);
    assert_eq!(orders.len(), 2);
    assert_eq!(h.paper.stats().submitted(), 2);

    assert_eq!(orders[0].order_type, OrderType::Stop);
    assert_eq!(orders[0].side, Side::Short);
    assert_eq!(orders[0].price, dec!(98));
    assert_eq!(orders[1].order_type, OrderType::Limit);
    assert_eq!(orders[1].side, Side::Short);
    assert_eq!(orders[1].price, dec!(103));
    assert!(orders.iter().all(|o| o.amount == dec!(1)));
}

#[tokio::test]
async fn triggered_stop_closes_and_leftovers_are_canceled() {
    let h = harness(WatchdogPolicy::RiskRewardRatio {
        target_percent: dec!(3),
        stop_percent: dec!(2),
    });
    h.paper.set_position(long_position()).await;
    h.watcher.check().await;
    h.watchdog.on_tick().await;

    h.tickers
        .set(Ticker::new("paper", "BTCUSD", dec!(97.5), dec!(98)));
    let filled = h.paper.match_resting_orders().await;
    assert_eq!(filled.len(), 1);
    assert_eq!(filled[0].order_type, OrderType::Stop);
    assert!(h.paper.get_position_for_symbol("BTCUSD").await.unwrap().is_none());

    let events = h.watcher.check().await;
    assert_eq!(events.len(), 1);
    assert!(events[0].is_closed());

    h.watchdog.on_position_changed(&events[0]).await;
    assert!(h.paper.get_orders().await.unwrap().is_empty());
}

#[tokio::test]
async fn stop_is_resized_after_the_position_grows() {
    let h = harness(WatchdogPolicy::Stoploss { percent: dec!(5) });
    h.paper.set_position(long_position()).await;
    h.watchdog.on_tick().await;

    let grown = Position::new("BTCUSD", Side::Long, dec!(1.5), None, Some(dec!(100)), Utc::now())
        .unwrap();
    h.paper.set_position(grown).await;
    h.watchdog.on_tick().await;

    let orders = h.paper.get_orders_for_symbol("BTCUSD").await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].amount, dec!(1.5));
    assert_eq!(orders[0].price, dec!(95));
    assert_eq!(h.paper.stats().submitted(), 1);
    assert_eq!(h.paper.stats().updated(), 1);
}

#[tokio::test]
async fn loss_watch_hands_the_pair_to_reconciliation() {
    let h = harness(WatchdogPolicy::StoplossWatch { stop: dec!(1) });
    h.paper.set_position(long_position()).await;

    h.watchdog.on_tick().await;
    assert!(h.pair_states.is_neutral("paper", "BTCUSD"));

    h.tickers
        .set(Ticker::new("paper", "BTCUSD", dec!(98.9), dec!(99.1)));
    h.watchdog.on_tick().await;

    let state = h.pair_states.get("paper", "BTCUSD").unwrap();
    assert_eq!(state.state, PairStateKind::Close);
    assert_eq!(h.paper.stats().submitted(), 0);
}

#[tokio::test]
async fn pair_with_desired_state_is_left_alone() {
    let h = harness(WatchdogPolicy::Stoploss { percent: dec!(5) });
    h.paper.set_position(long_position()).await;
    h.pair_states
        .update("paper", "BTCUSD", PairStateKind::Close, PairStateOptions::default());

    h.watchdog.on_tick().await;

    assert_eq!(h.paper.stats().submitted(), 0);
}
