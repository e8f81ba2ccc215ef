//! Engine runtime
//!
//! Builds every component once from `AppConfig` and drives the periodic
//! tasks until shutdown:
//!   - pair state reconciliation
//!   - watchdog evaluation
//!   - resting order price maintenance
//!   - position polling (plus paper venue matching)
//!
//! On shutdown every still tracked pair is drained through the cancel path.

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::error::{PairSyncError, Result};
use crate::exchange::{Exchange, ExchangeManager, PaperExchange};
use crate::services::{PositionWatcher, Tickers};
use crate::state::PairStateManager;
use crate::strategy::{OrderCalculator, OrderExecutor, PairStateExecution};
use crate::supervisor::ExchangeOrderWatchdog;

/// How a periodic task treats a tick that outlasts its interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickMode {
    /// Await the tick; the next one waits for it
    Inline,
    /// Spawn the tick; the component guards against overlap itself
    Detached,
}

pub struct Engine {
    config: AppConfig,
    tickers: Arc<Tickers>,
    exchanges: Arc<ExchangeManager>,
    papers: Vec<Arc<PaperExchange>>,
    pair_states: Arc<PairStateManager>,
    executor: Arc<OrderExecutor>,
    execution: Arc<PairStateExecution>,
    watchdog: Arc<ExchangeOrderWatchdog>,
    position_watcher: Arc<PositionWatcher>,
    shutdown_tx: watch::Sender<bool>,
}

impl Engine {
    pub fn new(config: AppConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| PairSyncError::InvalidConfig(errors.join("; ")))?;

        let (shutdown_tx, _) = watch::channel(false);
        let tickers = Arc::new(Tickers::new());

        let papers: Vec<Arc<PaperExchange>> = config
            .exchanges
            .iter()
            .map(|exchange| Arc::new(PaperExchange::new(exchange.clone(), tickers.clone())))
            .collect();
        let exchanges = Arc::new(ExchangeManager::new(
            papers
                .iter()
                .map(|paper| paper.clone() as Arc<dyn Exchange>)
                .collect(),
        ));

        let pair_states = Arc::new(PairStateManager::new());
        let executor = Arc::new(
            OrderExecutor::new(exchanges.clone(), tickers.clone(), config.execution.clone())
                .with_shutdown(shutdown_tx.subscribe()),
        );
        let calculator = Arc::new(OrderCalculator::new(
            config.pairs_config(),
            tickers.clone(),
            exchanges.clone(),
        ));
        let execution = Arc::new(PairStateExecution::new(
            exchanges.clone(),
            pair_states.clone(),
            executor.clone(),
            calculator,
            config.pair_state.clone(),
            Duration::from_secs(config.engine.tick_block_threshold_secs),
        ));
        let watchdog = Arc::new(ExchangeOrderWatchdog::new(
            exchanges.clone(),
            executor.clone(),
            pair_states.clone(),
            tickers.clone(),
            config.pairs_config(),
        ));
        let position_watcher = Arc::new(PositionWatcher::new(exchanges.clone()));

        Ok(Self {
            config,
            tickers,
            exchanges,
            papers,
            pair_states,
            executor,
            execution,
            watchdog,
            position_watcher,
            shutdown_tx,
        })
    }

    pub fn tickers(&self) -> Arc<Tickers> {
        self.tickers.clone()
    }

    pub fn exchanges(&self) -> Arc<ExchangeManager> {
        self.exchanges.clone()
    }

    pub fn pair_states(&self) -> Arc<PairStateManager> {
        self.pair_states.clone()
    }

    pub fn executor(&self) -> Arc<OrderExecutor> {
        self.executor.clone()
    }

    pub fn paper(&self, name: &str) -> Option<Arc<PaperExchange>> {
        self.papers.iter().find(|p| p.name() == name).cloned()
    }

    /// Request shutdown; `run` drains and returns
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Run until `shutdown` is called
    pub async fn run(&self) -> Result<()> {
        let engine = &self.config.engine;
        info!(
            "Engine starting: {} exchanges, {} pairs",
            self.exchanges.names().len(),
            self.config.pairs.len()
        );

        let mut handles = Vec::new();

        let execution = self.execution.clone();
        handles.push(self.spawn_periodic(
            "pair-state-execution",
            engine.pair_state_interval_ms,
            TickMode::Detached,
            move || {
                let execution = execution.clone();
                async move {
                    execution.on_pair_state_execution_tick().await;
                }
            },
        ));

        let watchdog = self.watchdog.clone();
        handles.push(self.spawn_periodic(
            "watchdog",
            engine.watchdog_interval_ms,
            TickMode::Inline,
            move || {
                let watchdog = watchdog.clone();
                async move { watchdog.on_tick().await }
            },
        ));

        let executor = self.executor.clone();
        handles.push(self.spawn_periodic(
            "price-adjustment",
            engine.price_adjust_interval_ms,
            TickMode::Detached,
            move || {
                let executor = executor.clone();
                async move {
                    executor.adjust_open_orders_price().await;
                }
            },
        ));

        let watcher = self.position_watcher.clone();
        let papers = self.papers.clone();
        handles.push(self.spawn_periodic(
            "position-watcher",
            engine.position_watch_interval_ms,
            TickMode::Inline,
            move || {
                let watcher = watcher.clone();
                let papers = papers.clone();
                async move {
                    for paper in &papers {
                        paper.match_resting_orders().await;
                    }
                    watcher.check().await;
                }
            },
        ));

        let watchdog = self.watchdog.clone();
        let events = self.position_watcher.subscribe();
        let shutdown = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            watchdog.run_position_events(events, shutdown).await;
        }));

        self.wait_for_shutdown().await;
        info!("Engine shutting down");

        join_all(handles).await;
        self.execution.on_terminate().await;

        info!("Engine stopped");
        Ok(())
    }

    async fn wait_for_shutdown(&self) {
        let mut shutdown = self.shutdown_tx.subscribe();
        while !*shutdown.borrow_and_update() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
    }

    fn spawn_periodic<F, Fut>(
        &self,
        name: &'static str,
        interval_ms: u64,
        mode: TickMode,
        mut tick: F,
    ) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => match mode {
                        TickMode::Inline => tick().await,
                        TickMode::Detached => {
                            tokio::spawn(tick());
                        }
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("{} task stopped", name);
        })
    }
}
