//! Position watcher
//!
//! Polls venue positions and broadcasts opened/closed transitions so that
//! listeners (the exchange order watchdog) can clean up after a position.

use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::domain::{PairKey, Position, PositionStateChangeEvent};
use crate::exchange::ExchangeManager;

/// Diffs consecutive position snapshots into change events
pub struct PositionWatcher {
    exchanges: Arc<ExchangeManager>,
    known: RwLock<HashMap<PairKey, Position>>,
    initialized: AtomicBool,
    event_tx: broadcast::Sender<PositionStateChangeEvent>,
}

impl PositionWatcher {
    pub fn new(exchanges: Arc<ExchangeManager>) -> Self {
        let (event_tx, _) = broadcast::channel(256);

        Self {
            exchanges,
            known: RwLock::new(HashMap::new()),
            initialized: AtomicBool::new(false),
            event_tx,
        }
    }

    /// Subscribe to position state changes
    pub fn subscribe(&self) -> broadcast::Receiver<PositionStateChangeEvent> {
        self.event_tx.subscribe()
    }

    /// Run a single polling cycle and return the emitted events.
    ///
    /// The first cycle only seeds the snapshot. A venue that fails to answer
    /// keeps its previous snapshot, so a hiccup never reads as "closed".
    /// Venues are queried before the snapshot lock is taken.
    pub async fn check(&self) -> Vec<PositionStateChangeEvent> {
        let snapshots = join_all(self.exchanges.all().into_iter().map(|exchange| async move {
            let name = exchange.name().to_string();
            match exchange.get_positions().await {
                Ok(positions) => Some((name, positions)),
                Err(e) => {
                    warn!("Position watcher: failed to fetch positions from {}: {}", name, e);
                    None
                }
            }
        }))
        .await;

        let mut events = Vec::new();
        let seeding = !self.initialized.swap(true, Ordering::SeqCst);
        let mut known = self.known.write().await;

        for (name, positions) in snapshots.into_iter().flatten() {
            let mut seen = HashSet::new();
            for position in positions {
                let key = PairKey::new(&name, &position.symbol);
                seen.insert(key.clone());

                if !known.contains_key(&key) && !seeding {
                    info!(
                        "Position opened: {} {} {}",
                        key, position.side, position.amount
                    );
                    events.push(PositionStateChangeEvent::opened(&name, position.clone()));
                }
                known.insert(key, position);
            }

            let gone: Vec<PairKey> = known
                .keys()
                .filter(|k| k.exchange == name && !seen.contains(*k))
                .cloned()
                .collect();

            for key in gone {
                if let Some(position) = known.remove(&key) {
                    info!("Position closed: {} {} {}", key, position.side, position.amount);
                    events.push(PositionStateChangeEvent::closed(&name, position));
                }
            }
        }

        drop(known);

        for event in &events {
            // no subscribers is fine
            let _ = self.event_tx.send(event.clone());
        }

        if !events.is_empty() {
            debug!("Position watcher emitted {} events", events.len());
        }

        events
    }

    /// Last seen positions
    pub async fn positions(&self) -> Vec<(PairKey, Position)> {
        self.known
            .read()
            .await
            .iter()
            .map(|(k, p)| (k.clone(), p.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExchangeConfig;
    use crate::domain::{PositionState, Side};
    use crate::exchange::{Exchange, PaperExchange};
    use crate::services::Tickers;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_emits_opened_and_closed() {
        let paper = Arc::new(PaperExchange::new(
            ExchangeConfig::new("paper"),
            Arc::new(Tickers::new()),
        ));
        let exchanges = Arc::new(ExchangeManager::new(vec![paper.clone() as Arc<dyn Exchange>]));
        let watcher = PositionWatcher::new(exchanges);
        let mut rx = watcher.subscribe();

        assert!(watcher.check().await.is_empty());

        let position =
            Position::new("BTCUSD", Side::Long, dec!(1), None, Some(dec!(100)), Utc::now()).unwrap();
        paper.set_position(position).await;

        let events = watcher.check().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, PositionState::Opened);
        assert!(rx.recv().await.unwrap().is_opened());

        paper.remove_position("BTCUSD").await;
        let events = watcher.check().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_closed());
        assert_eq!(events[0].position.symbol, "BTCUSD");
    }

    #[tokio::test]
    async fn test_first_cycle_only_seeds() {
        let paper = Arc::new(PaperExchange::new(
            ExchangeConfig::new("paper"),
            Arc::new(Tickers::new()),
        ));
        let position =
            Position::new("ETHUSD", Side::Short, dec!(-3), None, Some(dec!(10)), Utc::now()).unwrap();
        paper.set_position(position).await;

        let watcher =
            PositionWatcher::new(Arc::new(ExchangeManager::new(vec![paper as Arc<dyn Exchange>])));
        assert!(watcher.check().await.is_empty());
        assert_eq!(watcher.positions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_readable_while_venue_is_slow() {
        let paper = Arc::new(PaperExchange::new(
            ExchangeConfig::new("paper"),
            Arc::new(Tickers::new()),
        ));
        let position =
            Position::new("BTCUSD", Side::Long, dec!(1), None, Some(dec!(100)), Utc::now()).unwrap();
        paper.set_position(position).await;

        let watcher =
            PositionWatcher::new(Arc::new(ExchangeManager::new(vec![paper.clone() as Arc<dyn Exchange>])));
        watcher.check().await;

        let held = paper.hold_positions().await;
        let reader = &watcher;
        let read = async move {
            tokio::task::yield_now().await;
            let snapshot =
                tokio::time::timeout(std::time::Duration::from_secs(1), reader.positions()).await;
            drop(held);
            snapshot
        };
        let (events, snapshot) = tokio::join!(watcher.check(), read);

        assert!(events.is_empty());
        assert_eq!(snapshot.expect("snapshot blocked by venue").len(), 1);
    }
}
