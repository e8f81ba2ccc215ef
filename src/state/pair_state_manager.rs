//! Desired-state store
//!
//! One `PairState` per (exchange, symbol). `update` always overwrites and
//! resets retries, which is how an operator or strategy overrides an
//! in-flight reconciliation. Write-backs from the reconciliation loop carry
//! the id of the record they were computed from and are dropped when the
//! record has been replaced in the meantime.

use dashmap::DashMap;
use tracing::{debug, info};

use crate::domain::{
    ExchangeOrder, Order, PairKey, PairState, PairStateKind, PairStateOptions,
};

/// Concurrency-safe keyed store of desired pair states
#[derive(Debug, Default)]
pub struct PairStateManager {
    states: DashMap<PairKey, PairState>,
}

impl PairStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a desired state, replacing any existing record for the pair
    pub fn update(
        &self,
        exchange: &str,
        symbol: &str,
        state: PairStateKind,
        options: PairStateOptions,
    ) -> PairState {
        let pair_state = PairState::new(exchange, symbol, state, options);
        let previous = self.states.insert(pair_state.key(), pair_state.clone());

        info!(
            "Pair state changed: {}:{} {} -> {} (options: {:?})",
            exchange,
            symbol,
            previous
                .as_ref()
                .map(|p| p.state.as_str())
                .unwrap_or("none"),
            state,
            pair_state.options
        );

        pair_state
    }

    /// Same as `update` but parses the state, failing on unknown values
    pub fn update_from_str(
        &self,
        exchange: &str,
        symbol: &str,
        state: &str,
        options: PairStateOptions,
    ) -> crate::error::Result<PairState> {
        let state: PairStateKind = state.parse()?;
        Ok(self.update(exchange, symbol, state, options))
    }

    pub fn get(&self, exchange: &str, symbol: &str) -> Option<PairState> {
        self.states
            .get(&PairKey::new(exchange, symbol))
            .map(|s| s.value().clone())
    }

    /// Remove the record for a pair
    pub fn clear(&self, exchange: &str, symbol: &str) -> Option<PairState> {
        let removed = self
            .states
            .remove(&PairKey::new(exchange, symbol))
            .map(|(_, state)| state);

        if let Some(ref state) = removed {
            info!("Pair state cleared: {}:{} ({})", exchange, symbol, state.state);
        }

        removed
    }

    /// Remove the record only if it is still the one identified by `pair_state.id`
    pub fn clear_if(&self, pair_state: &PairState) -> bool {
        let removed = self
            .states
            .remove_if(&pair_state.key(), |_, current| current.id == pair_state.id)
            .is_some();

        if removed {
            info!(
                "Pair state cleared: {} ({})",
                pair_state.key(),
                pair_state.state
            );
        } else {
            debug!(
                "Pair state {} replaced in the meantime, clear skipped",
                pair_state.key()
            );
        }

        removed
    }

    /// Apply `f` to the record if it is still the one identified by `pair_state.id`
    pub fn modify<F>(&self, pair_state: &PairState, f: F) -> bool
    where
        F: FnOnce(&mut PairState),
    {
        match self.states.get_mut(&pair_state.key()) {
            Some(mut current) if current.id == pair_state.id => {
                f(current.value_mut());
                true
            }
            _ => {
                debug!(
                    "Pair state {} replaced in the meantime, write skipped",
                    pair_state.key()
                );
                false
            }
        }
    }

    /// Count one more failed attempt; the next tick resubmits
    pub fn trigger_retry(&self, pair_state: &PairState) -> bool {
        self.modify(pair_state, |current| {
            current.retries += 1;
            debug!("Pair state {} retry #{}", current.key(), current.retries);
        })
    }

    /// Track (or forget) the venue order of a pair
    pub fn set_exchange_order(
        &self,
        pair_state: &PairState,
        exchange_order: Option<ExchangeOrder>,
        order: Option<Order>,
    ) -> bool {
        self.modify(pair_state, |current| {
            current.exchange_order = exchange_order;
            if order.is_some() {
                current.order = order;
            }
        })
    }

    pub fn all(&self) -> Vec<PairState> {
        let mut states: Vec<PairState> = self.states.iter().map(|s| s.value().clone()).collect();
        states.sort_by(|a, b| a.key().cmp(&b.key()));
        states
    }

    /// No desired state is in flight for the pair
    pub fn is_neutral(&self, exchange: &str, symbol: &str) -> bool {
        !self.states.contains_key(&PairKey::new(exchange, symbol))
    }

    pub fn by_state(&self, state: PairStateKind) -> Vec<PairState> {
        self.all().into_iter().filter(|s| s.state == state).collect()
    }

    pub fn longs(&self) -> Vec<PairState> {
        self.by_state(PairStateKind::Long)
    }

    pub fn shorts(&self) -> Vec<PairState> {
        self.by_state(PairStateKind::Short)
    }

    pub fn closes(&self) -> Vec<PairState> {
        self.by_state(PairStateKind::Close)
    }

    pub fn cancels(&self) -> Vec<PairState> {
        self.by_state(PairStateKind::Cancel)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
