use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use super::Exchange;
use crate::domain::{ExchangeOrder, Position};
use crate::error::{PairSyncError, Result};

/// Registry of venue adapters, built once at startup
#[derive(Clone, Default)]
pub struct ExchangeManager {
    exchanges: HashMap<String, Arc<dyn Exchange>>,
}

impl ExchangeManager {
    pub fn new(exchanges: Vec<Arc<dyn Exchange>>) -> Self {
        let exchanges = exchanges
            .into_iter()
            .map(|exchange| (exchange.name().to_string(), exchange))
            .collect();

        Self { exchanges }
    }

    /// Register a venue under an explicit name
    pub fn register(&mut self, name: impl Into<String>, exchange: Arc<dyn Exchange>) {
        self.exchanges.insert(name.into(), exchange);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Exchange>> {
        self.exchanges.get(name).cloned()
    }

    pub fn get_or_err(&self, name: &str) -> Result<Arc<dyn Exchange>> {
        self.get(name)
            .ok_or_else(|| PairSyncError::UnknownExchange(name.to_string()))
    }

    pub fn all(&self) -> Vec<Arc<dyn Exchange>> {
        self.exchanges.values().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.exchanges.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn get_position(&self, exchange: &str, symbol: &str) -> Result<Option<Position>> {
        self.get_or_err(exchange)?
            .get_position_for_symbol(symbol)
            .await
    }

    /// Open positions of every venue; a failing venue is logged and skipped
    pub async fn get_positions(&self) -> Vec<(String, Position)> {
        let mut positions = Vec::new();

        for (name, exchange) in &self.exchanges {
            match exchange.get_positions().await {
                Ok(list) => positions.extend(list.into_iter().map(|p| (name.clone(), p))),
                Err(e) => warn!("Failed to fetch positions from {}: {}", name, e),
            }
        }

        positions
    }

    /// Open orders for a pair
    pub async fn get_orders(&self, exchange: &str, symbol: &str) -> Result<Vec<ExchangeOrder>> {
        self.get_or_err(exchange)?
            .get_orders_for_symbol(symbol)
            .await
    }

    pub async fn find_order_by_id(&self, exchange: &str, id: &str) -> Result<Option<ExchangeOrder>> {
        self.get_or_err(exchange)?.find_order_by_id(id).await
    }
}
