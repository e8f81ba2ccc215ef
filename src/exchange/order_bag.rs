//! In-memory index of the orders a venue adapter knows about

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::domain::{ExchangeOrder, ExchangeOrderStatus};

/// Per-venue order index with a uniform query surface
#[derive(Debug, Default)]
pub struct OrderBag {
    orders: DashMap<String, ExchangeOrder>,
}

impl OrderBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a venue order update.
    ///
    /// An id already known as done or canceled is never reopened: an open
    /// update for it drops the id instead.
    pub fn triggered_order(&self, order: ExchangeOrder) {
        match self.orders.entry(order.id.clone()) {
            Entry::Occupied(mut entry) => {
                let closed = matches!(
                    entry.get().status,
                    ExchangeOrderStatus::Done | ExchangeOrderStatus::Canceled
                );

                if closed && !order.status.is_terminal() {
                    debug!(
                        "Order bag: dropping {} instead of reopening closed order ({} -> {})",
                        order.id,
                        entry.get().status,
                        order.status
                    );
                    entry.remove();
                    return;
                }

                entry.insert(order);
            }
            Entry::Vacant(entry) => {
                entry.insert(order);
            }
        }
    }

    /// Replace the whole index with a fresh venue snapshot
    pub fn set(&self, orders: Vec<ExchangeOrder>) {
        self.orders.clear();
        for order in orders {
            self.orders.insert(order.id.clone(), order);
        }
    }

    pub fn get(&self, id: &str) -> Option<ExchangeOrder> {
        self.orders.get(id).map(|o| o.value().clone())
    }

    pub fn delete(&self, id: &str) -> Option<ExchangeOrder> {
        self.orders.remove(id).map(|(_, order)| order)
    }

    /// Lookup by venue id, falling back to our client id
    pub fn find_order_by_id(&self, id: &str) -> Option<ExchangeOrder> {
        self.get(id).or_else(|| self.find_order_by_our_id(id))
    }

    pub fn find_order_by_our_id(&self, our_id: &str) -> Option<ExchangeOrder> {
        self.orders
            .iter()
            .find(|o| o.our_id.as_deref() == Some(our_id))
            .map(|o| o.value().clone())
    }

    pub fn all(&self) -> Vec<ExchangeOrder> {
        self.orders.iter().map(|o| o.value().clone()).collect()
    }

    pub fn open_orders(&self) -> Vec<ExchangeOrder> {
        self.orders
            .iter()
            .filter(|o| o.is_open())
            .map(|o| o.value().clone())
            .collect()
    }

    pub fn open_orders_for_symbol(&self, symbol: &str) -> Vec<ExchangeOrder> {
        self.orders
            .iter()
            .filter(|o| o.is_open() && o.symbol == symbol)
            .map(|o| o.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderType, Side};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn order(id: &str, symbol: &str, status: ExchangeOrderStatus) -> ExchangeOrder {
        ExchangeOrder {
            id: id.to_string(),
            symbol: symbol.to_string(),
            status,
            price: dec!(100),
            amount: dec!(1),
            retry: false,
            our_id: Some(format!("our-{}", id)),
            side: Side::Long,
            order_type: OrderType::Limit,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_closed_order_is_not_reopened() {
        let bag = OrderBag::new();
        bag.triggered_order(order("1", "BTCUSD", ExchangeOrderStatus::Done));
        bag.triggered_order(order("1", "BTCUSD", ExchangeOrderStatus::Open));
        assert!(bag.get("1").is_none());

        bag.triggered_order(order("2", "BTCUSD", ExchangeOrderStatus::Canceled));
        bag.triggered_order(order("2", "BTCUSD", ExchangeOrderStatus::Open));
        assert!(bag.get("2").is_none());
    }

    #[test]
    fn test_open_order_progresses_to_terminal() {
        let bag = OrderBag::new();
        bag.triggered_order(order("1", "BTCUSD", ExchangeOrderStatus::Open));
        bag.triggered_order(order("1", "BTCUSD", ExchangeOrderStatus::Done));
        assert_eq!(bag.get("1").unwrap().status, ExchangeOrderStatus::Done);
        assert!(bag.open_orders().is_empty());
    }

    #[test]
    fn test_queries() {
        let bag = OrderBag::new();
        bag.triggered_order(order("1", "BTCUSD", ExchangeOrderStatus::Open));
        bag.triggered_order(order("2", "ETHUSD", ExchangeOrderStatus::Open));
        bag.triggered_order(order("3", "BTCUSD", ExchangeOrderStatus::Rejected));

        assert_eq!(bag.open_orders().len(), 2);
        assert_eq!(bag.open_orders_for_symbol("BTCUSD").len(), 1);
        assert_eq!(bag.find_order_by_id("our-2").unwrap().id, "2");
        assert_eq!(bag.find_order_by_our_id("our-3").unwrap().id, "3");

        bag.set(vec![order("9", "BTCUSD", ExchangeOrderStatus::Open)]);
        assert_eq!(bag.len(), 1);
        assert!(bag.delete("9").is_some());
        assert!(bag.is_empty());
    }
}
