pub mod manager;
pub mod order_bag;
pub mod paper;
mod traits;
pub mod utils;

pub use manager::ExchangeManager;
pub use order_bag::OrderBag;
pub use paper::{PaperExchange, PaperStats};
#[cfg(test)]
pub use traits::MockExchange;
pub use traits::Exchange;
