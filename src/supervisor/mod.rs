pub mod watchdog;

pub use watchdog::{position_profit, ExchangeOrderWatchdog};
