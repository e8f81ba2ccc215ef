pub mod position_watcher;
pub mod tickers;

pub use position_watcher::PositionWatcher;
pub use tickers::Tickers;
