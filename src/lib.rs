pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod risk;
pub mod services;
pub mod state;
pub mod strategy;
pub mod supervisor;

pub use config::AppConfig;
pub use coordinator::Engine;
pub use domain::{
    ExchangeOrder, ExchangeOrderStatus, Order, OrderType, OrderUpdate, PairState, PairStateKind,
    PairStateOptions, Position, PositionStateChangeEvent, Side, SubmitOutcome, Ticker,
};
pub use error::{OrderError, PairSyncError, Result};
pub use exchange::{Exchange, ExchangeManager, PaperExchange};
pub use services::{PositionWatcher, Tickers};
pub use state::PairStateManager;
pub use strategy::{OrderCalculator, OrderExecutor, PairStateExecution};
pub use supervisor::ExchangeOrderWatchdog;
