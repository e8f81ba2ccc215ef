pub mod order_calculator;
pub mod order_executor;
pub mod pair_state_execution;

pub use order_calculator::OrderCalculator;
pub use order_executor::{ManagedOrder, OrderExecutor};
pub use pair_state_execution::PairStateExecution;
