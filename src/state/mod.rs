pub mod pair_state_manager;

pub use pair_state_manager::PairStateManager;
