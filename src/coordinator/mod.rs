//! Runtime wiring of the reconciliation engine

pub mod engine;

pub use engine::Engine;
