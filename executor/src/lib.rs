pub mod builder;
pub mod chain;
pub mod engine;

#[cfg(test)]
mod engine_tests;

pub use chain::{ChainClient, LaunchTransaction, RpcChainClient, SimulationOutcome};
pub use engine::ExecutionEngine;
