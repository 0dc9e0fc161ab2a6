pub mod deployer;
pub mod graph;
pub mod patterns;

pub use deployer::{DeployerProfile, DeployerScoreEngine};
pub use graph::{EdgeType, WalletGraph};
pub use patterns::{Pattern, PatternCondition, PatternDatabase};
