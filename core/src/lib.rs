pub mod curve;
pub mod events;
pub mod execution;
pub mod launchpad;
pub mod policy;
pub mod position;
pub mod telemetry;

pub use curve::{apply_slippage, buy_quote, sell_quote, Quote, Side, FEE_BPS};
pub use events::InternalEvent;
pub use execution::{ExecutionAction, ExecutionRequest, ExecutionResult, ExecutionStatus};
pub use launchpad::BondingCurveState;
pub use policy::{ActionParams, PolicyAction, PolicyDefinition, TriggerType};
pub use position::{PositionState, PositionStatus};

use serde::{Deserialize, Serialize};

/// Process-wide risk limits, immutable after startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskParameters {
    pub max_position_size_lamports: u64,
    pub max_slippage_bps: u16,
    pub max_priority_fee_lamports: u64,
    pub execution_cooldown_ms: u64,
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self {
            max_position_size_lamports: 500_000_000, // 0.5 SOL
            max_slippage_bps: 500,
            max_priority_fee_lamports: 1_000_000,
            execution_cooldown_ms: 5_000,
        }
    }
}

/// Milliseconds since the unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
