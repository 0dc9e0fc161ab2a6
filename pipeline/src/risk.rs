//! Pre-trade gate. Collects every violation instead of short-circuiting so a
//! rejected execution is persisted with the full picture.

use std::sync::Arc;

use aegis_core::{ExecutionRequest, RiskParameters};
use dashmap::DashMap;
use tracing::debug;

use crate::state::StateEngine;

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RiskViolation {
    #[error("slippage {requested} bps exceeds cap {max} bps")]
    SlippageTooHigh { requested: u16, max: u16 },
    #[error("priority fee {requested} lamports exceeds cap {max} lamports")]
    PriorityFeeTooHigh { requested: u64, max: u64 },
    #[error("execution cooldown: {remaining_ms} ms remaining for position")]
    ExecutionCooldown { remaining_ms: u64 },
    #[error("position entry {entry_lamports} lamports exceeds cap {max} lamports")]
    PositionTooLarge { entry_lamports: u64, max: u64 },
    #[error("sell percentage {0} outside (0, 100]")]
    BadSellPercentage(f64),
}

#[derive(Debug, Clone)]
pub struct RiskCheckResult {
    pub approved: bool,
    pub violations: Vec<RiskViolation>,
}

impl RiskCheckResult {
    pub fn message(&self) -> String {
        self.violations.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("; ")
    }
}

pub struct RiskEngine {
    params: RiskParameters,
    state: Arc<StateEngine>,
    last_execution_ms: DashMap<String, i64>,
}

impl RiskEngine {
    pub fn new(params: RiskParameters, state: Arc<StateEngine>) -> Self {
        Self { params, state, last_execution_ms: DashMap::new() }
    }

    pub fn params(&self) -> RiskParameters {
        self.params
    }

    /// Synchronous gate. An approval stamps the cooldown for the position.
    pub fn evaluate(&self, request: &ExecutionRequest) -> RiskCheckResult {
        let mut violations = Vec::new();

        if request.max_slippage_bps > self.params.max_slippage_bps {
            violations.push(RiskViolation::SlippageTooHigh {
                requested: request.max_slippage_bps,
                max: self.params.max_slippage_bps,
            });
        }

        if request.priority_fee_lamports > self.params.max_priority_fee_lamports {
            violations.push(RiskViolation::PriorityFeeTooHigh {
                requested: request.priority_fee_lamports,
                max: self.params.max_priority_fee_lamports,
            });
        }

        let now = aegis_core::now_ms();
        if let Some(last) = self.last_execution_ms.get(&request.position_id) {
            let elapsed = now - *last;
            if elapsed < self.params.execution_cooldown_ms as i64 {
                violations.push(RiskViolation::ExecutionCooldown {
                    remaining_ms: (self.params.execution_cooldown_ms as i64 - elapsed) as u64,
                });
            }
        }

        // Missing position is not a risk matter; the execution engine rejects
        // it separately.
        if let Some(position) = self.state.get_position(&request.position_id) {
            let entry_lamports = (position.entry_amount_sol * LAMPORTS_PER_SOL) as u64;
            if entry_lamports > self.params.max_position_size_lamports {
                violations.push(RiskViolation::PositionTooLarge {
                    entry_lamports,
                    max: self.params.max_position_size_lamports,
                });
            }
        }

        if request.sell_percentage <= 0.0 || request.sell_percentage > 100.0 {
            violations.push(RiskViolation::BadSellPercentage(request.sell_percentage));
        }

        let approved = violations.is_empty();
        if approved {
            self.last_execution_ms.insert(request.position_id.clone(), now);
        } else {
            debug!(position = %request.position_id, ?violations, "risk rejected");
        }
        RiskCheckResult { approved, violations }
    }

    /// Clear the cooldown stamp, used after an execution the stamp gated is
    /// known to not have reached the chain.
    pub fn reset_cooldown(&self, position_id: &str) {
        self.last_execution_ms.remove(position_id);
    }
}
