use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    DevSellPercentage,
    DevSellCount,
    LpRemovalPercentage,
    LpRemovalTotal,
    SupplyIncrease,
    /// Declared but unevaluated: there is no price oracle in this node.
    PriceDropPercentage,
    /// Declared but unevaluated: no outflow aggregation source.
    WalletOutflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyAction {
    ExitPosition,
    PartialSell,
    HaltStrategy,
    AlertOnly,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sell_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_slippage_bps: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_fee_lamports: Option<u64>,
}

/// A declarative defense rule evaluated against every ingested event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDefinition {
    pub id: String,
    pub name: String,
    pub trigger: TriggerType,
    pub threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_blocks: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_seconds: Option<u64>,
    pub action: PolicyAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_params: Option<ActionParams>,
    pub priority: i32,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracked_token_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyValidationError {
    #[error("threshold must be > 0, got {0}")]
    NonPositiveThreshold(f64),
    #[error("PARTIAL_SELL requires sellPercentage in (0, 100], got {0:?}")]
    BadSellPercentage(Option<f64>),
    #[error("maxSlippageBps must be in [1, 10000], got {0}")]
    BadSlippage(u16),
}

impl PolicyDefinition {
    pub fn validate(&self) -> Result<(), PolicyValidationError> {
        if self.threshold <= 0.0 {
            return Err(PolicyValidationError::NonPositiveThreshold(self.threshold));
        }
        if self.action == PolicyAction::PartialSell {
            let pct = self.action_params.as_ref().and_then(|p| p.sell_percentage);
            match pct {
                Some(p) if p > 0.0 && p <= 100.0 => {}
                other => return Err(PolicyValidationError::BadSellPercentage(other)),
            }
        }
        if let Some(bps) = self.action_params.as_ref().and_then(|p| p.max_slippage_bps) {
            if bps == 0 || bps > 10_000 {
                return Err(PolicyValidationError::BadSlippage(bps));
            }
        }
        Ok(())
    }

    /// Evaluation window in milliseconds; dev-sell windows default to 10 min.
    pub fn window_ms(&self) -> i64 {
        self.window_seconds.unwrap_or(600) as i64 * 1000
    }
}

/// Outcome of evaluating one policy against one event.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyEvaluationResult {
    pub policy_id: String,
    pub triggered: bool,
    pub action: PolicyAction,
    pub action_params: Option<ActionParams>,
    pub trigger_value: f64,
    pub threshold: f64,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(action: PolicyAction, params: Option<ActionParams>) -> PolicyDefinition {
        PolicyDefinition {
            id: "pol-1".into(),
            name: "dev dump guard".into(),
            trigger: TriggerType::DevSellPercentage,
            threshold: 30.0,
            window_blocks: None,
            window_seconds: Some(600),
            action,
            action_params: params,
            priority: 10,
            is_active: true,
            tracked_token_id: None,
        }
    }

    #[test]
    fn rejects_zero_threshold() {
        let mut p = policy(PolicyAction::ExitPosition, None);
        p.threshold = 0.0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn partial_sell_needs_valid_percentage() {
        let p = policy(PolicyAction::PartialSell, None);
        assert!(p.validate().is_err());

        let p = policy(
            PolicyAction::PartialSell,
            Some(ActionParams { sell_percentage: Some(150.0), ..Default::default() }),
        );
        assert!(p.validate().is_err());

        let p = policy(
            PolicyAction::PartialSell,
            Some(ActionParams { sell_percentage: Some(50.0), ..Default::default() }),
        );
        assert!(p.validate().is_ok());
    }

    #[test]
    fn window_defaults_to_ten_minutes() {
        let mut p = policy(PolicyAction::ExitPosition, None);
        p.window_seconds = None;
        assert_eq!(p.window_ms(), 600_000);
    }
}
