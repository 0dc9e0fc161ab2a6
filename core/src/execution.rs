use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionAction {
    FullExit,
    PartialSell,
    Halt,
}

/// A sell (or halt) order flowing from a triggered policy to the execution
/// engine. Slippage and priority fee are bounded by the risk parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub position_id: String,
    pub policy_id: String,
    pub action: ExecutionAction,
    pub sell_percentage: f64,
    pub max_slippage_bps: u16,
    pub priority_fee_lamports: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Simulating,
    Submitted,
    Confirmed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Simulating => "simulating",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub id: String,
    pub position_id: String,
    pub policy_id: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_out: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulation_logs: Option<Vec<String>>,
    pub completed_at: i64,
}

impl ExecutionResult {
    pub fn failed(request: &ExecutionRequest, id: String, message: String) -> Self {
        Self {
            id,
            position_id: request.position_id.clone(),
            policy_id: request.policy_id.clone(),
            status: ExecutionStatus::Failed,
            tx_signature: None,
            amount_in: None,
            amount_out: None,
            error_message: Some(message),
            simulation_logs: None,
            completed_at: crate::now_ms(),
        }
    }
}
