use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closing,
    Closed,
    Failed,
}

impl PositionStatus {
    /// Status only moves forward; a closed position never reopens.
    pub fn can_transition_to(self, next: PositionStatus) -> bool {
        use PositionStatus::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Open, Closing | Closed | Failed) => true,
            (Closing, Closed | Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

/// An open (or historical) holding in one launchpad token.
///
/// `token_balance` is in token base units; `entry_amount_sol` is fractional
/// SOL at entry time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionState {
    pub id: String,
    pub wallet_id: String,
    pub tracked_token_id: String,
    pub mint_address: String,
    pub entry_amount_sol: f64,
    pub token_balance: u64,
    pub entry_price: Option<f64>,
    pub status: PositionStatus,
    pub opened_at: i64,
    pub closed_at: Option<i64>,
}

impl PositionState {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Closed positions hold nothing and carry a close timestamp.
    pub fn invariants_hold(&self) -> bool {
        match self.status {
            PositionStatus::Closed => self.token_balance == 0 && self.closed_at.is_some(),
            PositionStatus::Open => self.closed_at.is_none(),
            _ => true,
        }
    }
}

/// Partial update applied through the state engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub token_balance: Option<u64>,
    pub status: Option<PositionStatus>,
    pub entry_price: Option<f64>,
    pub closed_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_is_terminal() {
        assert!(!PositionStatus::Closed.can_transition_to(PositionStatus::Open));
        assert!(!PositionStatus::Closed.can_transition_to(PositionStatus::Closing));
        assert!(PositionStatus::Open.can_transition_to(PositionStatus::Closing));
        assert!(PositionStatus::Closing.can_transition_to(PositionStatus::Closed));
        assert!(!PositionStatus::Closing.can_transition_to(PositionStatus::Open));
    }

    #[test]
    fn closed_invariant() {
        let p = PositionState {
            id: "pos-1".into(),
            wallet_id: "w-1".into(),
            tracked_token_id: "t-1".into(),
            mint_address: "Mint".into(),
            entry_amount_sol: 0.25,
            token_balance: 0,
            entry_price: None,
            status: PositionStatus::Closed,
            opened_at: 1,
            closed_at: Some(2),
        };
        assert!(p.invariants_hold());

        let bad = PositionState { token_balance: 5, ..p };
        assert!(!bad.invariants_hold());
    }
}
