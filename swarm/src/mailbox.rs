//! Typed mailboxes between agents: one writer per sender, one reader per
//! (role, channel) binding, plus broadcast to every role on a channel.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::agent::AgentRole;
use crate::intel::deployer::DeployerProfile;

pub const CH_NEW_LAUNCH: &str = "new-launch";
pub const CH_TOKEN_ANALYSIS: &str = "token-analysis";
pub const CH_EXECUTION_PLAN: &str = "execution-plan";
pub const CH_THREAT_EXIT: &str = "threat-exit";
pub const CH_EXECUTION_RESULT: &str = "execution-result";
pub const CH_OUTCOME: &str = "outcome";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskProfile {
    Low,
    Medium,
    High,
    Extreme,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSighting {
    pub signature: String,
    pub slot: u64,
    pub mint: String,
    pub deployer: String,
    pub bonding_curve: String,
    pub seen_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenAnalysis {
    pub mint: String,
    pub deployer: String,
    pub conviction_score: f64,
    pub risk_profile: RiskProfile,
    pub recommended_size_lamports: u64,
    pub cluster_size: usize,
    pub pattern_matches: usize,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub id: String,
    pub mint: String,
    pub base_amount_lamports: u64,
    pub max_slippage_bps: u16,
    pub priority_fee_lamports: u64,
    pub urgency: Urgency,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitAction {
    Hold,
    PartialExit,
    FullExit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatExit {
    pub position_id: String,
    pub mint: String,
    pub urgency: Urgency,
    pub action: ExitAction,
    pub sell_percentage: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeKind {
    Entry,
    Exit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub mint: String,
    pub position_id: Option<String>,
    pub kind: TradeKind,
    pub success: bool,
    pub tx_signature: Option<String>,
    pub lamports_in: Option<u64>,
    pub lamports_out: Option<u64>,
    pub token_amount: Option<u64>,
    pub error: Option<String>,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeFeedback {
    pub mint: String,
    pub pnl_percent: f64,
    pub was_correct: bool,
}

#[derive(Debug, Clone)]
pub enum AgentMessage {
    NewLaunch { sighting: LaunchSighting, profile: DeployerProfile },
    TokenAnalysis(TokenAnalysis),
    ExecutionPlan(ExecutionPlan),
    ThreatExit(ThreatExit),
    ExecutionReport(ExecutionReport),
    Outcome(OutcomeFeedback),
}

/// Routes messages to `(role, channel)` bindings.
pub struct AgentBus {
    routes: DashMap<(AgentRole, String), mpsc::UnboundedSender<AgentMessage>>,
}

impl AgentBus {
    pub fn new() -> Self {
        Self { routes: DashMap::new() }
    }

    /// Bind a mailbox. A re-bind replaces the previous receiver.
    pub fn register(&self, role: AgentRole, channel: &str) -> mpsc::UnboundedReceiver<AgentMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.insert((role, channel.to_string()), tx);
        rx
    }

    pub fn unregister(&self, role: AgentRole, channel: &str) {
        self.routes.remove(&(role, channel.to_string()));
    }

    /// Drop all of a role's bindings, used when an agent stops.
    pub fn unregister_role(&self, role: AgentRole) {
        self.routes.retain(|(r, _), _| *r != role);
    }

    pub fn send(&self, to: AgentRole, channel: &str, message: AgentMessage) -> bool {
        match self.routes.get(&(to, channel.to_string())) {
            Some(tx) => tx.send(message).is_ok(),
            None => {
                debug!(role = to.as_str(), channel, "no mailbox bound; message dropped");
                false
            }
        }
    }

    /// Deliver to every role bound to `channel`.
    pub fn broadcast(&self, channel: &str, message: AgentMessage) -> usize {
        let mut delivered = 0;
        for entry in self.routes.iter() {
            let (_, ch) = entry.key();
            if ch == channel && entry.value().send(message.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

impl Default for AgentBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Drain everything currently queued without waiting.
pub fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(mint: &str) -> AgentMessage {
        AgentMessage::Outcome(OutcomeFeedback { mint: mint.into(), pnl_percent: 1.0, was_correct: true })
    }

    #[test]
    fn routes_to_the_bound_role_only() {
        let bus = AgentBus::new();
        let mut strategist_rx = bus.register(AgentRole::Strategist, CH_OUTCOME);
        let mut memory_rx = bus.register(AgentRole::Memory, CH_EXECUTION_RESULT);

        assert!(bus.send(AgentRole::Strategist, CH_OUTCOME, outcome("A")));
        assert!(!bus.send(AgentRole::Sentinel, CH_OUTCOME, outcome("B")));

        assert_eq!(drain(&mut strategist_rx).len(), 1);
        assert!(drain(&mut memory_rx).is_empty());
    }

    #[test]
    fn broadcast_reaches_every_binding_on_the_channel() {
        let bus = AgentBus::new();
        let mut a = bus.register(AgentRole::Strategist, CH_OUTCOME);
        let mut b = bus.register(AgentRole::Memory, CH_OUTCOME);
        let mut other = bus.register(AgentRole::Executor, CH_EXECUTION_PLAN);

        assert_eq!(bus.broadcast(CH_OUTCOME, outcome("X")), 2);
        assert_eq!(drain(&mut a).len(), 1);
        assert_eq!(drain(&mut b).len(), 1);
        assert!(drain(&mut other).is_empty());
    }

    #[test]
    fn unregister_role_drops_bindings() {
        let bus = AgentBus::new();
        let _rx = bus.register(AgentRole::Memory, CH_EXECUTION_RESULT);
        bus.unregister_role(AgentRole::Memory);
        assert!(!bus.send(AgentRole::Memory, CH_EXECUTION_RESULT, outcome("A")));
    }

    #[test]
    fn urgency_orders_critical_highest() {
        assert!(Urgency::Critical > Urgency::High);
        assert!(Urgency::High > Urgency::Medium);
        assert!(Urgency::Medium > Urgency::Low);
    }
}
