//! Declarative defense rules evaluated against every ingested event.

use std::sync::Arc;
use std::sync::RwLock;

use aegis_core::policy::PolicyEvaluationResult;
use aegis_core::{telemetry, InternalEvent, PolicyDefinition, TriggerType};
use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::ports::PolicyStore;
use crate::state::StateEngine;

pub struct PolicyEngine {
    policies: RwLock<Vec<PolicyDefinition>>,
    store: Arc<dyn PolicyStore>,
    state: Arc<StateEngine>,
}

impl PolicyEngine {
    pub fn new(store: Arc<dyn PolicyStore>, state: Arc<StateEngine>) -> Self {
        Self { policies: RwLock::new(Vec::new()), store, state }
    }

    pub async fn start(&self) -> Result<()> {
        let loaded = self.store.load_active_policies().await.context("loading policies")?;
        info!(count = loaded.len(), "policy engine loaded active policies");
        *self.policies.write().unwrap() = loaded;
        Ok(())
    }

    pub fn policies(&self) -> Vec<PolicyDefinition> {
        self.policies.read().unwrap().clone()
    }

    pub fn get_policy(&self, id: &str) -> Option<PolicyDefinition> {
        self.policies.read().unwrap().iter().find(|p| p.id == id).cloned()
    }

    /// In-memory only; persisting the definition is the caller's concern.
    pub fn add_policy(&self, policy: PolicyDefinition) {
        self.policies.write().unwrap().push(policy);
    }

    pub fn remove_policy(&self, id: &str) -> bool {
        let mut all = self.policies.write().unwrap();
        let before = all.len();
        all.retain(|p| p.id != id);
        all.len() != before
    }

    /// Evaluate one policy against one event. `None` when the policy does not
    /// apply to the event variant (including the oracle-less price trigger).
    pub fn evaluate_policy(
        &self,
        policy: &PolicyDefinition,
        event: &InternalEvent,
    ) -> Option<PolicyEvaluationResult> {
        let trigger_value = match (policy.trigger, event) {
            (TriggerType::DevSellPercentage, InternalEvent::DevWalletSell { mint_address, dev_wallet, .. }) => {
                self.state.dev_sell_percentage_in_window(mint_address, dev_wallet, policy.window_ms())
            }
            (TriggerType::DevSellCount, InternalEvent::DevWalletSell { mint_address, dev_wallet, .. }) => {
                self.state
                    .get_dev_metrics(mint_address, dev_wallet)
                    .map(|m| m.total_sell_count as f64)
                    .unwrap_or(0.0)
            }
            (TriggerType::LpRemovalPercentage, InternalEvent::LpRemove { pool_address, .. }) => self
                .state
                .get_lp_state(pool_address)
                .map(|lp| lp.total_removed_percentage)
                .unwrap_or(0.0),
            (TriggerType::LpRemovalTotal, InternalEvent::LpRemove { pool_address, .. }) => self
                .state
                .get_lp_state(pool_address)
                .map(|lp| lp.total_removed_amount as f64)
                .unwrap_or(0.0),
            (TriggerType::SupplyIncrease, InternalEvent::SupplyChange { change_percentage, .. }) => {
                *change_percentage
            }
            // No price oracle and no outflow aggregation in this node.
            (TriggerType::PriceDropPercentage, _) | (TriggerType::WalletOutflow, _) => return None,
            _ => return None,
        };

        let triggered = trigger_value >= policy.threshold;
        Some(PolicyEvaluationResult {
            policy_id: policy.id.clone(),
            triggered,
            action: policy.action,
            action_params: policy.action_params.clone(),
            trigger_value,
            threshold: policy.threshold,
            reason: format!(
                "{:?}: value {:.4} vs threshold {:.4}",
                policy.trigger, trigger_value, policy.threshold
            ),
        })
    }

    /// All triggered results for an event, highest priority first; ties keep
    /// insertion order.
    pub fn evaluate_event(&self, event: &InternalEvent) -> Vec<PolicyEvaluationResult> {
        let policies = self.policies.read().unwrap();
        let mut triggered: Vec<(i32, PolicyEvaluationResult)> = policies
            .iter()
            .filter(|p| p.is_active)
            .filter_map(|p| self.evaluate_policy(p, event).map(|r| (p.priority, r)))
            .filter(|(_, r)| r.triggered)
            .collect();

        triggered.sort_by(|a, b| b.0.cmp(&a.0)); // stable: insertion order on ties

        for (_, r) in &triggered {
            if let Some(p) = policies.iter().find(|p| p.id == r.policy_id) {
                telemetry::POLICIES_TRIGGERED.with_label_values(&[&format!("{:?}", p.trigger)]).inc();
            }
            debug!(policy = %r.policy_id, value = r.trigger_value, "policy triggered");
        }

        triggered.into_iter().map(|(_, r)| r).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::memory::MemoryStore;
    use aegis_core::events::EventMeta;
    use aegis_core::{ActionParams, PolicyAction};

    fn setup() -> (Arc<StateEngine>, PolicyEngine) {
        let store = Arc::new(MemoryStore::default());
        let state = Arc::new(StateEngine::new(store.clone(), store.clone(), "test"));
        let engine = PolicyEngine::new(store, Arc::clone(&state));
        (state, engine)
    }

    fn policy(id: &str, trigger: TriggerType, threshold: f64, priority: i32) -> PolicyDefinition {
        PolicyDefinition {
            id: id.into(),
            name: format!("{id} rule"),
            trigger,
            threshold,
            window_blocks: None,
            window_seconds: Some(600),
            action: PolicyAction::ExitPosition,
            action_params: None,
            priority,
            is_active: true,
            tracked_token_id: None,
        }
    }

    fn dev_sell(mint: &str, wallet: &str, pct: f64, ts: i64) -> InternalEvent {
        InternalEvent::DevWalletSell {
            meta: EventMeta { id: uuid::Uuid::new_v4().to_string(), slot: 9, timestamp_ms: ts, signature: String::new() },
            mint_address: mint.into(),
            dev_wallet: wallet.into(),
            amount: "5000".into(),
            percentage_of_holdings: pct,
        }
    }

    #[test]
    fn windowed_dev_sell_threshold() {
        let (state, engine) = setup();
        engine.add_policy(policy("dev-30", TriggerType::DevSellPercentage, 30.0, 10));
        let now = aegis_core::now_ms();

        // 10% is outside the 600 s window, 25% inside: 25 < 30, no trigger
        let old = dev_sell("M", "D", 10.0, now - 700_000);
        let recent = dev_sell("M", "D", 25.0, now - 100_000);
        state.apply_event(&old);
        state.apply_event(&recent);
        assert!(engine.evaluate_event(&recent).is_empty());

        // another 10% brings the window to 35 >= 30
        let last = dev_sell("M", "D", 10.0, now - 50_000);
        state.apply_event(&last);
        let results = engine.evaluate_event(&last);
        assert_eq!(results.len(), 1);
        assert!((results[0].trigger_value - 35.0).abs() < 1e-9);
    }

    #[test]
    fn results_sorted_by_priority_descending() {
        let (state, engine) = setup();
        engine.add_policy(policy("low", TriggerType::DevSellPercentage, 1.0, 1));
        engine.add_policy(policy("high", TriggerType::DevSellCount, 1.0, 50));
        engine.add_policy(policy("mid", TriggerType::DevSellPercentage, 1.0, 10));

        let ev = dev_sell("M", "D", 40.0, aegis_core::now_ms());
        state.apply_event(&ev);
        let results = engine.evaluate_event(&ev);

        let ids: Vec<&str> = results.iter().map(|r| r.policy_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);
    }

    #[test]
    fn price_drop_trigger_is_a_stub() {
        let (_state, engine) = setup();
        let p = policy("price", TriggerType::PriceDropPercentage, 20.0, 5);
        let ev = dev_sell("M", "D", 99.0, aegis_core::now_ms());
        assert!(engine.evaluate_policy(&p, &ev).is_none());
    }

    #[test]
    fn inactive_policies_are_skipped() {
        let (state, engine) = setup();
        let mut p = policy("off", TriggerType::DevSellPercentage, 1.0, 1);
        p.is_active = false;
        engine.add_policy(p);

        let ev = dev_sell("M", "D", 50.0, aegis_core::now_ms());
        state.apply_event(&ev);
        assert!(engine.evaluate_event(&ev).is_empty());
    }

    #[test]
    fn partial_sell_params_flow_through() {
        let (state, engine) = setup();
        let mut p = policy("partial", TriggerType::DevSellPercentage, 1.0, 1);
        p.action = PolicyAction::PartialSell;
        p.action_params = Some(ActionParams {
            sell_percentage: Some(35.0),
            max_slippage_bps: Some(300),
            priority_fee_lamports: None,
        });
        engine.add_policy(p);

        let ev = dev_sell("M", "D", 5.0, aegis_core::now_ms());
        state.apply_event(&ev);
        let results = engine.evaluate_event(&ev);
        assert_eq!(results[0].action, PolicyAction::PartialSell);
        assert_eq!(results[0].action_params.as_ref().unwrap().sell_percentage, Some(35.0));
    }

    #[test]
    fn remove_policy_stops_evaluation() {
        let (state, engine) = setup();
        engine.add_policy(policy("gone", TriggerType::DevSellPercentage, 1.0, 1));
        assert!(engine.remove_policy("gone"));
        assert!(!engine.remove_policy("gone"));

        let ev = dev_sell("M", "D", 50.0, aegis_core::now_ms());
        state.apply_event(&ev);
        assert!(engine.evaluate_event(&ev).is_empty());
    }
}
