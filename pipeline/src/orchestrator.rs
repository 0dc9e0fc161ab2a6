//! Maps triggered policies to execution requests for every affected open
//! position, under a single-flight gate.
//!
//! While one event is in flight, concurrently arriving events are dropped:
//! triggers are threshold-based over monotonic state, so a dropped edge
//! re-fires on the next qualifying event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use aegis_core::{
    telemetry, ExecutionAction, ExecutionRequest, ExecutionResult, ExecutionStatus, InternalEvent,
    PolicyAction, RiskParameters,
};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::policy::PolicyEngine;
use crate::ports::ExecutionStore;
use crate::state::StateEngine;

const DEFAULT_PARTIAL_SELL_PCT: f64 = 50.0;

/// Where execution requests go. Implemented by the execution engine; tests
/// substitute a recorder.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> ExecutionResult;
}

pub struct Orchestrator {
    policy: Arc<PolicyEngine>,
    state: Arc<StateEngine>,
    sink: Arc<dyn ExecutionSink>,
    executions: Arc<dyn ExecutionStore>,
    params: RiskParameters,
    processing: AtomicBool,
    halted: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        policy: Arc<PolicyEngine>,
        state: Arc<StateEngine>,
        sink: Arc<dyn ExecutionSink>,
        executions: Arc<dyn ExecutionStore>,
        params: RiskParameters,
    ) -> Self {
        Self {
            policy,
            state,
            sink,
            executions,
            params,
            processing: AtomicBool::new(false),
            halted: AtomicBool::new(false),
        }
    }

    /// Register on the bus. Must come after the state engine so triggers read
    /// post-update metrics.
    pub async fn start(self: &Arc<Self>, bus: &EventBus) {
        let me = Arc::clone(self);
        bus.subscribe("orchestrator", move |event| {
            let me = Arc::clone(&me);
            async move { me.handle_event(event) }
        })
        .await;
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Clear a HALT_STRATEGY stop; policy-driven executions resume.
    pub fn resume(&self) {
        self.halted.store(false, Ordering::SeqCst);
        info!("orchestrator resumed");
    }

    /// Single-flight entry point. Processing happens on its own task so the
    /// bus dispatcher is never blocked behind an execution.
    pub fn handle_event(self: &Arc<Self>, event: InternalEvent) {
        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            telemetry::EVENTS_DROPPED_BUSY.inc();
            debug!(variant = event.variant(), "orchestrator busy; dropping event");
            return;
        }

        let me = Arc::clone(self);
        tokio::spawn(async move {
            me.process_event(&event).await;
            me.processing.store(false, Ordering::SeqCst);
        });
    }

    async fn process_event(&self, event: &InternalEvent) {
        let results = self.policy.evaluate_event(event);
        if results.is_empty() {
            return;
        }

        let mint = event.mint_address();
        for result in results {
            let policy = self.policy.get_policy(&result.policy_id);

            match result.action {
                PolicyAction::AlertOnly => {
                    info!(policy = %result.policy_id, reason = %result.reason, "alert-only policy fired");
                    continue;
                }
                PolicyAction::HaltStrategy => {
                    self.halted.store(true, Ordering::SeqCst);
                    warn!(policy = %result.policy_id, reason = %result.reason, "strategy halted by policy");
                    let row = ExecutionResult {
                        id: uuid::Uuid::new_v4().to_string(),
                        position_id: String::new(),
                        policy_id: result.policy_id.clone(),
                        status: ExecutionStatus::Confirmed,
                        tx_signature: None,
                        amount_in: None,
                        amount_out: None,
                        error_message: Some(format!("halt: {}", result.reason)),
                        simulation_logs: None,
                        completed_at: aegis_core::now_ms(),
                    };
                    if let Err(e) = self.executions.insert_execution(&row).await {
                        warn!("failed to persist halt record: {e:#}");
                    }
                    continue;
                }
                PolicyAction::ExitPosition | PolicyAction::PartialSell => {}
            }

            if self.is_halted() {
                debug!(policy = %result.policy_id, "halted; suppressing policy execution");
                continue;
            }

            let (action, sell_percentage) = match result.action {
                PolicyAction::ExitPosition => (ExecutionAction::FullExit, 100.0),
                PolicyAction::PartialSell => (
                    ExecutionAction::PartialSell,
                    result
                        .action_params
                        .as_ref()
                        .and_then(|p| p.sell_percentage)
                        .unwrap_or(DEFAULT_PARTIAL_SELL_PCT),
                ),
                _ => unreachable!(),
            };

            let max_slippage_bps = result
                .action_params
                .as_ref()
                .and_then(|p| p.max_slippage_bps)
                .unwrap_or(self.params.max_slippage_bps);
            let priority_fee = result
                .action_params
                .as_ref()
                .and_then(|p| p.priority_fee_lamports)
                .unwrap_or(self.params.max_priority_fee_lamports);

            let mut positions = self.state.get_positions_by_mint(mint);
            if let Some(token_id) = policy.as_ref().and_then(|p| p.tracked_token_id.as_ref()) {
                positions.retain(|p| &p.tracked_token_id == token_id);
            }

            info!(
                policy = %result.policy_id,
                mint,
                positions = positions.len(),
                ?action,
                "issuing policy-driven executions"
            );
            for position in positions {
                let request = ExecutionRequest {
                    position_id: position.id.clone(),
                    policy_id: result.policy_id.clone(),
                    action,
                    sell_percentage,
                    max_slippage_bps,
                    priority_fee_lamports: priority_fee,
                };
                let outcome = self.sink.execute(request).await;
                debug!(position = %position.id, status = ?outcome.status, "execution finished");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::memory::MemoryStore;
    use aegis_core::events::EventMeta;
    use aegis_core::{PolicyDefinition, PositionState, PositionStatus, TriggerType};
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct RecordingSink {
        requests: Mutex<Vec<ExecutionRequest>>,
        delay: Duration,
    }

    #[async_trait]
    impl ExecutionSink for RecordingSink {
        async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
            tokio::time::sleep(self.delay).await;
            let id = uuid::Uuid::new_v4().to_string();
            let result = ExecutionResult {
                id,
                position_id: request.position_id.clone(),
                policy_id: request.policy_id.clone(),
                status: ExecutionStatus::Confirmed,
                tx_signature: Some("sig".into()),
                amount_in: None,
                amount_out: None,
                error_message: None,
                simulation_logs: None,
                completed_at: aegis_core::now_ms(),
            };
            self.requests.lock().await.push(request);
            result
        }
    }

    async fn setup(delay: Duration) -> (Arc<StateEngine>, Arc<PolicyEngine>, Arc<RecordingSink>, Arc<Orchestrator>) {
        let store = Arc::new(MemoryStore::default());
        let state = Arc::new(StateEngine::new(store.clone(), store.clone(), "test"));
        let policy = Arc::new(PolicyEngine::new(store.clone(), Arc::clone(&state)));
        let sink = Arc::new(RecordingSink { requests: Mutex::new(Vec::new()), delay });
        let orch = Arc::new(Orchestrator::new(
            Arc::clone(&policy),
            Arc::clone(&state),
            sink.clone(),
            store,
            RiskParameters::default(),
        ));
        (state, policy, sink, orch)
    }

    fn exit_policy(threshold: f64) -> PolicyDefinition {
        PolicyDefinition {
            id: "exit-on-dump".into(),
            name: "exit on dump".into(),
            trigger: TriggerType::DevSellPercentage,
            threshold,
            window_blocks: None,
            window_seconds: Some(600),
            action: PolicyAction::ExitPosition,
            action_params: None,
            priority: 10,
            is_active: true,
            tracked_token_id: None,
        }
    }

    fn open_position(id: &str, mint: &str) -> PositionState {
        PositionState {
            id: id.into(),
            wallet_id: "w".into(),
            tracked_token_id: "t".into(),
            mint_address: mint.into(),
            entry_amount_sol: 0.1,
            token_balance: 1_000,
            entry_price: None,
            status: PositionStatus::Open,
            opened_at: 0,
            closed_at: None,
        }
    }

    fn dev_sell(mint: &str, pct: f64) -> InternalEvent {
        InternalEvent::DevWalletSell {
            meta: EventMeta {
                id: uuid::Uuid::new_v4().to_string(),
                slot: 5,
                timestamp_ms: aegis_core::now_ms(),
                signature: String::new(),
            },
            mint_address: mint.into(),
            dev_wallet: "Dev".into(),
            amount: "1".into(),
            percentage_of_holdings: pct,
        }
    }

    #[tokio::test]
    async fn triggered_policy_exits_every_position_on_the_mint() {
        let (state, policy, sink, orch) = setup(Duration::ZERO).await;
        policy.add_policy(exit_policy(30.0));
        state.add_position(open_position("p1", "M")).await.unwrap();
        state.add_position(open_position("p2", "M")).await.unwrap();
        state.add_position(open_position("p3", "Other")).await.unwrap();

        let ev = dev_sell("M", 40.0);
        state.apply_event(&ev);
        orch.handle_event(ev);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let requests = sink.requests.lock().await;
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.action == ExecutionAction::FullExit));
        assert!(requests.iter().all(|r| (r.sell_percentage - 100.0).abs() < 1e-9));
        let ids: Vec<&str> = requests.iter().map(|r| r.position_id.as_str()).collect();
        assert!(ids.contains(&"p1") && ids.contains(&"p2"));
    }

    #[tokio::test]
    async fn single_flight_drops_concurrent_events() {
        let (state, policy, sink, orch) = setup(Duration::from_millis(100)).await;
        policy.add_policy(exit_policy(1.0));
        state.add_position(open_position("p1", "M")).await.unwrap();

        let first = dev_sell("M", 50.0);
        state.apply_event(&first);
        orch.handle_event(first);

        // arrives while the first is still executing: dropped
        let second = dev_sell("M", 60.0);
        state.apply_event(&second);
        orch.handle_event(second);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(sink.requests.lock().await.len(), 1);

        // the gate is open again afterwards
        let third = dev_sell("M", 70.0);
        orch.handle_event(third);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.requests.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn halt_policy_suppresses_later_executions() {
        let (state, policy, sink, orch) = setup(Duration::ZERO).await;
        let mut halt = exit_policy(1.0);
        halt.id = "halt".into();
        halt.action = PolicyAction::HaltStrategy;
        halt.priority = 100;
        policy.add_policy(halt);
        policy.add_policy(exit_policy(1.0));
        state.add_position(open_position("p1", "M")).await.unwrap();

        let ev = dev_sell("M", 10.0);
        state.apply_event(&ev);
        orch.handle_event(ev);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // halt fired first (priority 100) and suppressed the exit policy
        assert!(orch.is_halted());
        assert!(sink.requests.lock().await.is_empty());

        orch.resume();
        assert!(!orch.is_halted());
    }

    #[tokio::test]
    async fn alert_only_issues_nothing() {
        let (state, policy, sink, orch) = setup(Duration::ZERO).await;
        let mut alert = exit_policy(1.0);
        alert.action = PolicyAction::AlertOnly;
        policy.add_policy(alert);
        state.add_position(open_position("p1", "M")).await.unwrap();

        let ev = dev_sell("M", 10.0);
        state.apply_event(&ev);
        orch.handle_event(ev);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sink.requests.lock().await.is_empty());
    }
}
