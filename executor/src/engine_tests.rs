//! Execution-engine scenarios against a scripted chain.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use aegis_core::{
    BondingCurveState, ExecutionAction, ExecutionRequest, ExecutionStatus, PositionState,
    PositionStatus, RiskParameters,
};
use aegis_pipeline::ports::memory::MemoryStore;
use aegis_pipeline::{RiskEngine, StateEngine};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::transaction::Transaction;

use crate::chain::{ChainClient, LaunchTransaction, SimulationOutcome};
use crate::engine::ExecutionEngine;

struct MockChain {
    curve: BondingCurveState,
    simulation_error: Option<String>,
    /// One entry per expected send: `None` succeeds, `Some(msg)` raises.
    send_script: Mutex<VecDeque<Option<String>>>,
    send_calls: AtomicUsize,
    signature: Signature,
}

impl MockChain {
    fn healthy() -> Self {
        Self {
            curve: BondingCurveState {
                virtual_token_reserves: 1_000_000_000_000,
                virtual_sol_reserves: 30_000_000_000,
                real_token_reserves: 800_000_000_000,
                real_sol_reserves: 20_000_000_000,
                token_total_supply: 1_000_000_000_000,
                complete: false,
                creator: [9u8; 32],
            },
            simulation_error: None,
            send_script: Mutex::new(VecDeque::new()),
            send_calls: AtomicUsize::new(0),
            signature: Signature::new_unique(),
        }
    }

    fn script_sends(self, outcomes: &[Option<&str>]) -> Self {
        *self.send_script.lock().unwrap() =
            outcomes.iter().map(|o| o.map(String::from)).collect();
        self
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn get_bonding_curve(&self, _mint: &Pubkey) -> Result<BondingCurveState> {
        Ok(self.curve.clone())
    }

    async fn latest_blockhash(&self) -> Result<(Hash, u64)> {
        Ok((Hash::new_unique(), 10_000))
    }

    async fn simulate(&self, _tx: &Transaction) -> Result<SimulationOutcome> {
        Ok(SimulationOutcome {
            err: self.simulation_error.clone(),
            logs: vec!["Program log: compute".into()],
            units_consumed: Some(42_000),
        })
    }

    async fn send_raw(&self, _tx: &Transaction, _skip: bool, _retries: usize) -> Result<Signature> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        match self.send_script.lock().unwrap().pop_front() {
            Some(Some(message)) => Err(anyhow!(message)),
            Some(None) | None => Ok(self.signature),
        }
    }

    async fn confirm(&self, _signature: &Signature, _last_valid: u64) -> Result<()> {
        Ok(())
    }

    async fn account_exists(&self, _address: &Pubkey) -> Result<bool> {
        Ok(true)
    }

    async fn current_slot(&self) -> Result<u64> {
        Ok(311_000_000)
    }

    async fn recent_program_signatures(&self, _program: &Pubkey, _limit: usize) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn get_launch_transaction(&self, _signature: &str) -> Result<Option<LaunchTransaction>> {
        Ok(None)
    }
}

struct Fixture {
    chain: Arc<MockChain>,
    state: Arc<StateEngine>,
    store: Arc<MemoryStore>,
    engine: ExecutionEngine,
}

async fn fixture(chain: MockChain) -> Fixture {
    let chain = Arc::new(chain);
    let store = Arc::new(MemoryStore::default());
    let state = Arc::new(StateEngine::new(store.clone(), store.clone(), "test"));
    let risk = Arc::new(RiskEngine::new(
        RiskParameters { execution_cooldown_ms: 0, ..Default::default() },
        Arc::clone(&state),
    ));
    let engine = ExecutionEngine::new(
        chain.clone(),
        Arc::clone(&state),
        risk,
        store.clone(),
        Arc::new(Keypair::new()),
    );

    state
        .add_position(PositionState {
            id: "p1".into(),
            wallet_id: "w1".into(),
            tracked_token_id: "t1".into(),
            mint_address: Pubkey::new_unique().to_string(),
            entry_amount_sol: 0.1,
            token_balance: 1_000_000,
            entry_price: None,
            status: PositionStatus::Open,
            opened_at: aegis_core::now_ms(),
            closed_at: None,
        })
        .await
        .unwrap();

    Fixture { chain, state, store, engine }
}

fn request(pct: f64) -> ExecutionRequest {
    ExecutionRequest {
        position_id: "p1".into(),
        policy_id: "pol-1".into(),
        action: if pct >= 100.0 { ExecutionAction::FullExit } else { ExecutionAction::PartialSell },
        sell_percentage: pct,
        max_slippage_bps: 200,
        priority_fee_lamports: 10_000,
    }
}

#[tokio::test]
async fn simulation_failure_is_terminal_and_leaves_the_position_alone() {
    let mut chain = MockChain::healthy();
    chain.simulation_error = Some("InstructionError(2, Custom(6002))".into());
    let f = fixture(chain).await;

    let result = f.engine.execute(request(50.0)).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.error_message.as_ref().unwrap().starts_with("Simulation failed:"));
    assert!(result.simulation_logs.is_some());

    // no send was attempted and the balance is untouched
    assert_eq!(f.chain.send_calls.load(Ordering::SeqCst), 0);
    assert_eq!(f.state.get_position("p1").unwrap().token_balance, 1_000_000);

    // the failed row was persisted
    let rows = f.store.executions.lock().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, ExecutionStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn transient_send_errors_retry_then_confirm() {
    let chain = MockChain::healthy().script_sends(&[
        Some("connection reset by peer"),
        Some("blockhash not found"),
        None,
    ]);
    let f = fixture(chain).await;

    let result = f.engine.execute(request(100.0)).await;

    assert_eq!(result.status, ExecutionStatus::Confirmed);
    assert_eq!(result.tx_signature.as_deref(), Some(f.chain.signature.to_string().as_str()));
    assert_eq!(f.chain.send_calls.load(Ordering::SeqCst), 3);

    // full exit closed the position
    let p = f.state.get_position("p1").unwrap();
    assert_eq!(p.status, PositionStatus::Closed);
    assert_eq!(p.token_balance, 0);
    assert!(p.closed_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn send_exhaustion_fails_without_touching_the_position() {
    let chain = MockChain::healthy().script_sends(&[
        Some("timeout"),
        Some("timeout"),
        Some("timeout"),
    ]);
    let f = fixture(chain).await;

    let result = f.engine.execute(request(100.0)).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.error_message.as_ref().unwrap().starts_with("send failed after 3 attempts"));
    assert_eq!(f.chain.send_calls.load(Ordering::SeqCst), 3);
    assert_eq!(f.state.get_position("p1").unwrap().token_balance, 1_000_000);
}

#[tokio::test]
async fn risk_rejection_is_persisted_and_never_reaches_the_chain() {
    let f = fixture(MockChain::healthy()).await;

    let mut req = request(50.0);
    req.max_slippage_bps = 9_999; // over the default cap
    let result = f.engine.execute(req).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.error_message.as_ref().unwrap().starts_with("risk rejected:"));
    assert_eq!(f.chain.send_calls.load(Ordering::SeqCst), 0);
    assert_eq!(f.store.executions.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_position_fails_cleanly() {
    let f = fixture(MockChain::healthy()).await;

    let mut req = request(50.0);
    req.position_id = "ghost".into();
    let result = f.engine.execute(req).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.error_message.as_ref().unwrap().starts_with("position not found"));
}

#[tokio::test]
async fn partial_sell_reduces_balance_and_stays_open() {
    let f = fixture(MockChain::healthy()).await;

    let result = f.engine.execute(request(40.0)).await;

    assert_eq!(result.status, ExecutionStatus::Confirmed);
    assert_eq!(result.amount_in, Some(400_000));
    let p = f.state.get_position("p1").unwrap();
    assert_eq!(p.status, PositionStatus::Open);
    assert_eq!(p.token_balance, 600_000);
}

#[tokio::test]
async fn entry_opens_a_position_with_the_quoted_tokens() {
    let f = fixture(MockChain::healthy()).await;

    let mint = Pubkey::new_unique().to_string();
    let position =
        f.engine.execute_entry(&mint, 1_000_000_000, 300, 5_000, "w1", "t1").await.unwrap();

    assert_eq!(position.status, PositionStatus::Open);
    assert!(position.token_balance > 0);
    assert_eq!(position.mint_address, mint);
    assert!(f.state.get_position(&position.id).is_some());
}

#[tokio::test]
async fn entry_refuses_a_completed_curve() {
    let mut chain = MockChain::healthy();
    chain.curve.complete = true;
    let f = fixture(chain).await;

    let err = f
        .engine
        .execute_entry(&Pubkey::new_unique().to_string(), 1_000_000_000, 300, 0, "w1", "t1")
        .await;
    assert!(err.is_err());
}
