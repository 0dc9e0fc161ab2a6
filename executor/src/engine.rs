//! The execution engine: one sell (or entry) from risk gate to confirmed
//! signature, with state and store reconciliation.

use std::sync::Arc;
use std::time::Duration;

use aegis_core::curve::{apply_slippage, buy_quote, sell_quote, Side};
use aegis_core::position::PositionUpdate;
use aegis_core::{
    telemetry, ExecutionAction, ExecutionRequest, ExecutionResult, ExecutionStatus, PositionState,
    PositionStatus,
};
use aegis_core::events::EventMeta;
use aegis_pipeline::ports::ExecutionStore;
use aegis_pipeline::{EventBus, RiskEngine, StateEngine};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::Transaction;
use std::str::FromStr;
use tracing::{error, info, warn};

use crate::builder;
use crate::chain::ChainClient;

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 1_000;

pub struct ExecutionEngine {
    chain: Arc<dyn ChainClient>,
    state: Arc<StateEngine>,
    risk: Arc<RiskEngine>,
    executions: Arc<dyn ExecutionStore>,
    signer: Arc<Keypair>,
    bus: Option<Arc<EventBus>>,
}

impl ExecutionEngine {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        state: Arc<StateEngine>,
        risk: Arc<RiskEngine>,
        executions: Arc<dyn ExecutionStore>,
        signer: Arc<Keypair>,
    ) -> Self {
        Self { chain, state, risk, executions, signer, bus: None }
    }

    /// Publish PositionOpened / PositionClosed onto the event bus.
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    fn publish_lifecycle(&self, mint: &str, position_id: &str, closed: bool) {
        let Some(bus) = &self.bus else { return };
        let meta = EventMeta {
            id: uuid::Uuid::new_v4().to_string(),
            slot: 0,
            timestamp_ms: aegis_core::now_ms(),
            signature: String::new(),
        };
        let event = if closed {
            aegis_core::InternalEvent::PositionClosed {
                meta,
                mint_address: mint.to_string(),
                position_id: position_id.to_string(),
            }
        } else {
            aegis_core::InternalEvent::PositionOpened {
                meta,
                mint_address: mint.to_string(),
                position_id: position_id.to_string(),
            }
        };
        bus.publish(event);
    }

    /// Run one sell request to a terminal state. The result row is always
    /// persisted, whatever happened.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let started = std::time::Instant::now();
        let id = uuid::Uuid::new_v4().to_string();

        let result = match self.run(&id, &request).await {
            Ok(result) => result,
            Err(e) => {
                error!(position = %request.position_id, "execution error: {e:#}");
                self.risk.reset_cooldown(&request.position_id);
                ExecutionResult::failed(&request, id, format!("execution error: {e:#}"))
            }
        };

        telemetry::EXECUTIONS_TOTAL.with_label_values(&[result.status.as_str()]).inc();
        telemetry::EXECUTION_LATENCY_MS.observe(started.elapsed().as_millis() as f64);
        if let Err(e) = self.executions.insert_execution(&result).await {
            error!("failed to persist execution {}: {e:#}", result.id);
        }
        result
    }

    async fn run(&self, id: &str, request: &ExecutionRequest) -> Result<ExecutionResult> {
        if request.action == ExecutionAction::Halt {
            // halts are settled by the orchestrator; acknowledge and move on
            return Ok(ExecutionResult {
                id: id.to_string(),
                position_id: request.position_id.clone(),
                policy_id: request.policy_id.clone(),
                status: ExecutionStatus::Confirmed,
                tx_signature: None,
                amount_in: None,
                amount_out: None,
                error_message: Some("halt acknowledged".into()),
                simulation_logs: None,
                completed_at: aegis_core::now_ms(),
            });
        }

        // 1. risk gate
        let check = self.risk.evaluate(request);
        if !check.approved {
            return Ok(ExecutionResult::failed(
                request,
                id.to_string(),
                format!("risk rejected: {}", check.message()),
            ));
        }

        // 2. position lookup
        let Some(position) = self.state.get_position(&request.position_id) else {
            self.risk.reset_cooldown(&request.position_id);
            return Ok(ExecutionResult::failed(
                request,
                id.to_string(),
                format!("position not found: {}", request.position_id),
            ));
        };

        // 3. sell size
        let pct = request.sell_percentage.floor() as u64;
        let sell_amount = ((position.token_balance as u128 * pct as u128) / 100) as u64;
        if sell_amount == 0 {
            self.risk.reset_cooldown(&request.position_id);
            return Ok(ExecutionResult::failed(
                request,
                id.to_string(),
                "nothing to sell: computed sell amount is zero".into(),
            ));
        }

        // 4. quote against the live curve
        let mint = Pubkey::from_str(&position.mint_address).context("parsing mint")?;
        let curve = self.chain.get_bonding_curve(&mint).await?;
        let quote = sell_quote(
            curve.virtual_sol_reserves,
            curve.virtual_token_reserves,
            curve.real_sol_reserves,
            sell_amount,
        );
        let min_sol_output = apply_slippage(quote.amount_out, request.max_slippage_bps, Side::Sell);

        // 5. instruction list
        let instructions =
            self.sell_instructions(&mint, &curve, sell_amount, min_sol_output, request.priority_fee_lamports);

        // 6. simulate before spending anything
        let (blockhash, _) = self.chain.latest_blockhash().await?;
        let tx = Transaction::new_signed_with_payer(
            &instructions,
            Some(&self.signer.pubkey()),
            &[self.signer.as_ref()],
            blockhash,
        );
        let sim = self.chain.simulate(&tx).await?;
        if let Some(sim_err) = sim.err {
            self.risk.reset_cooldown(&request.position_id);
            let mut failed = ExecutionResult::failed(
                request,
                id.to_string(),
                format!("Simulation failed: {sim_err}"),
            );
            failed.simulation_logs = Some(sim.logs);
            return Ok(failed);
        }

        // 7. send with retries
        let signature = match self.send_with_retry(&instructions).await {
            Ok(sig) => sig,
            Err(e) => {
                self.risk.reset_cooldown(&request.position_id);
                return Ok(ExecutionResult::failed(
                    request,
                    id.to_string(),
                    format!("send failed after {MAX_RETRIES} attempts: {e:#}"),
                ));
            }
        };

        // 8. reconcile position and persist
        let remaining = position.token_balance - sell_amount;
        let update = if remaining == 0 {
            PositionUpdate {
                token_balance: Some(0),
                status: Some(PositionStatus::Closed),
                closed_at: Some(aegis_core::now_ms()),
                ..Default::default()
            }
        } else {
            PositionUpdate { token_balance: Some(remaining), ..Default::default() }
        };
        self.state.update_position(&request.position_id, update).await?;
        if remaining == 0 {
            self.publish_lifecycle(&position.mint_address, &request.position_id, true);
        }

        info!(
            position = %request.position_id,
            %signature,
            sold = sell_amount,
            received = quote.amount_out,
            remaining,
            "sell confirmed"
        );

        Ok(ExecutionResult {
            id: id.to_string(),
            position_id: request.position_id.clone(),
            policy_id: request.policy_id.clone(),
            status: ExecutionStatus::Confirmed,
            tx_signature: Some(signature),
            amount_in: Some(sell_amount),
            amount_out: Some(quote.amount_out),
            error_message: None,
            simulation_logs: None,
            completed_at: aegis_core::now_ms(),
        })
    }

    fn sell_instructions(
        &self,
        mint: &Pubkey,
        curve: &aegis_core::BondingCurveState,
        token_amount: u64,
        min_sol_output: u64,
        priority_fee: u64,
    ) -> Vec<Instruction> {
        let mut instructions = Vec::with_capacity(3);
        if priority_fee > 0 {
            instructions.push(builder::priority_fee(priority_fee));
        }
        instructions.push(builder::compute_unit_limit(builder::COMPUTE_UNIT_LIMIT));
        instructions.push(builder::sell(
            &self.signer.pubkey(),
            mint,
            curve,
            token_amount,
            min_sol_output,
        ));
        instructions
    }

    /// Refresh blockhash and re-sign on every attempt; backoff doubles from
    /// one second. Preflight stays on, RPC-side retries stay off.
    async fn send_with_retry(&self, instructions: &[Instruction]) -> Result<String> {
        let mut last_err = anyhow!("no send attempted");
        for attempt in 0..MAX_RETRIES {
            let outcome: Result<String> = async {
                let (blockhash, last_valid) = self.chain.latest_blockhash().await?;
                let tx = Transaction::new_signed_with_payer(
                    instructions,
                    Some(&self.signer.pubkey()),
                    &[self.signer.as_ref()],
                    blockhash,
                );
                let signature = self.chain.send_raw(&tx, false, 0).await?;
                self.chain.confirm(&signature, last_valid).await?;
                Ok(signature.to_string())
            }
            .await;

            match outcome {
                Ok(signature) => return Ok(signature),
                Err(e) => {
                    last_err = e;
                    if attempt + 1 < MAX_RETRIES {
                        let delay = RETRY_BASE_DELAY_MS * 2u64.pow(attempt);
                        warn!(attempt = attempt + 1, delay_ms = delay, "send failed, retrying: {last_err:#}");
                        telemetry::EXECUTION_RETRIES.inc();
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }
            }
        }
        Err(last_err)
    }

    /// Entry path shared by the HTTP boundary and the executor agent: buy off
    /// the curve and open a position on confirmation.
    pub async fn execute_entry(
        &self,
        mint_address: &str,
        lamports_in: u64,
        max_slippage_bps: u16,
        priority_fee: u64,
        wallet_id: &str,
        tracked_token_id: &str,
    ) -> Result<PositionState> {
        let mint = Pubkey::from_str(mint_address).context("parsing mint")?;
        let curve = self.chain.get_bonding_curve(&mint).await?;
        if curve.complete {
            bail!("bonding curve for {mint_address} is complete; no entry");
        }

        let quote = buy_quote(
            curve.virtual_sol_reserves,
            curve.virtual_token_reserves,
            curve.real_token_reserves,
            lamports_in,
        );
        if quote.amount_out == 0 {
            bail!("buy quote for {lamports_in} lamports is zero tokens");
        }
        let max_sol_cost = apply_slippage(lamports_in, max_slippage_bps, Side::Buy);

        let buyer = self.signer.pubkey();
        let mut instructions = Vec::with_capacity(4);
        if priority_fee > 0 {
            instructions.push(builder::priority_fee(priority_fee));
        }
        instructions.push(builder::compute_unit_limit(builder::COMPUTE_UNIT_LIMIT));
        let ata = builder::user_token_account(&buyer, &mint);
        if !self.chain.account_exists(&ata).await.unwrap_or(false) {
            instructions.push(builder::create_token_account_idempotent(&buyer, &buyer, &mint));
        }
        instructions.push(builder::buy(&buyer, &mint, &curve, quote.amount_out, max_sol_cost));

        let (blockhash, last_valid) = self.chain.latest_blockhash().await?;
        let tx = Transaction::new_signed_with_payer(
            &instructions,
            Some(&buyer),
            &[self.signer.as_ref()],
            blockhash,
        );
        let sim = self.chain.simulate(&tx).await?;
        if let Some(sim_err) = sim.err {
            bail!("entry simulation failed: {sim_err}");
        }

        let signature = self.chain.send_raw(&tx, true, 3).await?;
        self.chain.confirm(&signature, last_valid).await?;

        let position = PositionState {
            id: uuid::Uuid::new_v4().to_string(),
            wallet_id: wallet_id.to_string(),
            tracked_token_id: tracked_token_id.to_string(),
            mint_address: mint_address.to_string(),
            entry_amount_sol: lamports_in as f64 / 1e9,
            token_balance: quote.amount_out,
            entry_price: Some(lamports_in as f64 / quote.amount_out as f64),
            status: PositionStatus::Open,
            opened_at: aegis_core::now_ms(),
            closed_at: None,
        };
        self.state.add_position(position.clone()).await?;
        self.publish_lifecycle(mint_address, &position.id, false);
        info!(mint = mint_address, %signature, tokens = quote.amount_out, "entry confirmed, position opened");
        Ok(position)
    }
}

#[async_trait]
impl aegis_pipeline::ExecutionSink for ExecutionEngine {
    async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        ExecutionEngine::execute(self, request).await
    }
}
