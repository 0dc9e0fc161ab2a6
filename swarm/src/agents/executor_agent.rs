//! Executor agent: the only swarm member that touches the chain. Entries
//! come from the strategist, exits from the sentinel; critical exits jump
//! the queue. One item per tick, everything reported to memory.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use aegis_core::{ExecutionAction, ExecutionRequest, ExecutionStatus};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentRole};
use crate::mailbox::{
    drain, AgentMessage, ExecutionPlan, ExecutionReport, ExitAction, ThreatExit, TradeKind,
    Urgency, CH_EXECUTION_PLAN, CH_EXECUTION_RESULT, CH_THREAT_EXIT,
};
use crate::{SwarmContext, SWARM_TRACKED_TOKEN};

#[derive(Debug, Clone)]
pub enum WorkItem {
    Enter(ExecutionPlan),
    Exit(ThreatExit),
}

impl WorkItem {
    pub fn urgency(&self) -> Urgency {
        match self {
            Self::Enter(plan) => plan.urgency,
            Self::Exit(threat) => threat.urgency,
        }
    }
}

/// FIFO with one exception: critical work goes to the head.
#[derive(Default)]
pub struct WorkQueue {
    items: VecDeque<WorkItem>,
}

impl WorkQueue {
    pub fn push(&mut self, item: WorkItem) {
        if item.urgency() == Urgency::Critical {
            self.items.push_front(item);
        } else {
            self.items.push_back(item);
        }
    }

    pub fn pop(&mut self) -> Option<WorkItem> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

pub struct ExecutorAgent {
    ctx: Arc<SwarmContext>,
    plans: Mutex<UnboundedReceiver<AgentMessage>>,
    threats: Mutex<UnboundedReceiver<AgentMessage>>,
    queue: Mutex<WorkQueue>,
}

impl ExecutorAgent {
    pub fn new(ctx: Arc<SwarmContext>) -> Self {
        let plans = ctx.mailbox.register(AgentRole::Executor, CH_EXECUTION_PLAN);
        let threats = ctx.mailbox.register(AgentRole::Executor, CH_THREAT_EXIT);
        Self {
            ctx,
            plans: Mutex::new(plans),
            threats: Mutex::new(threats),
            queue: Mutex::new(WorkQueue::default()),
        }
    }

    fn report(&self, report: ExecutionReport) {
        self.ctx.mailbox.send(
            AgentRole::Memory,
            CH_EXECUTION_RESULT,
            AgentMessage::ExecutionReport(report),
        );
    }

    async fn enter(&self, plan: ExecutionPlan) {
        if !self.ctx.state.get_positions_by_mint(&plan.mint).is_empty() {
            debug!(mint = %plan.mint, "already holding; entry plan dropped");
            return;
        }

        let outcome = self
            .ctx
            .execution
            .execute_entry(
                &plan.mint,
                plan.base_amount_lamports,
                plan.max_slippage_bps,
                plan.priority_fee_lamports,
                &self.ctx.wallet_id,
                SWARM_TRACKED_TOKEN,
            )
            .await;

        match outcome {
            Ok(position) => {
                info!(mint = %plan.mint, position = %position.id, "swarm entry filled");
                self.report(ExecutionReport {
                    mint: plan.mint,
                    position_id: Some(position.id),
                    kind: TradeKind::Entry,
                    success: true,
                    tx_signature: None,
                    lamports_in: Some(plan.base_amount_lamports),
                    lamports_out: None,
                    token_amount: Some(position.token_balance),
                    error: None,
                    timestamp_ms: aegis_core::now_ms(),
                });
            }
            Err(e) => {
                warn!(mint = %plan.mint, "swarm entry failed: {e:#}");
                self.report(ExecutionReport {
                    mint: plan.mint,
                    position_id: None,
                    kind: TradeKind::Entry,
                    success: false,
                    tx_signature: None,
                    lamports_in: Some(plan.base_amount_lamports),
                    lamports_out: None,
                    token_amount: None,
                    error: Some(format!("{e:#}")),
                    timestamp_ms: aegis_core::now_ms(),
                });
            }
        }
    }

    async fn exit(&self, threat: ThreatExit) {
        let Some(position) = self.ctx.state.get_position(&threat.position_id) else {
            debug!(position = %threat.position_id, "threat exit for unknown position");
            return;
        };
        if !position.is_open() {
            debug!(position = %threat.position_id, "threat exit for non-open position");
            return;
        }

        let (action, pct) = match threat.action {
            ExitAction::FullExit => (ExecutionAction::FullExit, 100.0),
            ExitAction::PartialExit => (ExecutionAction::PartialSell, threat.sell_percentage),
            ExitAction::Hold => return,
        };

        let request = ExecutionRequest {
            position_id: threat.position_id.clone(),
            policy_id: "sentinel-threat".into(),
            action,
            sell_percentage: pct,
            max_slippage_bps: self.ctx.params.max_slippage_bps,
            priority_fee_lamports: self.ctx.params.max_priority_fee_lamports,
        };
        let result = self.ctx.execution.execute(request).await;

        self.report(ExecutionReport {
            mint: threat.mint,
            position_id: Some(threat.position_id),
            kind: TradeKind::Exit,
            success: result.status == ExecutionStatus::Confirmed,
            tx_signature: result.tx_signature.clone(),
            lamports_in: result.amount_in,
            lamports_out: result.amount_out,
            token_amount: result.amount_in,
            error: result.error_message.clone(),
            timestamp_ms: aegis_core::now_ms(),
        });
    }
}

#[async_trait]
impl Agent for ExecutorAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Executor
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn tick(&self) -> Result<()> {
        {
            let mut queue = self.queue.lock().await;
            let mut threats = self.threats.lock().await;
            for message in drain(&mut threats) {
                if let AgentMessage::ThreatExit(threat) = message {
                    queue.push(WorkItem::Exit(threat));
                }
            }
            let mut plans = self.plans.lock().await;
            for message in drain(&mut plans) {
                if let AgentMessage::ExecutionPlan(plan) = message {
                    queue.push(WorkItem::Enter(plan));
                }
            }
        }

        // strictly one item per tick
        let next = self.queue.lock().await.pop();
        match next {
            Some(WorkItem::Enter(plan)) => self.enter(plan).await,
            Some(WorkItem::Exit(threat)) => self.exit(threat).await,
            None => {}
        }
        Ok(())
    }
}
