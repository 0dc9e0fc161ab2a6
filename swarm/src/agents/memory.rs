//! Memory: closes the learning loop. Pairs entry and exit reports into
//! decision outcomes, feeds correctness back to the strategist, and persists
//! a rolling window of outcomes plus aggregate stats.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::agent::{Agent, AgentRole};
use crate::mailbox::{
    drain, AgentMessage, ExecutionReport, OutcomeFeedback, TradeKind, CH_EXECUTION_RESULT,
    CH_OUTCOME,
};
use crate::SwarmContext;

const OUTCOME_RETENTION: isize = 500;
const PERSIST_EVERY_TICKS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub id: String,
    pub mint: String,
    pub position_id: Option<String>,
    pub entry_lamports: u64,
    pub exit_lamports: u64,
    pub pnl_percent: f64,
    pub hold_duration_ms: i64,
    pub was_correct: bool,
    pub closed_at_ms: i64,
}

pub struct MemoryAgent {
    ctx: Arc<SwarmContext>,
    reports: Mutex<UnboundedReceiver<AgentMessage>>,
    /// Entries awaiting their exit, keyed by mint.
    pending_entries: Mutex<HashMap<String, ExecutionReport>>,
    unpersisted: Mutex<Vec<DecisionOutcome>>,
    ticks: AtomicU64,
}

impl MemoryAgent {
    pub fn new(ctx: Arc<SwarmContext>) -> Self {
        let reports = ctx.mailbox.register(AgentRole::Memory, CH_EXECUTION_RESULT);
        Self {
            ctx,
            reports: Mutex::new(reports),
            pending_entries: Mutex::new(HashMap::new()),
            unpersisted: Mutex::new(Vec::new()),
            ticks: AtomicU64::new(0),
        }
    }

    /// Pair an exit report with its pending entry into a scored outcome.
    async fn settle(&self, exit: &ExecutionReport) -> Option<DecisionOutcome> {
        let entry = self.pending_entries.lock().await.remove(&exit.mint)?;

        // only settle once the position actually closed
        if let Some(position_id) = &exit.position_id {
            if let Some(position) = self.ctx.state.get_position(position_id) {
                if position.is_open() {
                    self.pending_entries.lock().await.insert(exit.mint.clone(), entry);
                    return None;
                }
            }
        }

        let entry_lamports = entry.lamports_in.unwrap_or(0);
        let exit_lamports = exit.lamports_out.unwrap_or(0);
        let pnl_percent = if entry_lamports == 0 {
            0.0
        } else {
            (exit_lamports as f64 - entry_lamports as f64) / entry_lamports as f64 * 100.0
        };

        Some(DecisionOutcome {
            id: uuid::Uuid::new_v4().to_string(),
            mint: exit.mint.clone(),
            position_id: exit.position_id.clone(),
            entry_lamports,
            exit_lamports,
            pnl_percent,
            hold_duration_ms: exit.timestamp_ms - entry.timestamp_ms,
            was_correct: pnl_percent > 0.0,
            closed_at_ms: exit.timestamp_ms,
        })
    }

    async fn persist(&self) -> Result<()> {
        let outcomes: Vec<DecisionOutcome> = self.unpersisted.lock().await.drain(..).collect();
        if outcomes.is_empty() {
            return Ok(());
        }

        let mut conn = self.ctx.redis.clone();
        let list_key = format!("{}:memory:outcomes", self.ctx.prefix);
        let stats_key = format!("{}:memory:stats", self.ctx.prefix);

        for outcome in &outcomes {
            let json = serde_json::to_string(outcome)?;
            let _: u64 = conn.lpush(&list_key, json).await.context("persisting outcome")?;
        }
        let _: () = conn.ltrim(&list_key, 0, OUTCOME_RETENTION - 1).await?;

        let wins = outcomes.iter().filter(|o| o.was_correct).count() as i64;
        let pnl_sum: f64 = outcomes.iter().map(|o| o.pnl_percent).sum();
        let _: i64 = conn.hincr(&stats_key, "total_outcomes", outcomes.len() as i64).await?;
        let _: i64 = conn.hincr(&stats_key, "wins", wins).await?;
        let _: f64 = redis::cmd("HINCRBYFLOAT")
            .arg(&stats_key)
            .arg("pnl_percent_sum")
            .arg(pnl_sum)
            .query_async(&mut conn)
            .await?;

        info!(count = outcomes.len(), "decision outcomes persisted");
        Ok(())
    }
}

#[async_trait]
impl Agent for MemoryAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Memory
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_secs(10)
    }

    async fn tick(&self) -> Result<()> {
        let messages = {
            let mut rx = self.reports.lock().await;
            drain(&mut rx)
        };

        for message in messages {
            let AgentMessage::ExecutionReport(report) = message else { continue };
            match report.kind {
                TradeKind::Entry if report.success => {
                    self.pending_entries.lock().await.insert(report.mint.clone(), report);
                }
                TradeKind::Entry => {
                    debug!(mint = %report.mint, "failed entry; nothing to learn yet");
                }
                TradeKind::Exit => {
                    if let Some(outcome) = self.settle(&report).await {
                        self.ctx.mailbox.send(
                            AgentRole::Strategist,
                            CH_OUTCOME,
                            AgentMessage::Outcome(OutcomeFeedback {
                                mint: outcome.mint.clone(),
                                pnl_percent: outcome.pnl_percent,
                                was_correct: outcome.was_correct,
                            }),
                        );
                        self.unpersisted.lock().await.push(outcome);
                    }
                }
            }
        }

        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        if tick % PERSIST_EVERY_TICKS == 0 {
            self.persist().await?;
        }
        Ok(())
    }

    async fn on_stop(&self) -> Result<()> {
        self.persist().await
    }
}
