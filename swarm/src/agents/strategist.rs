//! Strategist: portfolio-aware sizing. Filters analyses, consults the
//! reasoning service with the current win rate and open exposure, and turns
//! survivors into execution plans. Outcome feedback from memory tunes it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentRole};
use crate::mailbox::{
    drain, AgentMessage, ExecutionPlan, RiskProfile, TokenAnalysis, Urgency, CH_EXECUTION_PLAN,
    CH_OUTCOME, CH_TOKEN_ANALYSIS,
};
use crate::SwarmContext;

const MIN_CONVICTION: f64 = 30.0;
const OUTCOME_WINDOW: usize = 20;
const LOSING_STREAK: usize = 3;

const SYSTEM: &str = "You size positions for an automated launchpad trading node. \
Respond ONLY with a JSON object: {\"action\": \"enter\"|\"skip\", \
\"base_amount_sol\": number, \"max_slippage_bps\": integer, \"reasoning\": string}.";

pub struct Strategist {
    ctx: Arc<SwarmContext>,
    analyses: Mutex<UnboundedReceiver<AgentMessage>>,
    outcomes_rx: Mutex<UnboundedReceiver<AgentMessage>>,
    queue: Mutex<VecDeque<TokenAnalysis>>,
    /// Rolling window of the last N outcome correctness flags.
    outcomes: Mutex<VecDeque<bool>>,
}

impl Strategist {
    pub fn new(ctx: Arc<SwarmContext>) -> Self {
        let analyses = ctx.mailbox.register(AgentRole::Strategist, CH_TOKEN_ANALYSIS);
        let outcomes_rx = ctx.mailbox.register(AgentRole::Strategist, CH_OUTCOME);
        Self {
            ctx,
            analyses: Mutex::new(analyses),
            outcomes_rx: Mutex::new(outcomes_rx),
            queue: Mutex::new(VecDeque::new()),
            outcomes: Mutex::new(VecDeque::with_capacity(OUTCOME_WINDOW)),
        }
    }

    async fn portfolio_view(&self) -> (usize, f64, bool) {
        let open_count = self.ctx.state.get_open_positions().len();
        let outcomes = self.outcomes.lock().await;
        let win_rate = if outcomes.is_empty() {
            0.5
        } else {
            outcomes.iter().filter(|w| **w).count() as f64 / outcomes.len() as f64
        };
        let on_losing_streak = outcomes.len() >= LOSING_STREAK
            && outcomes.iter().rev().take(LOSING_STREAK).all(|w| !*w);
        (open_count, win_rate, on_losing_streak)
    }

    async fn consider(&self, analysis: TokenAnalysis) -> Result<()> {
        if analysis.risk_profile == RiskProfile::Extreme {
            debug!(mint = %analysis.mint, "extreme risk; skipped");
            return Ok(());
        }
        if analysis.conviction_score < MIN_CONVICTION {
            debug!(mint = %analysis.mint, conviction = analysis.conviction_score, "conviction too low");
            return Ok(());
        }
        if !self.ctx.state.get_positions_by_mint(&analysis.mint).is_empty() {
            debug!(mint = %analysis.mint, "already holding; skipped");
            return Ok(());
        }

        let (open_count, win_rate, on_losing_streak) = self.portfolio_view().await;
        let max_size_sol = self.ctx.params.max_position_size_lamports as f64 / 1e9;
        let prompt = json!({
            "analysis": {
                "mint": analysis.mint,
                "conviction_score": analysis.conviction_score,
                "risk_profile": analysis.risk_profile,
                "recommended_size_sol": analysis.recommended_size_lamports as f64 / 1e9,
                "cluster_size": analysis.cluster_size,
                "reasoning": analysis.reasoning,
            },
            "portfolio": {
                "open_positions": open_count,
                "win_rate": win_rate,
                "on_losing_streak": on_losing_streak,
                "max_position_size_sol": max_size_sol,
            },
        })
        .to_string();

        let verdict = match self.ctx.reasoner.complete_json(SYSTEM, &prompt).await {
            Ok(v) => v,
            Err(e) => {
                warn!(mint = %analysis.mint, "sizing reasoning failed; dropping: {e:#}");
                return Ok(());
            }
        };

        if verdict["action"].as_str() != Some("enter") {
            debug!(mint = %analysis.mint, "strategist skipped entry");
            return Ok(());
        }

        let mut lamports = ((verdict["base_amount_sol"].as_f64().unwrap_or(0.0)) * 1e9) as u64;
        lamports = lamports.min(self.ctx.params.max_position_size_lamports);
        if on_losing_streak {
            lamports /= 2;
        }
        if lamports == 0 {
            return Ok(());
        }

        let slippage = verdict["max_slippage_bps"]
            .as_u64()
            .map(|b| b as u16)
            .unwrap_or(self.ctx.params.max_slippage_bps)
            .min(self.ctx.params.max_slippage_bps);

        let plan = ExecutionPlan {
            id: uuid::Uuid::new_v4().to_string(),
            mint: analysis.mint.clone(),
            base_amount_lamports: lamports,
            max_slippage_bps: slippage,
            priority_fee_lamports: self.ctx.params.max_priority_fee_lamports,
            urgency: Urgency::Medium,
            reasoning: verdict["reasoning"].as_str().unwrap_or_default().to_string(),
        };
        info!(mint = %analysis.mint, lamports, "execution plan issued");
        self.ctx.mailbox.send(
            AgentRole::Executor,
            CH_EXECUTION_PLAN,
            AgentMessage::ExecutionPlan(plan),
        );
        Ok(())
    }
}

#[async_trait]
impl Agent for Strategist {
    fn role(&self) -> AgentRole {
        AgentRole::Strategist
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_secs(2)
    }

    async fn tick(&self) -> Result<()> {
        {
            let mut rx = self.outcomes_rx.lock().await;
            let mut window = self.outcomes.lock().await;
            for message in drain(&mut rx) {
                if let AgentMessage::Outcome(feedback) = message {
                    if window.len() == OUTCOME_WINDOW {
                        window.pop_front();
                    }
                    window.push_back(feedback.was_correct);
                }
            }
        }

        {
            let mut rx = self.analyses.lock().await;
            let mut queue = self.queue.lock().await;
            for message in drain(&mut rx) {
                if let AgentMessage::TokenAnalysis(analysis) = message {
                    queue.push_back(analysis);
                }
            }
        }

        let next = self.queue.lock().await.pop_front();
        if let Some(analysis) = next {
            self.consider(analysis).await?;
        }
        Ok(())
    }
}
