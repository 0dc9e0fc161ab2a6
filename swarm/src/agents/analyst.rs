//! Analyst: turns a raw launch sighting into a structured thesis. Curve
//! state, deployer cluster and matching patterns go into one reasoning call
//! that either sizes a position or kills the idea.

use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentRole};
use crate::intel::DeployerProfile;
use crate::mailbox::{
    drain, AgentMessage, LaunchSighting, RiskProfile, TokenAnalysis, CH_NEW_LAUNCH,
    CH_TOKEN_ANALYSIS,
};
use crate::SwarmContext;

const PATTERN_LIMIT: usize = 5;
const CLUSTER_DEPTH: usize = 2;

const SYSTEM: &str = "You are the analysis desk of an automated launchpad trading node. \
Given a fresh token launch, respond ONLY with a JSON object: \
{\"conviction_score\": 0-100, \"risk_profile\": \"low\"|\"medium\"|\"high\"|\"extreme\", \
\"recommended_position_size_sol\": number, \"reasoning\": string}.";

pub struct Analyst {
    ctx: Arc<SwarmContext>,
    inbox: Mutex<UnboundedReceiver<AgentMessage>>,
    queue: Mutex<VecDeque<(LaunchSighting, DeployerProfile)>>,
}

impl Analyst {
    pub fn new(ctx: Arc<SwarmContext>) -> Self {
        let inbox = ctx.mailbox.register(AgentRole::Analyst, CH_NEW_LAUNCH);
        Self { ctx, inbox: Mutex::new(inbox), queue: Mutex::new(VecDeque::new()) }
    }

    async fn analyze(&self, sighting: LaunchSighting, profile: DeployerProfile) -> Result<()> {
        let mint = Pubkey::from_str(&sighting.mint)?;
        let curve = self.ctx.chain.get_bonding_curve(&mint).await?;
        if curve.complete {
            debug!(mint = %sighting.mint, "curve already complete; skipping analysis");
            return Ok(());
        }

        let cluster = self.ctx.graph.get_cluster(&sighting.deployer, CLUSTER_DEPTH);

        let mut pattern_context: HashMap<String, f64> = HashMap::new();
        pattern_context.insert("deployer_score".into(), profile.score);
        pattern_context.insert("deployer_rug_rate".into(), profile.rug_rate);
        pattern_context.insert("deployer_launches".into(), profile.total_launches as f64);
        pattern_context.insert("cluster_size".into(), cluster.len() as f64);
        pattern_context
            .insert("curve_sol_reserves".into(), curve.virtual_sol_reserves as f64 / 1e9);
        let patterns = self.ctx.patterns.find_matches(&pattern_context).await?;
        let top_patterns: Vec<serde_json::Value> = patterns
            .iter()
            .take(PATTERN_LIMIT)
            .map(|p| {
                json!({
                    "name": p.name,
                    "hit_rate": p.hit_rate(),
                    "samples": p.outcome_count,
                    "avg_return_percent": p.avg_return_percent,
                })
            })
            .collect();

        let prompt = json!({
            "mint": sighting.mint,
            "deployer": {
                "address": sighting.deployer,
                "score": profile.score,
                "total_launches": profile.total_launches,
                "rug_rate": profile.rug_rate,
            },
            "curve": {
                "virtual_sol": curve.virtual_sol_reserves as f64 / 1e9,
                "virtual_tokens": curve.virtual_token_reserves,
                "real_token_reserves": curve.real_token_reserves,
            },
            "cluster_size": cluster.len(),
            "matched_patterns": top_patterns,
        })
        .to_string();

        let verdict = match self.ctx.reasoner.complete_json(SYSTEM, &prompt).await {
            Ok(v) => v,
            Err(e) => {
                warn!(mint = %sighting.mint, "reasoning failed; dropping launch: {e:#}");
                return Ok(());
            }
        };

        let conviction = verdict["conviction_score"].as_f64().unwrap_or(0.0);
        let size_sol = verdict["recommended_position_size_sol"].as_f64().unwrap_or(0.0);
        let risk_profile = match verdict["risk_profile"].as_str().unwrap_or("extreme") {
            "low" => RiskProfile::Low,
            "medium" => RiskProfile::Medium,
            "high" => RiskProfile::High,
            _ => RiskProfile::Extreme,
        };

        if conviction <= 0.0 || size_sol <= 0.0 {
            debug!(mint = %sighting.mint, conviction, "analyst passed on launch");
            return Ok(());
        }

        let analysis = TokenAnalysis {
            mint: sighting.mint.clone(),
            deployer: sighting.deployer.clone(),
            conviction_score: conviction,
            risk_profile,
            recommended_size_lamports: (size_sol * 1e9) as u64,
            cluster_size: cluster.len(),
            pattern_matches: patterns.len(),
            reasoning: verdict["reasoning"].as_str().unwrap_or_default().to_string(),
        };
        info!(mint = %sighting.mint, conviction, ?risk_profile, "analysis forwarded");
        self.ctx.mailbox.send(
            AgentRole::Strategist,
            CH_TOKEN_ANALYSIS,
            AgentMessage::TokenAnalysis(analysis),
        );
        Ok(())
    }
}

#[async_trait]
impl Agent for Analyst {
    fn role(&self) -> AgentRole {
        AgentRole::Analyst
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_secs(2)
    }

    async fn tick(&self) -> Result<()> {
        {
            let mut inbox = self.inbox.lock().await;
            let mut queue = self.queue.lock().await;
            for message in drain(&mut inbox) {
                if let AgentMessage::NewLaunch { sighting, profile } = message {
                    queue.push_back((sighting, profile));
                }
            }
        }

        let next = self.queue.lock().await.pop_front();
        if let Some((sighting, profile)) = next {
            self.analyze(sighting, profile).await?;
        }
        Ok(())
    }
}
