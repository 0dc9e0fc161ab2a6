//! Sentinel: the defensive watchdog. Sweeps every open position for dev
//! dumps, curve completion, wallet webs and network-wide rug alerts.
//! Critical threats exit immediately; the rest go through one batched
//! reasoning call, failing safe toward exit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentRole};
use crate::mailbox::{AgentMessage, ExitAction, ThreatExit, Urgency, CH_THREAT_EXIT};
use crate::SwarmContext;

const POSITION_CHECK_INTERVAL_MS: i64 = 10_000;
const DEV_SELL_WINDOW_MS: i64 = 600_000;
const CLUSTER_ALARM: usize = 10;
const CLUSTER_DEPTH: usize = 2;

const SYSTEM: &str = "You are the defense desk of an automated launchpad trading node. \
Given observed threats against one position, respond ONLY with JSON: \
{\"is_threat\": bool, \"severity\": \"low\"|\"medium\"|\"high\"|\"critical\", \
\"action\": \"hold\"|\"partial_exit\"|\"full_exit\", \"sell_percentage\": number, \
\"reasoning\": string}.";

#[derive(Debug, Clone)]
struct Threat {
    kind: &'static str,
    severity: Urgency,
    detail: String,
}

pub struct Sentinel {
    ctx: Arc<SwarmContext>,
    last_check_ms: DashMap<String, i64>,
    /// Mints flagged by other nodes on the `rugs` channel.
    rug_alerts: Arc<DashMap<String, i64>>,
    subscribed: Mutex<bool>,
}

impl Sentinel {
    pub fn new(ctx: Arc<SwarmContext>) -> Self {
        Self {
            ctx,
            last_check_ms: DashMap::new(),
            rug_alerts: Arc::new(DashMap::new()),
            subscribed: Mutex::new(false),
        }
    }

    async fn gather_threats(&self, mint: &str) -> Result<Vec<Threat>> {
        let mut threats = Vec::new();

        let mint_key = Pubkey::from_str(mint)?;
        let curve = self.ctx.chain.get_bonding_curve(&mint_key).await?;
        let dev_wallet = curve.creator_pubkey().to_string();

        let dev_sell_pct =
            self.ctx.state.dev_sell_percentage_in_window(mint, &dev_wallet, DEV_SELL_WINDOW_MS);
        if dev_sell_pct > 30.0 {
            threats.push(Threat {
                kind: "dev_sell",
                severity: Urgency::Critical,
                detail: format!("dev sold {dev_sell_pct:.1}% in 10m"),
            });
        } else if dev_sell_pct > 15.0 {
            threats.push(Threat {
                kind: "dev_sell",
                severity: Urgency::High,
                detail: format!("dev sold {dev_sell_pct:.1}% in 10m"),
            });
        } else if dev_sell_pct > 5.0 {
            threats.push(Threat {
                kind: "dev_sell",
                severity: Urgency::Medium,
                detail: format!("dev sold {dev_sell_pct:.1}% in 10m"),
            });
        }

        if curve.complete {
            threats.push(Threat {
                kind: "curve_complete",
                severity: Urgency::High,
                detail: "bonding curve completed".into(),
            });
        }

        let cluster_size = self.ctx.graph.cluster_size(&dev_wallet, CLUSTER_DEPTH);
        if cluster_size > CLUSTER_ALARM {
            threats.push(Threat {
                kind: "wallet_cluster",
                severity: Urgency::Medium,
                detail: format!("dev wallet cluster of {cluster_size}"),
            });
        }

        if self.rug_alerts.contains_key(mint) {
            threats.push(Threat {
                kind: "network_rug",
                severity: Urgency::Critical,
                detail: "rug signal from another node".into(),
            });
        }

        Ok(threats)
    }

    fn emit_exit(&self, position_id: &str, mint: &str, urgency: Urgency, action: ExitAction, pct: f64, why: String) {
        self.ctx.mailbox.send(
            AgentRole::Executor,
            CH_THREAT_EXIT,
            AgentMessage::ThreatExit(ThreatExit {
                position_id: position_id.to_string(),
                mint: mint.to_string(),
                urgency,
                action,
                sell_percentage: pct,
                reasoning: why,
            }),
        );
    }

    async fn publish_threats(&self, mint: &str, threats: &[Threat]) {
        for threat in threats.iter().filter(|t| t.severity >= Urgency::High) {
            self.ctx
                .signals
                .publish(
                    "threats",
                    threat.kind,
                    json!({
                        "mint": mint,
                        "severity": threat.severity,
                        "detail": threat.detail,
                    }),
                )
                .await
                .ok();
        }
    }

    async fn assess_position(&self, position_id: &str, mint: &str) -> Result<()> {
        let threats = self.gather_threats(mint).await?;
        if threats.is_empty() {
            return Ok(());
        }
        self.publish_threats(mint, &threats).await;

        // critical threats never wait for reasoning
        if let Some(critical) = threats.iter().find(|t| t.severity == Urgency::Critical) {
            warn!(mint, kind = critical.kind, "critical threat; immediate full exit");
            self.emit_exit(
                position_id,
                mint,
                Urgency::Critical,
                ExitAction::FullExit,
                100.0,
                critical.detail.clone(),
            );
            return Ok(());
        }

        let prompt = json!({
            "mint": mint,
            "threats": threats
                .iter()
                .map(|t| json!({"kind": t.kind, "severity": t.severity, "detail": t.detail}))
                .collect::<Vec<_>>(),
        })
        .to_string();

        match self.ctx.reasoner.complete_json(SYSTEM, &prompt).await {
            Ok(verdict) => {
                if verdict["is_threat"].as_bool() != Some(true) {
                    return Ok(());
                }
                let action = match verdict["action"].as_str() {
                    Some("full_exit") => ExitAction::FullExit,
                    Some("partial_exit") => ExitAction::PartialExit,
                    _ => return Ok(()),
                };
                let pct = match action {
                    ExitAction::FullExit => 100.0,
                    _ => verdict["sell_percentage"].as_f64().unwrap_or(50.0).clamp(1.0, 100.0),
                };
                let urgency = match verdict["severity"].as_str() {
                    Some("critical") => Urgency::Critical,
                    Some("high") => Urgency::High,
                    Some("low") => Urgency::Low,
                    _ => Urgency::Medium,
                };
                info!(mint, ?action, pct, "reasoned threat exit");
                self.emit_exit(
                    position_id,
                    mint,
                    urgency,
                    action,
                    pct,
                    verdict["reasoning"].as_str().unwrap_or_default().to_string(),
                );
            }
            Err(e) => {
                // fail safe: with a high-severity threat on the table, exit
                if threats.iter().any(|t| t.severity >= Urgency::High) {
                    warn!(mint, "reasoning failed with high-severity threat; defensive exit: {e:#}");
                    self.emit_exit(
                        position_id,
                        mint,
                        Urgency::High,
                        ExitAction::FullExit,
                        100.0,
                        "reasoning unavailable, defensive exit".into(),
                    );
                } else {
                    debug!(mint, "reasoning failed on low-severity threats: {e:#}");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Agent for Sentinel {
    fn role(&self) -> AgentRole {
        AgentRole::Sentinel
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_secs(5)
    }

    async fn on_start(&self) -> Result<()> {
        let mut subscribed = self.subscribed.lock().await;
        if !*subscribed {
            let alerts = Arc::clone(&self.rug_alerts);
            self.ctx.signals.subscribe("rugs", move |signal| {
                let alerts = Arc::clone(&alerts);
                async move {
                    if let Some(mint) = signal.data["mint"].as_str() {
                        alerts.insert(mint.to_string(), aegis_core::now_ms());
                    }
                    Ok(())
                }
            });
            *subscribed = true;
        }
        Ok(())
    }

    async fn tick(&self) -> Result<()> {
        let now = aegis_core::now_ms();
        for position in self.ctx.state.get_open_positions() {
            // one sweep per position per 10 s
            if let Some(last) = self.last_check_ms.get(&position.id) {
                if now - *last < POSITION_CHECK_INTERVAL_MS {
                    continue;
                }
            }
            self.last_check_ms.insert(position.id.clone(), now);

            if let Err(e) = self.assess_position(&position.id, &position.mint_address).await {
                debug!(position = %position.id, "threat sweep failed: {e:#}");
            }
        }
        Ok(())
    }
}
