//! Scout: first eyes on new launches. Reads recent launchpad signatures,
//! identifies the mint and deployer, seeds the wallet graph and reputation
//! store, and hands promising launches to the analyst.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aegis_core::launchpad;
use aegis_executor::LaunchTransaction;
use anyhow::Result;
use async_trait::async_trait;
use lru::LruCache;
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use tracing::{debug, info};

use crate::agent::{Agent, AgentRole};
use crate::intel::graph::EdgeType;
use crate::mailbox::{AgentMessage, LaunchSighting, CH_NEW_LAUNCH};
use crate::SwarmContext;

const SIGNATURE_BATCH: usize = 25;
const SEEN_CACHE: usize = 5_000;
/// Deployers scoring below this are watched but not traded.
const MIN_FORWARD_SCORE: f64 = 20.0;
const WRAPPED_SOL: &str = "So11111111111111111111111111111111111111112";

pub struct Scout {
    ctx: Arc<SwarmContext>,
    seen_signatures: Mutex<LruCache<String, ()>>,
    seen_mints: Mutex<LruCache<String, ()>>,
}

impl Scout {
    pub fn new(ctx: Arc<SwarmContext>) -> Self {
        let cap = NonZeroUsize::new(SEEN_CACHE).unwrap();
        Self {
            ctx,
            seen_signatures: Mutex::new(LruCache::new(cap)),
            seen_mints: Mutex::new(LruCache::new(cap)),
        }
    }

    async fn inspect(&self, signature: &str) -> Result<()> {
        let Some(tx) = self.ctx.chain.get_launch_transaction(signature).await? else {
            return Ok(());
        };
        let Some(mint) = extract_launched_mint(&tx) else {
            return Ok(());
        };

        {
            let mut seen = self.seen_mints.lock().unwrap();
            if seen.contains(&mint) {
                return Ok(());
            }
            seen.put(mint.clone(), ());
        }

        let deployer = tx.fee_payer.clone();
        if deployer.is_empty() {
            return Ok(());
        }

        // only a real launch has a curve account behind the mint
        let mint_key = Pubkey::from_str(&mint)?;
        let curve_address = launchpad::bonding_curve_address(&mint_key);
        if !self.ctx.chain.account_exists(&curve_address).await? {
            debug!(mint, "no bonding curve account; skipping");
            return Ok(());
        }

        self.ctx.graph.add_edge(&deployer, &mint, EdgeType::DeployedFrom).await?;
        let profile = self.ctx.deployers.record_launch(&deployer, &mint, &[]).await?;

        let sighting = LaunchSighting {
            signature: signature.to_string(),
            slot: tx.slot,
            mint: mint.clone(),
            deployer: deployer.clone(),
            bonding_curve: curve_address.to_string(),
            seen_at_ms: aegis_core::now_ms(),
        };

        self.ctx
            .signals
            .publish(
                "launches",
                "new_launch",
                json!({
                    "mint": mint,
                    "deployer": deployer,
                    "slot": tx.slot,
                    "deployer_score": profile.score,
                }),
            )
            .await
            .ok();

        info!(mint, deployer, score = profile.score, "new launch sighted");
        if profile.score >= MIN_FORWARD_SCORE {
            self.ctx.mailbox.send(
                AgentRole::Analyst,
                CH_NEW_LAUNCH,
                AgentMessage::NewLaunch { sighting, profile },
            );
        }
        Ok(())
    }
}

/// The launched token is the non-SOL mint in the post balances.
fn extract_launched_mint(tx: &LaunchTransaction) -> Option<String> {
    tx.post_token_balances
        .iter()
        .map(|(mint, _, _)| mint)
        .find(|mint| mint.as_str() != WRAPPED_SOL)
        .cloned()
}

#[async_trait]
impl Agent for Scout {
    fn role(&self) -> AgentRole {
        AgentRole::Scout
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_secs(3)
    }

    async fn tick(&self) -> Result<()> {
        let program = launchpad::program_id();
        let signatures =
            self.ctx.chain.recent_program_signatures(&program, SIGNATURE_BATCH).await?;

        for signature in signatures {
            {
                let mut seen = self.seen_signatures.lock().unwrap();
                if seen.contains(&signature) {
                    continue;
                }
                seen.put(signature.clone(), ());
            }
            if let Err(e) = self.inspect(&signature).await {
                debug!(signature, "launch inspection failed: {e:#}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launched_mint_skips_wrapped_sol() {
        let tx = LaunchTransaction {
            signature: "sig".into(),
            slot: 1,
            fee_payer: "Dep".into(),
            account_keys: vec!["Dep".into()],
            post_token_balances: vec![
                (WRAPPED_SOL.into(), "Dep".into(), 0),
                ("NewMint".into(), "CurvePda".into(), 800_000_000_000),
            ],
        };
        assert_eq!(extract_launched_mint(&tx).as_deref(), Some("NewMint"));
    }

    #[test]
    fn no_token_balances_means_no_launch() {
        let tx = LaunchTransaction {
            signature: "sig".into(),
            slot: 1,
            fee_payer: "Dep".into(),
            account_keys: vec![],
            post_token_balances: vec![],
        };
        assert!(extract_launched_mint(&tx).is_none());
    }
}
