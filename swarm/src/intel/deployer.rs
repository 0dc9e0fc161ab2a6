//! Deployer reputation: profiles scored 0-100, persisted with a 24 h expiry
//! and indexed by score.

use anyhow::{Context, Result};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;

const PROFILE_TTL_SECONDS: u64 = 86_400;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployerProfile {
    pub address: String,
    pub total_launches: u64,
    pub rug_count: u64,
    pub rug_rate: f64,
    pub avg_token_lifespan_ms: f64,
    pub connected_wallets: Vec<String>,
    pub last_seen_ms: i64,
    pub score: f64,
}

impl DeployerProfile {
    fn fresh(address: &str) -> Self {
        Self {
            address: address.to_string(),
            total_launches: 0,
            rug_count: 0,
            rug_rate: 0.0,
            avg_token_lifespan_ms: 0.0,
            connected_wallets: Vec::new(),
            last_seen_ms: aegis_core::now_ms(),
            score: 50.0,
        }
    }
}

pub struct DeployerScoreEngine {
    conn: MultiplexedConnection,
    prefix: String,
}

impl DeployerScoreEngine {
    pub fn new(conn: MultiplexedConnection, prefix: &str) -> Self {
        Self { conn, prefix: prefix.to_string() }
    }

    fn profile_key(&self, address: &str) -> String {
        format!("{}:deployer:{}", self.prefix, address)
    }

    fn index_key(&self) -> String {
        format!("{}:deployers:by_score", self.prefix)
    }

    /// Pure scoring: base 50, penalized by rug rate, wallet web and
    /// staleness, rewarded for track record and token longevity.
    pub fn compute_score(profile: &DeployerProfile) -> f64 {
        let lifespan_hours = profile.avg_token_lifespan_ms / 3_600_000.0;
        let days_since_seen =
            (aegis_core::now_ms() - profile.last_seen_ms) as f64 / 86_400_000.0;

        let score = 50.0 - 40.0 * profile.rug_rate
            + (profile.total_launches as f64 * 1.5).min(15.0)
            + (lifespan_hours * 2.0).min(20.0)
            - (profile.connected_wallets.len() as f64 * 3.0).min(15.0)
            - ((days_since_seen - 7.0).max(0.0) * 0.5).min(10.0);

        score.clamp(0.0, 100.0).round()
    }

    pub async fn get_profile(&self, address: &str) -> Result<Option<DeployerProfile>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.profile_key(address)).await.context("reading deployer profile")?;
        Ok(raw.and_then(|json| serde_json::from_str(&json).ok()))
    }

    /// Upsert the profile for a new launch and re-score it.
    pub async fn record_launch(
        &self,
        deployer: &str,
        mint: &str,
        connected_wallets: &[String],
    ) -> Result<DeployerProfile> {
        let mut profile =
            self.get_profile(deployer).await?.unwrap_or_else(|| DeployerProfile::fresh(deployer));

        profile.total_launches += 1;
        profile.last_seen_ms = aegis_core::now_ms();
        for wallet in connected_wallets {
            if !profile.connected_wallets.contains(wallet) {
                profile.connected_wallets.push(wallet.clone());
            }
        }
        profile.rug_rate = if profile.total_launches == 0 {
            0.0
        } else {
            profile.rug_count as f64 / profile.total_launches as f64
        };
        profile.score = Self::compute_score(&profile);

        self.persist(&profile).await?;
        debug!(deployer, mint, score = profile.score, "launch recorded");
        Ok(profile)
    }

    /// Mark one of the deployer's tokens as rugged; lifespan blends into a
    /// running mean.
    pub async fn record_rug(&self, deployer: &str, lifespan_ms: u64) -> Result<DeployerProfile> {
        let mut profile =
            self.get_profile(deployer).await?.unwrap_or_else(|| DeployerProfile::fresh(deployer));

        profile.rug_count += 1;
        if profile.total_launches == 0 {
            profile.total_launches = 1;
        }
        profile.rug_rate = profile.rug_count as f64 / profile.total_launches as f64;
        let n = profile.rug_count as f64;
        profile.avg_token_lifespan_ms =
            (profile.avg_token_lifespan_ms * (n - 1.0) + lifespan_ms as f64) / n;
        profile.score = Self::compute_score(&profile);

        self.persist(&profile).await?;
        Ok(profile)
    }

    async fn persist(&self, profile: &DeployerProfile) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(profile)?;
        let _: () = conn
            .set_ex(self.profile_key(&profile.address), json, PROFILE_TTL_SECONDS)
            .await
            .context("persisting deployer profile")?;
        let _: () = conn
            .zadd(self.index_key(), &profile.address, profile.score)
            .await
            .context("indexing deployer score")?;
        Ok(())
    }

    /// (tracked deployer count, mean score) for the network telemetry view.
    pub async fn score_summary(&self) -> Result<(u64, f64)> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.zcard(self.index_key()).await.context("counting deployers")?;
        if count == 0 {
            return Ok((0, 0.0));
        }
        let scored: Vec<(String, f64)> = conn
            .zrange_withscores(self.index_key(), 0, -1)
            .await
            .context("reading score index")?;
        let mean = scored.iter().map(|(_, s)| s).sum::<f64>() / scored.len().max(1) as f64;
        Ok((count, mean))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_profile_scores_fifty_three() {
        // 50 - 40*0.2 + min(15, 10*1.5) + min(20, 1h*2) - min(15, 2*3) - 0
        let profile = DeployerProfile {
            address: "Dep".into(),
            total_launches: 10,
            rug_count: 2,
            rug_rate: 0.2,
            avg_token_lifespan_ms: 3_600_000.0,
            connected_wallets: vec!["w1".into(), "w2".into()],
            last_seen_ms: aegis_core::now_ms(),
            score: 0.0,
        };
        assert_eq!(DeployerScoreEngine::compute_score(&profile), 53.0);
    }

    #[test]
    fn score_is_clamped_to_zero_one_hundred() {
        let rugger = DeployerProfile {
            address: "Bad".into(),
            total_launches: 20,
            rug_count: 20,
            rug_rate: 1.0,
            avg_token_lifespan_ms: 0.0,
            connected_wallets: (0..30).map(|i| format!("w{i}")).collect(),
            last_seen_ms: aegis_core::now_ms() - 90 * 86_400_000,
            score: 0.0,
        };
        assert_eq!(DeployerScoreEngine::compute_score(&rugger), 0.0);

        let saint = DeployerProfile {
            address: "Good".into(),
            total_launches: 100,
            rug_count: 0,
            rug_rate: 0.0,
            avg_token_lifespan_ms: 1_000.0 * 3_600_000.0,
            connected_wallets: Vec::new(),
            last_seen_ms: aegis_core::now_ms(),
            score: 0.0,
        };
        assert_eq!(DeployerScoreEngine::compute_score(&saint), 85.0);
    }

    #[test]
    fn stale_deployers_lose_up_to_ten_points() {
        let mut profile = DeployerProfile::fresh("Dep");
        profile.total_launches = 1;
        let fresh_score = DeployerScoreEngine::compute_score(&profile);

        profile.last_seen_ms = aegis_core::now_ms() - 60 * 86_400_000; // 60 days
        let stale_score = DeployerScoreEngine::compute_score(&profile);
        assert_eq!(fresh_score - stale_score, 10.0);
    }
}
