//! Authoritative in-memory view of positions and defensive telemetry.
//!
//! The state engine owns three indices: open/recent positions by id, dev-sell
//! metrics by (mint, dev wallet), and liquidity-removal tallies by pool. All
//! other components read through it; the execution engine holds the only
//! external write path for position balances.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use aegis_core::position::PositionUpdate;
use aegis_core::{telemetry, InternalEvent, PositionState, PositionStatus};
use anyhow::{bail, Context, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::EventBus;
use crate::ports::{PositionStore, SnapshotStore};

const SELL_RING_CAP: usize = 100;
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(30);
const SNAPSHOT_TTL_SECONDS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentSell {
    pub timestamp_ms: i64,
    pub percentage: f64,
    pub slot: u64,
}

/// Sell pressure from one dev wallet on one mint. The ring keeps the most
/// recent 100 sells; cumulative totals never decay when the ring evicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevWalletMetrics {
    pub mint_address: String,
    pub dev_wallet: String,
    pub total_sell_count: u64,
    pub total_sell_percentage: f64,
    pub recent_sells: VecDeque<RecentSell>,
    pub last_updated_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LpRemoval {
    pub timestamp_ms: i64,
    pub amount: u64,
    pub slot: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LpState {
    pub pool_address: String,
    pub mint_address: String,
    pub total_liquidity: u64,
    pub removals: Vec<LpRemoval>,
    /// Monotonic; never decreases.
    pub total_removed_percentage: f64,
    /// Absolute sum of removal amounts, for LP_REMOVAL_TOTAL triggers.
    pub total_removed_amount: u64,
}

pub struct StateEngine {
    positions: DashMap<String, PositionState>,
    dev_metrics: DashMap<(String, String), DevWalletMetrics>,
    lp_states: DashMap<String, LpState>,
    store: Arc<dyn PositionStore>,
    snapshots: Arc<dyn SnapshotStore>,
    snapshot_key: String,
    cancel: CancellationToken,
}

impl StateEngine {
    pub fn new(
        store: Arc<dyn PositionStore>,
        snapshots: Arc<dyn SnapshotStore>,
        key_prefix: &str,
    ) -> Self {
        Self {
            positions: DashMap::new(),
            dev_metrics: DashMap::new(),
            lp_states: DashMap::new(),
            store,
            snapshots,
            snapshot_key: format!("{key_prefix}:state:snapshot"),
            cancel: CancellationToken::new(),
        }
    }

    /// Load open positions, hook defensive events, arm the snapshot timer.
    /// Must be registered on the bus before the policy path so metrics are
    /// current when triggers read them.
    pub async fn start(self: &Arc<Self>, bus: &EventBus) -> Result<()> {
        let open = self.store.load_open_positions().await.context("loading open positions")?;
        let count = open.len();
        for p in open {
            self.positions.insert(p.id.clone(), p);
        }
        telemetry::OPEN_POSITIONS.set(count as i64);
        info!(count, "state engine loaded open positions");

        let me = Arc::clone(self);
        bus.subscribe("state-engine", move |event| {
            let me = Arc::clone(&me);
            async move { me.apply_event(&event) }
        })
        .await;

        let me = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SNAPSHOT_INTERVAL);
            ticker.tick().await; // first tick is immediate; skip it
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = me.snapshot().await {
                            warn!("state snapshot failed: {e:#}");
                        }
                    }
                }
            }
        });

        Ok(())
    }

    /// Cancel the snapshot timer and flush one final snapshot.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Err(e) = self.snapshot().await {
            error!("final state snapshot failed: {e:#}");
        }
    }

    // ---- read views ----

    pub fn get_position(&self, id: &str) -> Option<PositionState> {
        self.positions.get(id).map(|p| p.clone())
    }

    pub fn get_open_positions(&self) -> Vec<PositionState> {
        self.positions.iter().filter(|p| p.is_open()).map(|p| p.clone()).collect()
    }

    pub fn get_positions_by_mint(&self, mint: &str) -> Vec<PositionState> {
        self.positions
            .iter()
            .filter(|p| p.is_open() && p.mint_address == mint)
            .map(|p| p.clone())
            .collect()
    }

    pub fn get_dev_metrics(&self, mint: &str, wallet: &str) -> Option<DevWalletMetrics> {
        self.dev_metrics.get(&(mint.to_string(), wallet.to_string())).map(|m| m.clone())
    }

    /// Sum of sell percentages inside the trailing window.
    pub fn dev_sell_percentage_in_window(&self, mint: &str, wallet: &str, window_ms: i64) -> f64 {
        let cutoff = aegis_core::now_ms() - window_ms;
        self.dev_metrics
            .get(&(mint.to_string(), wallet.to_string()))
            .map(|m| {
                m.recent_sells
                    .iter()
                    .filter(|s| s.timestamp_ms >= cutoff)
                    .map(|s| s.percentage)
                    .sum()
            })
            .unwrap_or(0.0)
    }

    pub fn get_lp_state(&self, pool: &str) -> Option<LpState> {
        self.lp_states.get(pool).map(|s| s.clone())
    }

    // ---- mutations ----

    pub async fn add_position(&self, position: PositionState) -> Result<()> {
        self.store.insert_position(&position).await?;
        if position.is_open() {
            telemetry::OPEN_POSITIONS.inc();
        }
        self.positions.insert(position.id.clone(), position);
        Ok(())
    }

    /// Apply a partial update. Status never moves backwards; a closed
    /// position stays closed.
    pub async fn update_position(&self, id: &str, update: PositionUpdate) -> Result<PositionState> {
        let updated = {
            let mut entry = match self.positions.get_mut(id) {
                Some(e) => e,
                None => bail!("unknown position {id}"),
            };

            if let Some(next) = update.status {
                if !entry.status.can_transition_to(next) {
                    bail!("illegal status transition {:?} -> {:?} for {id}", entry.status, next);
                }
                if entry.status == PositionStatus::Open && next != PositionStatus::Open {
                    telemetry::OPEN_POSITIONS.dec();
                }
                entry.status = next;
            }
            if let Some(balance) = update.token_balance {
                entry.token_balance = balance;
            }
            if let Some(price) = update.entry_price {
                entry.entry_price = Some(price);
            }
            if update.closed_at.is_some() {
                entry.closed_at = update.closed_at;
            }
            if entry.status == PositionStatus::Closed && entry.closed_at.is_none() {
                entry.closed_at = Some(aegis_core::now_ms());
            }
            entry.clone()
        };

        self.store.update_position(&updated).await?;
        Ok(updated)
    }

    // ---- event handling ----

    pub fn apply_event(&self, event: &InternalEvent) {
        match event {
            InternalEvent::DevWalletSell {
                meta,
                mint_address,
                dev_wallet,
                percentage_of_holdings,
                ..
            } => {
                let key = (mint_address.clone(), dev_wallet.clone());
                let mut m = self.dev_metrics.entry(key).or_insert_with(|| DevWalletMetrics {
                    mint_address: mint_address.clone(),
                    dev_wallet: dev_wallet.clone(),
                    total_sell_count: 0,
                    total_sell_percentage: 0.0,
                    recent_sells: VecDeque::with_capacity(SELL_RING_CAP),
                    last_updated_ms: 0,
                });
                if m.recent_sells.len() == SELL_RING_CAP {
                    m.recent_sells.pop_front();
                }
                m.recent_sells.push_back(RecentSell {
                    timestamp_ms: meta.timestamp_ms,
                    percentage: *percentage_of_holdings,
                    slot: meta.slot,
                });
                m.total_sell_count += 1;
                m.total_sell_percentage += percentage_of_holdings;
                m.last_updated_ms = aegis_core::now_ms();
                debug!(
                    mint = %mint_address,
                    wallet = %dev_wallet,
                    pct = percentage_of_holdings,
                    total = m.total_sell_percentage,
                    "dev sell recorded"
                );
            }
            InternalEvent::LpRemove { meta, mint_address, pool_address, liquidity_amount } => {
                let amount: u64 = liquidity_amount.parse().unwrap_or(0);
                let mut lp = self.lp_states.entry(pool_address.clone()).or_insert_with(|| LpState {
                    pool_address: pool_address.clone(),
                    mint_address: mint_address.clone(),
                    total_liquidity: 0,
                    removals: Vec::new(),
                    total_removed_percentage: 0.0,
                    total_removed_amount: 0,
                });
                lp.removals.push(LpRemoval {
                    timestamp_ms: meta.timestamp_ms,
                    amount,
                    slot: meta.slot,
                });
                lp.total_removed_percentage += amount as f64;
                lp.total_removed_amount = lp.total_removed_amount.saturating_add(amount);
            }
            _ => {}
        }
    }

    // ---- snapshot ----

    async fn snapshot(&self) -> Result<()> {
        #[derive(Serialize)]
        struct PositionRow<'a> {
            #[serde(flatten)]
            position: &'a PositionState,
            token_balance: String, // decimal string wins over the u64 field
        }

        let positions: Vec<serde_json::Value> = self
            .positions
            .iter()
            .map(|p| {
                serde_json::to_value(PositionRow {
                    position: p.value(),
                    token_balance: p.token_balance.to_string(),
                })
                .unwrap_or_default()
            })
            .collect();
        let dev_metrics: Vec<DevWalletMetrics> =
            self.dev_metrics.iter().map(|m| m.clone()).collect();

        let payload = serde_json::json!({
            "taken_at_ms": aegis_core::now_ms(),
            "positions": positions,
            "dev_metrics": dev_metrics,
        });

        self.snapshots
            .write_snapshot(&self.snapshot_key, &payload.to_string(), SNAPSHOT_TTL_SECONDS)
            .await?;
        telemetry::SNAPSHOTS_WRITTEN.inc();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::memory::MemoryStore;
    use aegis_core::events::EventMeta;

    fn engine() -> StateEngine {
        let store = Arc::new(MemoryStore::default());
        StateEngine::new(store.clone(), store, "test")
    }

    fn sell(mint: &str, wallet: &str, pct: f64, ts: i64) -> InternalEvent {
        InternalEvent::DevWalletSell {
            meta: EventMeta { id: uuid::Uuid::new_v4().to_string(), slot: 1, timestamp_ms: ts, signature: String::new() },
            mint_address: mint.into(),
            dev_wallet: wallet.into(),
            amount: "1000".into(),
            percentage_of_holdings: pct,
        }
    }

    fn position(id: &str, mint: &str, balance: u64) -> PositionState {
        PositionState {
            id: id.into(),
            wallet_id: "w".into(),
            tracked_token_id: "t".into(),
            mint_address: mint.into(),
            entry_amount_sol: 0.1,
            token_balance: balance,
            entry_price: None,
            status: PositionStatus::Open,
            opened_at: aegis_core::now_ms(),
            closed_at: None,
        }
    }

    #[test]
    fn sell_ring_caps_at_one_hundred_and_totals_keep_evicted() {
        let engine = engine();
        let now = aegis_core::now_ms();
        for i in 0..130 {
            engine.apply_event(&sell("M", "D", 1.0, now - (130 - i) * 1000));
        }

        let m = engine.get_dev_metrics("M", "D").unwrap();
        assert_eq!(m.recent_sells.len(), 100);
        assert_eq!(m.total_sell_count, 130);
        assert!((m.total_sell_percentage - 130.0).abs() < 1e-9);

        // ring stays ordered by timestamp
        let times: Vec<i64> = m.recent_sells.iter().map(|s| s.timestamp_ms).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn windowed_percentage_only_counts_recent_sells() {
        let engine = engine();
        let now = aegis_core::now_ms();
        engine.apply_event(&sell("M", "D", 10.0, now - 700_000));
        engine.apply_event(&sell("M", "D", 25.0, now - 100_000));

        let windowed = engine.dev_sell_percentage_in_window("M", "D", 600_000);
        assert!((windowed - 25.0).abs() < 1e-9);

        engine.apply_event(&sell("M", "D", 10.0, now - 50_000));
        let windowed = engine.dev_sell_percentage_in_window("M", "D", 600_000);
        assert!((windowed - 35.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn closed_positions_cannot_reopen() {
        let engine = engine();
        engine.add_position(position("p1", "M", 500)).await.unwrap();

        engine
            .update_position(
                "p1",
                PositionUpdate {
                    token_balance: Some(0),
                    status: Some(PositionStatus::Closed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let p = engine.get_position("p1").unwrap();
        assert_eq!(p.status, PositionStatus::Closed);
        assert!(p.closed_at.is_some());
        assert!(p.invariants_hold());

        let err = engine
            .update_position("p1", PositionUpdate { status: Some(PositionStatus::Open), ..Default::default() })
            .await;
        assert!(err.is_err());
    }

    #[test]
    fn lp_removals_accumulate_monotonically() {
        let engine = engine();
        let now = aegis_core::now_ms();
        for amount in [100u64, 250, 50] {
            engine.apply_event(&InternalEvent::LpRemove {
                meta: EventMeta { id: uuid::Uuid::new_v4().to_string(), slot: 2, timestamp_ms: now, signature: String::new() },
                mint_address: "M".into(),
                pool_address: "Pool".into(),
                liquidity_amount: amount.to_string(),
            });
        }
        let lp = engine.get_lp_state("Pool").unwrap();
        assert_eq!(lp.removals.len(), 3);
        assert_eq!(lp.total_removed_amount, 400);
        assert!((lp.total_removed_percentage - 400.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn positions_by_mint_only_returns_open() {
        let engine = engine();
        engine.add_position(position("p1", "M", 10)).await.unwrap();
        engine.add_position(position("p2", "M", 20)).await.unwrap();
        engine.add_position(position("p3", "Other", 30)).await.unwrap();
        engine
            .update_position(
                "p2",
                PositionUpdate {
                    token_balance: Some(0),
                    status: Some(PositionStatus::Closed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let by_mint = engine.get_positions_by_mint("M");
        assert_eq!(by_mint.len(), 1);
        assert_eq!(by_mint[0].id, "p1");
    }
}
