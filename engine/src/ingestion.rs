//! Event ingestion: websocket account subscriptions translated into typed
//! internal events, published on the bus and appended to the event log.
//!
//! The connection reconnects with capped backoff and re-subscribes every
//! watched account; balances observed before a disconnect seed the deltas
//! after it.

use std::collections::HashMap;
use std::sync::Arc;

use aegis_core::events::EventMeta;
use aegis_core::{telemetry, InternalEvent};
use aegis_pipeline::ports::EventLogStore;
use aegis_pipeline::EventBus;
use base64::{engine::general_purpose, Engine as _};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const TOKEN_ACCOUNT_LEN: usize = 165;
const MINT_ACCOUNT_LEN: usize = 82;

/// What a watched account means to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchKind {
    /// A wallet's system account; lamport outflows become WalletTransaction.
    SystemAccount { wallet: String },
    /// An SPL token account; sells by dev wallets get flagged.
    TokenAccount { is_dev_wallet: bool },
    /// A pool / curve vault account; drains become LpRemove.
    PoolAccount { mint: String },
    /// The mint itself; supply moves become SupplyChange.
    MintAccount,
}

#[derive(Debug, Clone, Copy)]
pub struct TokenAccountInfo {
    pub mint: [u8; 32],
    pub owner: [u8; 32],
    pub amount: u64,
}

/// SPL token account layout: mint, owner, amount at fixed offsets.
pub fn decode_token_account(data: &[u8]) -> Option<TokenAccountInfo> {
    if data.len() != TOKEN_ACCOUNT_LEN {
        return None;
    }
    Some(TokenAccountInfo {
        mint: data[0..32].try_into().ok()?,
        owner: data[32..64].try_into().ok()?,
        amount: u64::from_le_bytes(data[64..72].try_into().ok()?),
    })
}

/// SPL mint layout: supply sits after the 36-byte COption authority.
pub fn decode_mint_supply(data: &[u8]) -> Option<u64> {
    if data.len() != MINT_ACCOUNT_LEN {
        return None;
    }
    Some(u64::from_le_bytes(data[36..44].try_into().ok()?))
}

fn pubkey_string(bytes: &[u8; 32]) -> String {
    solana_sdk::pubkey::Pubkey::new_from_array(*bytes).to_string()
}

/// Tracks last-seen balances per watched account and turns deltas into
/// events. Pure state machine, no I/O.
pub struct BalanceTracker {
    last_token_amount: HashMap<String, u64>,
    last_lamports: HashMap<String, u64>,
    last_supply: HashMap<String, u64>,
}

impl BalanceTracker {
    pub fn new() -> Self {
        Self {
            last_token_amount: HashMap::new(),
            last_lamports: HashMap::new(),
            last_supply: HashMap::new(),
        }
    }

    fn meta(slot: u64) -> EventMeta {
        EventMeta {
            id: uuid::Uuid::new_v4().to_string(),
            slot,
            timestamp_ms: aegis_core::now_ms(),
            signature: String::new(),
        }
    }

    pub fn on_token_account(
        &mut self,
        account: &str,
        info: TokenAccountInfo,
        is_dev_wallet: bool,
        slot: u64,
    ) -> Vec<InternalEvent> {
        let previous = self.last_token_amount.insert(account.to_string(), info.amount);
        let Some(previous) = previous else {
            return Vec::new(); // first observation only seeds the baseline
        };
        if previous == info.amount {
            return Vec::new();
        }

        let mint = pubkey_string(&info.mint);
        let owner = pubkey_string(&info.owner);
        let mut events = vec![InternalEvent::TokenBalanceChange {
            meta: Self::meta(slot),
            mint_address: mint.clone(),
            wallet: owner.clone(),
            pre_amount: previous.to_string(),
            post_amount: info.amount.to_string(),
        }];

        if is_dev_wallet && info.amount < previous {
            let sold = previous - info.amount;
            let percentage = sold as f64 / previous as f64 * 100.0;
            events.push(InternalEvent::DevWalletSell {
                meta: Self::meta(slot),
                mint_address: mint,
                dev_wallet: owner,
                amount: sold.to_string(),
                percentage_of_holdings: percentage,
            });
        }
        events
    }

    pub fn on_pool_account(
        &mut self,
        account: &str,
        mint: &str,
        amount: u64,
        slot: u64,
    ) -> Vec<InternalEvent> {
        let previous = self.last_token_amount.insert(account.to_string(), amount);
        let Some(previous) = previous else {
            return Vec::new();
        };
        if amount < previous {
            vec![InternalEvent::LpRemove {
                meta: Self::meta(slot),
                mint_address: mint.to_string(),
                pool_address: account.to_string(),
                liquidity_amount: (previous - amount).to_string(),
            }]
        } else if amount > previous {
            vec![InternalEvent::LpAdd {
                meta: Self::meta(slot),
                mint_address: mint.to_string(),
                pool_address: account.to_string(),
                liquidity_amount: (amount - previous).to_string(),
            }]
        } else {
            Vec::new()
        }
    }

    pub fn on_mint_account(&mut self, mint: &str, supply: u64, slot: u64) -> Vec<InternalEvent> {
        let previous = self.last_supply.insert(mint.to_string(), supply);
        let Some(previous) = previous else {
            return Vec::new();
        };
        if previous == supply || previous == 0 {
            return Vec::new();
        }
        let change = (supply as f64 - previous as f64) / previous as f64 * 100.0;
        vec![InternalEvent::SupplyChange {
            meta: Self::meta(slot),
            mint_address: mint.to_string(),
            previous_supply: previous.to_string(),
            new_supply: supply.to_string(),
            change_percentage: change,
        }]
    }

    pub fn on_system_account(
        &mut self,
        wallet: &str,
        lamports: u64,
        slot: u64,
    ) -> Vec<InternalEvent> {
        let previous = self.last_lamports.insert(wallet.to_string(), lamports);
        let Some(previous) = previous else {
            return Vec::new();
        };
        if lamports >= previous {
            return Vec::new();
        }
        vec![InternalEvent::WalletTransaction {
            meta: Self::meta(slot),
            wallet: wallet.to_string(),
            mint_address: String::new(),
            lamports: (previous - lamports).to_string(),
        }]
    }
}

impl Default for BalanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

pub struct EventIngestion {
    ws_url: String,
    bus: Arc<EventBus>,
    event_log: Arc<dyn EventLogStore>,
    watches: Mutex<Vec<(String, WatchKind)>>,
    watch_tx: mpsc::UnboundedSender<(String, WatchKind)>,
    watch_rx: Mutex<Option<mpsc::UnboundedReceiver<(String, WatchKind)>>>,
    cancel: CancellationToken,
}

impl EventIngestion {
    pub fn new(ws_url: &str, bus: Arc<EventBus>, event_log: Arc<dyn EventLogStore>) -> Self {
        let (watch_tx, watch_rx) = mpsc::unbounded_channel();
        Self {
            ws_url: ws_url.to_string(),
            bus,
            event_log,
            watches: Mutex::new(Vec::new()),
            watch_tx,
            watch_rx: Mutex::new(Some(watch_rx)),
            cancel: CancellationToken::new(),
        }
    }

    /// Watch an account; effective immediately if the socket is up, and
    /// re-applied after every reconnect.
    pub fn watch(&self, address: &str, kind: WatchKind) {
        self.watches.lock().unwrap().push((address.to_string(), kind.clone()));
        let _ = self.watch_tx.send((address.to_string(), kind));
    }

    pub fn start(self: &Arc<Self>) {
        let me = Arc::clone(self);
        let mut watch_rx =
            self.watch_rx.lock().unwrap().take().expect("ingestion started twice");
        tokio::spawn(async move {
            let mut retry_secs = 2u64;
            loop {
                if me.cancel.is_cancelled() {
                    break;
                }
                match me.run_connection(&mut watch_rx).await {
                    Ok(()) => break, // cancelled
                    Err(e) => {
                        let jitter = rand::random::<u64>() % 1000;
                        error!("ingestion socket failed: {e:#}; reconnecting in {retry_secs}s");
                        tokio::time::sleep(std::time::Duration::from_millis(
                            retry_secs * 1000 + jitter,
                        ))
                        .await;
                        retry_secs = (retry_secs * 2).min(60);
                    }
                }
            }
            info!("event ingestion stopped");
        });
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn run_connection(
        &self,
        watch_rx: &mut mpsc::UnboundedReceiver<(String, WatchKind)>,
    ) -> anyhow::Result<()> {
        let (ws_stream, _) = connect_async(&self.ws_url).await?;
        let (mut write, mut read) = ws_stream.split();
        let mut tracker = BalanceTracker::new();

        let mut request_id: u64 = 100;
        let mut pending: HashMap<u64, (String, WatchKind)> = HashMap::new();
        let mut subscriptions: HashMap<u64, (String, WatchKind)> = HashMap::new();

        // (re-)subscribe everything we are supposed to watch; drain queued
        // watch requests first, the snapshot below already covers them
        while watch_rx.try_recv().is_ok() {}
        let initial: Vec<(String, WatchKind)> = self.watches.lock().unwrap().clone();
        for (address, kind) in initial {
            request_id += 1;
            pending.insert(request_id, (address.clone(), kind));
            let msg = subscribe_message(request_id, &address);
            write.send(Message::Text(msg.to_string().into())).await?;
        }
        info!(watching = pending.len(), "ingestion socket online");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),

                Some((address, kind)) = watch_rx.recv() => {
                    request_id += 1;
                    pending.insert(request_id, (address.clone(), kind));
                    let msg = subscribe_message(request_id, &address);
                    write.send(Message::Text(msg.to_string().into())).await?;
                }

                maybe = read.next() => {
                    match maybe {
                        Some(Ok(Message::Text(text))) => {
                            let Ok(value) = serde_json::from_str::<Value>(&text) else { continue };

                            // subscription confirmations
                            if let (Some(id), Some(sub)) =
                                (value.get("id").and_then(Value::as_u64), value.get("result").and_then(Value::as_u64))
                            {
                                if let Some(watch) = pending.remove(&id) {
                                    debug!(account = %watch.0, sub, "subscribed");
                                    subscriptions.insert(sub, watch);
                                }
                                continue;
                            }

                            if value.get("method").and_then(Value::as_str) == Some("accountNotification") {
                                self.handle_notification(&value, &subscriptions, &mut tracker).await;
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                            anyhow::bail!("socket closed");
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    async fn handle_notification(
        &self,
        value: &Value,
        subscriptions: &HashMap<u64, (String, WatchKind)>,
        tracker: &mut BalanceTracker,
    ) {
        let params = &value["params"];
        let Some(sub_id) = params["subscription"].as_u64() else { return };
        let Some((address, kind)) = subscriptions.get(&sub_id) else { return };

        let result = &params["result"];
        let slot = result["context"]["slot"].as_u64().unwrap_or(0);
        let account = &result["value"];

        let events = match kind {
            WatchKind::SystemAccount { wallet } => {
                let lamports = account["lamports"].as_u64().unwrap_or(0);
                tracker.on_system_account(wallet, lamports, slot)
            }
            WatchKind::TokenAccount { is_dev_wallet } => {
                let Some(data) = decode_account_data(account) else { return };
                let Some(info) = decode_token_account(&data) else { return };
                tracker.on_token_account(address, info, *is_dev_wallet, slot)
            }
            WatchKind::PoolAccount { mint } => {
                let Some(data) = decode_account_data(account) else { return };
                let Some(info) = decode_token_account(&data) else { return };
                tracker.on_pool_account(address, mint, info.amount, slot)
            }
            WatchKind::MintAccount => {
                let Some(data) = decode_account_data(account) else { return };
                let Some(supply) = decode_mint_supply(&data) else { return };
                tracker.on_mint_account(address, supply, slot)
            }
        };

        for event in events {
            telemetry::EVENTS_INGESTED.with_label_values(&[event.variant()]).inc();
            if let Err(e) = self.event_log.append_event(&event).await {
                warn!("event log append failed: {e:#}");
            }
            self.bus.publish(event);
        }
    }
}

fn subscribe_message(id: u64, address: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "accountSubscribe",
        "params": [address, { "encoding": "base64", "commitment": "processed" }]
    })
}

fn decode_account_data(account: &Value) -> Option<Vec<u8>> {
    let encoded = account["data"].as_array()?.first()?.as_str()?;
    general_purpose::STANDARD.decode(encoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_account_bytes(mint: [u8; 32], owner: [u8; 32], amount: u64) -> Vec<u8> {
        let mut data = vec![0u8; TOKEN_ACCOUNT_LEN];
        data[0..32].copy_from_slice(&mint);
        data[32..64].copy_from_slice(&owner);
        data[64..72].copy_from_slice(&amount.to_le_bytes());
        data
    }

    fn mint_bytes(supply: u64) -> Vec<u8> {
        let mut data = vec![0u8; MINT_ACCOUNT_LEN];
        data[36..44].copy_from_slice(&supply.to_le_bytes());
        data
    }

    #[test]
    fn token_account_decoding() {
        let data = token_account_bytes([1; 32], [2; 32], 777);
        let info = decode_token_account(&data).unwrap();
        assert_eq!(info.amount, 777);
        assert_eq!(info.mint, [1; 32]);
        assert!(decode_token_account(&data[..100]).is_none());
    }

    #[test]
    fn first_observation_only_seeds_the_baseline() {
        let mut tracker = BalanceTracker::new();
        let info = decode_token_account(&token_account_bytes([1; 32], [2; 32], 1_000)).unwrap();
        assert!(tracker.on_token_account("acc", info, true, 5).is_empty());
    }

    #[test]
    fn dev_sell_emits_percentage_of_holdings() {
        let mut tracker = BalanceTracker::new();
        let before = decode_token_account(&token_account_bytes([1; 32], [2; 32], 1_000)).unwrap();
        tracker.on_token_account("acc", before, true, 5);

        let after = decode_token_account(&token_account_bytes([1; 32], [2; 32], 750)).unwrap();
        let events = tracker.on_token_account("acc", after, true, 6);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].variant(), "token_balance_change");
        let InternalEvent::DevWalletSell { amount, percentage_of_holdings, .. } = &events[1] else {
            panic!("expected dev sell");
        };
        assert_eq!(amount, "250");
        assert!((percentage_of_holdings - 25.0).abs() < 1e-9);
    }

    #[test]
    fn non_dev_decrease_is_just_a_balance_change() {
        let mut tracker = BalanceTracker::new();
        let before = decode_token_account(&token_account_bytes([1; 32], [2; 32], 1_000)).unwrap();
        tracker.on_token_account("acc", before, false, 5);

        let after = decode_token_account(&token_account_bytes([1; 32], [2; 32], 100)).unwrap();
        let events = tracker.on_token_account("acc", after, false, 6);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].variant(), "token_balance_change");
    }

    #[test]
    fn pool_drain_becomes_lp_remove() {
        let mut tracker = BalanceTracker::new();
        tracker.on_pool_account("pool", "Mint", 10_000, 1);
        let events = tracker.on_pool_account("pool", "Mint", 4_000, 2);
        assert_eq!(events.len(), 1);
        let InternalEvent::LpRemove { liquidity_amount, .. } = &events[0] else {
            panic!("expected lp remove");
        };
        assert_eq!(liquidity_amount, "6000");
    }

    #[test]
    fn supply_inflation_is_flagged_with_percentage() {
        let mut tracker = BalanceTracker::new();
        let supply = decode_mint_supply(&mint_bytes(1_000_000)).unwrap();
        tracker.on_mint_account("Mint", supply, 1);

        let inflated = decode_mint_supply(&mint_bytes(1_500_000)).unwrap();
        let events = tracker.on_mint_account("Mint", inflated, 2);
        let InternalEvent::SupplyChange { change_percentage, .. } = &events[0] else {
            panic!("expected supply change");
        };
        assert!((change_percentage - 50.0).abs() < 1e-9);
    }
}
