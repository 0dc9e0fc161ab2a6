//! Chain access behind a trait so the execution path is testable without a
//! validator.

use std::time::Duration;

use aegis_core::launchpad::{self, BondingCurveState};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::{RpcSendTransactionConfig, RpcTransactionConfig};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::UiTransactionEncoding;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct SimulationOutcome {
    pub err: Option<String>,
    pub logs: Vec<String>,
    pub units_consumed: Option<u64>,
}

/// A launch-shaped view of one confirmed transaction: enough to identify the
/// token, the deployer and the post balances.
#[derive(Debug, Clone)]
pub struct LaunchTransaction {
    pub signature: String,
    pub slot: u64,
    pub fee_payer: String,
    pub account_keys: Vec<String>,
    /// (mint, owner, raw amount) from post token balances.
    pub post_token_balances: Vec<(String, String, u64)>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_bonding_curve(&self, mint: &Pubkey) -> Result<BondingCurveState>;
    /// Blockhash plus the height it stays valid through.
    async fn latest_blockhash(&self) -> Result<(Hash, u64)>;
    async fn simulate(&self, tx: &Transaction) -> Result<SimulationOutcome>;
    async fn send_raw(
        &self,
        tx: &Transaction,
        skip_preflight: bool,
        max_retries: usize,
    ) -> Result<Signature>;
    async fn confirm(&self, signature: &Signature, last_valid_block_height: u64) -> Result<()>;
    async fn account_exists(&self, address: &Pubkey) -> Result<bool>;
    async fn current_slot(&self) -> Result<u64>;
    async fn recent_program_signatures(&self, program: &Pubkey, limit: usize) -> Result<Vec<String>>;
    async fn get_launch_transaction(&self, signature: &str) -> Result<Option<LaunchTransaction>>;
}

pub struct RpcChainClient {
    rpc: RpcClient,
}

impl RpcChainClient {
    pub fn new(rpc_url: &str) -> Self {
        Self { rpc: RpcClient::new_with_commitment(rpc_url.to_string(), CommitmentConfig::confirmed()) }
    }

    /// Fails fast when the endpoint is unreachable; used at startup.
    pub async fn health_check(&self) -> Result<u64> {
        self.rpc.get_slot().await.context("RPC health check failed")
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn get_bonding_curve(&self, mint: &Pubkey) -> Result<BondingCurveState> {
        let address = launchpad::bonding_curve_address(mint);
        let account = self
            .rpc
            .get_account(&address)
            .await
            .with_context(|| format!("fetching bonding curve {address}"))?;
        BondingCurveState::from_account_data(&account.data)
            .map_err(|e| anyhow!("decoding bonding curve {address}: {e}"))
    }

    async fn latest_blockhash(&self) -> Result<(Hash, u64)> {
        let (hash, last_valid) = self
            .rpc
            .get_latest_blockhash_with_commitment(CommitmentConfig::confirmed())
            .await
            .context("fetching blockhash")?;
        Ok((hash, last_valid))
    }

    async fn simulate(&self, tx: &Transaction) -> Result<SimulationOutcome> {
        let response = self.rpc.simulate_transaction(tx).await.context("simulating transaction")?;
        let value = response.value;
        Ok(SimulationOutcome {
            err: value.err.map(|e| format!("{e:?}")),
            logs: value.logs.unwrap_or_default(),
            units_consumed: value.units_consumed,
        })
    }

    async fn send_raw(
        &self,
        tx: &Transaction,
        skip_preflight: bool,
        max_retries: usize,
    ) -> Result<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight,
            max_retries: Some(max_retries),
            ..Default::default()
        };
        self.rpc
            .send_transaction_with_config(tx, config)
            .await
            .context("sending transaction")
    }

    async fn confirm(&self, signature: &Signature, last_valid_block_height: u64) -> Result<()> {
        loop {
            let statuses = self
                .rpc
                .get_signature_statuses(&[*signature])
                .await
                .context("fetching signature status")?;
            if let Some(Some(status)) = statuses.value.first() {
                if let Some(err) = &status.err {
                    bail!("transaction {signature} failed on chain: {err:?}");
                }
                if status.satisfies_commitment(CommitmentConfig::confirmed()) {
                    return Ok(());
                }
            }

            let height = self.rpc.get_block_height().await.context("fetching block height")?;
            if height > last_valid_block_height {
                bail!("blockhash expired before {signature} confirmed");
            }
            tokio::time::sleep(Duration::from_millis(400)).await;
        }
    }

    async fn account_exists(&self, address: &Pubkey) -> Result<bool> {
        Ok(self
            .rpc
            .get_account_with_commitment(address, CommitmentConfig::confirmed())
            .await
            .context("fetching account")?
            .value
            .is_some())
    }

    async fn current_slot(&self) -> Result<u64> {
        self.rpc.get_slot().await.context("fetching slot")
    }

    async fn recent_program_signatures(&self, program: &Pubkey, limit: usize) -> Result<Vec<String>> {
        let config = GetConfirmedSignaturesForAddress2Config {
            limit: Some(limit),
            ..Default::default()
        };
        let signatures = self
            .rpc
            .get_signatures_for_address_with_config(program, config)
            .await
            .context("fetching program signatures")?;
        Ok(signatures.into_iter().filter(|s| s.err.is_none()).map(|s| s.signature).collect())
    }

    async fn get_launch_transaction(&self, signature: &str) -> Result<Option<LaunchTransaction>> {
        let sig = Signature::from_str(signature).context("parsing signature")?;
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };
        let tx = match self.rpc.get_transaction_with_config(&sig, config).await {
            Ok(tx) => tx,
            Err(e) => {
                debug!("transaction {signature} not yet available: {e}");
                return Ok(None);
            }
        };

        let decoded = tx
            .transaction
            .transaction
            .decode()
            .ok_or_else(|| anyhow!("failed to decode transaction {signature}"))?;
        let account_keys: Vec<String> =
            decoded.message.static_account_keys().iter().map(|k| k.to_string()).collect();
        let fee_payer = account_keys.first().cloned().unwrap_or_default();

        let mut post_token_balances = Vec::new();
        if let Some(meta) = &tx.transaction.meta {
            if let OptionSerializer::Some(balances) = &meta.post_token_balances {
                for balance in balances {
                    let owner = match &balance.owner {
                        OptionSerializer::Some(owner) => owner.clone(),
                        _ => String::new(),
                    };
                    let amount = balance.ui_token_amount.amount.parse::<u64>().unwrap_or(0);
                    post_token_balances.push((balance.mint.clone(), owner, amount));
                }
            }
        }

        Ok(Some(LaunchTransaction {
            signature: signature.to_string(),
            slot: tx.slot,
            fee_payer,
            account_keys,
            post_token_balances,
        }))
    }
}
