//! Postgres adapters for the pipeline store ports. Raw SQL over a deadpool
//! pool; the schema is bootstrapped at connect.

use aegis_core::{ExecutionResult, ExecutionStatus, InternalEvent, PolicyDefinition, PositionState, PositionStatus};
use aegis_pipeline::ports::{EventLogStore, ExecutionStore, PolicyStore, PositionStore};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use serde::Serialize;
use tokio_postgres::NoTls;
use tracing::info;

pub struct PgStore {
    pool: Pool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletRow {
    pub id: String,
    pub address: String,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackedTokenRow {
    pub id: String,
    pub wallet_id: String,
    pub mint_address: String,
    pub symbol: Option<String>,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pg_config: tokio_postgres::Config =
            database_url.parse().context("parsing DATABASE_URL")?;
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig { recycling_method: RecyclingMethod::Fast },
        );
        let pool = Pool::builder(manager).max_size(16).build().context("building pg pool")?;

        // fail fast if the store is unreachable
        let client = pool.get().await.context("connecting to Postgres")?;
        client.simple_query("SELECT 1").await.context("pinging Postgres")?;
        info!("Postgres connected");

        Ok(Self { pool })
    }

    pub async fn ping(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    pub async fn init_schema(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS wallet (
                    id TEXT PRIMARY KEY,
                    address TEXT NOT NULL UNIQUE,
                    label TEXT,
                    created_at BIGINT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS tracked_token (
                    id TEXT PRIMARY KEY,
                    wallet_id TEXT NOT NULL REFERENCES wallet(id),
                    mint_address TEXT NOT NULL,
                    symbol TEXT,
                    created_at BIGINT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS position (
                    id TEXT PRIMARY KEY,
                    wallet_id TEXT NOT NULL,
                    tracked_token_id TEXT NOT NULL,
                    mint_address TEXT NOT NULL,
                    entry_amount_sol DOUBLE PRECISION NOT NULL,
                    token_balance BIGINT NOT NULL,
                    entry_price DOUBLE PRECISION,
                    status TEXT NOT NULL,
                    opened_at BIGINT NOT NULL,
                    closed_at BIGINT
                );
                CREATE INDEX IF NOT EXISTS idx_position_status ON position (status);
                CREATE INDEX IF NOT EXISTS idx_position_mint ON position (mint_address);
                CREATE TABLE IF NOT EXISTS policy (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    definition JSONB NOT NULL,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE
                );
                CREATE TABLE IF NOT EXISTS execution (
                    id TEXT PRIMARY KEY,
                    position_id TEXT NOT NULL,
                    policy_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    tx_signature TEXT,
                    amount_in BIGINT,
                    amount_out BIGINT,
                    error_message TEXT,
                    simulation_logs JSONB,
                    completed_at BIGINT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_execution_position ON execution (position_id);
                CREATE TABLE IF NOT EXISTS event_log (
                    id TEXT PRIMARY KEY,
                    slot BIGINT NOT NULL,
                    variant TEXT NOT NULL,
                    mint_address TEXT NOT NULL,
                    signature TEXT,
                    payload JSONB NOT NULL,
                    timestamp_ms BIGINT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_event_log_mint ON event_log (mint_address);",
            )
            .await
            .context("bootstrapping schema")?;
        info!("schema verified");
        Ok(())
    }

    /// Register the signing wallet; returns its row id.
    pub async fn upsert_wallet(&self, address: &str, label: &str) -> Result<String> {
        let client = self.pool.get().await?;
        let id = uuid::Uuid::new_v4().to_string();
        let row = client
            .query_one(
                "INSERT INTO wallet (id, address, label, created_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (address) DO UPDATE SET label = $3
                 RETURNING id",
                &[&id, &address, &label, &aegis_core::now_ms()],
            )
            .await?;
        Ok(row.get(0))
    }

    pub async fn list_wallets(&self) -> Result<Vec<WalletRow>> {
        let client = self.pool.get().await?;
        let rows = client.query("SELECT id, address, label FROM wallet ORDER BY created_at", &[]).await?;
        Ok(rows
            .iter()
            .map(|r| WalletRow { id: r.get(0), address: r.get(1), label: r.get(2) })
            .collect())
    }

    pub async fn list_tracked_tokens(&self, wallet_id: &str) -> Result<Vec<TrackedTokenRow>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, wallet_id, mint_address, symbol FROM tracked_token WHERE wallet_id = $1",
                &[&wallet_id],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| TrackedTokenRow {
                id: r.get(0),
                wallet_id: r.get(1),
                mint_address: r.get(2),
                symbol: r.get(3),
            })
            .collect())
    }
}

fn status_from_str(status: &str) -> Result<PositionStatus> {
    match status {
        "open" => Ok(PositionStatus::Open),
        "closing" => Ok(PositionStatus::Closing),
        "closed" => Ok(PositionStatus::Closed),
        "failed" => Ok(PositionStatus::Failed),
        other => Err(anyhow!("unknown position status {other}")),
    }
}

fn row_to_position(row: &tokio_postgres::Row) -> Result<PositionState> {
    Ok(PositionState {
        id: row.get("id"),
        wallet_id: row.get("wallet_id"),
        tracked_token_id: row.get("tracked_token_id"),
        mint_address: row.get("mint_address"),
        entry_amount_sol: row.get("entry_amount_sol"),
        token_balance: row.get::<_, i64>("token_balance") as u64,
        entry_price: row.get("entry_price"),
        status: status_from_str(row.get("status"))?,
        opened_at: row.get("opened_at"),
        closed_at: row.get("closed_at"),
    })
}

#[async_trait]
impl PositionStore for PgStore {
    async fn load_open_positions(&self) -> Result<Vec<PositionState>> {
        let client = self.pool.get().await?;
        let rows = client.query("SELECT * FROM position WHERE status = 'open'", &[]).await?;
        rows.iter().map(row_to_position).collect()
    }

    async fn insert_position(&self, p: &PositionState) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO position (id, wallet_id, tracked_token_id, mint_address,
                    entry_amount_sol, token_balance, entry_price, status, opened_at, closed_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                &[
                    &p.id,
                    &p.wallet_id,
                    &p.tracked_token_id,
                    &p.mint_address,
                    &p.entry_amount_sol,
                    &(p.token_balance as i64),
                    &p.entry_price,
                    &p.status.as_str(),
                    &p.opened_at,
                    &p.closed_at,
                ],
            )
            .await
            .context("inserting position")?;
        Ok(())
    }

    async fn update_position(&self, p: &PositionState) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE position SET token_balance = $2, entry_price = $3, status = $4,
                    closed_at = $5 WHERE id = $1",
                &[
                    &p.id,
                    &(p.token_balance as i64),
                    &p.entry_price,
                    &p.status.as_str(),
                    &p.closed_at,
                ],
            )
            .await
            .context("updating position")?;
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for PgStore {
    async fn load_active_policies(&self) -> Result<Vec<PolicyDefinition>> {
        let client = self.pool.get().await?;
        let rows = client.query("SELECT definition FROM policy WHERE is_active", &[]).await?;
        rows.iter()
            .map(|r| {
                let value: serde_json::Value = r.get(0);
                serde_json::from_value(value).context("decoding policy definition")
            })
            .collect()
    }

    async fn insert_policy(&self, policy: &PolicyDefinition) -> Result<()> {
        let client = self.pool.get().await?;
        let definition = serde_json::to_value(policy)?;
        client
            .execute(
                "INSERT INTO policy (id, name, definition, is_active)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (id) DO UPDATE SET name = $2, definition = $3, is_active = $4",
                &[&policy.id, &policy.name, &definition, &policy.is_active],
            )
            .await
            .context("inserting policy")?;
        Ok(())
    }

    async fn delete_policy(&self, id: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let count = client.execute("DELETE FROM policy WHERE id = $1", &[&id]).await?;
        Ok(count > 0)
    }
}

fn execution_status_from_str(status: &str) -> ExecutionStatus {
    match status {
        "pending" => ExecutionStatus::Pending,
        "simulating" => ExecutionStatus::Simulating,
        "submitted" => ExecutionStatus::Submitted,
        "confirmed" => ExecutionStatus::Confirmed,
        _ => ExecutionStatus::Failed,
    }
}

fn row_to_execution(row: &tokio_postgres::Row) -> ExecutionResult {
    let logs: Option<serde_json::Value> = row.get("simulation_logs");
    ExecutionResult {
        id: row.get("id"),
        position_id: row.get("position_id"),
        policy_id: row.get("policy_id"),
        status: execution_status_from_str(row.get("status")),
        tx_signature: row.get("tx_signature"),
        amount_in: row.get::<_, Option<i64>>("amount_in").map(|v| v as u64),
        amount_out: row.get::<_, Option<i64>>("amount_out").map(|v| v as u64),
        error_message: row.get("error_message"),
        simulation_logs: logs.and_then(|v| serde_json::from_value(v).ok()),
        completed_at: row.get("completed_at"),
    }
}

#[async_trait]
impl ExecutionStore for PgStore {
    async fn insert_execution(&self, result: &ExecutionResult) -> Result<()> {
        let client = self.pool.get().await?;
        let logs = result.simulation_logs.as_ref().map(|l| serde_json::json!(l));
        client
            .execute(
                "INSERT INTO execution (id, position_id, policy_id, status, tx_signature,
                    amount_in, amount_out, error_message, simulation_logs, completed_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                &[
                    &result.id,
                    &result.position_id,
                    &result.policy_id,
                    &result.status.as_str(),
                    &result.tx_signature,
                    &result.amount_in.map(|v| v as i64),
                    &result.amount_out.map(|v| v as i64),
                    &result.error_message,
                    &logs,
                    &result.completed_at,
                ],
            )
            .await
            .context("inserting execution")?;
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> Result<Option<ExecutionResult>> {
        let client = self.pool.get().await?;
        let row = client.query_opt("SELECT * FROM execution WHERE id = $1", &[&id]).await?;
        Ok(row.as_ref().map(row_to_execution))
    }

    async fn list_executions(&self, limit: i64) -> Result<Vec<ExecutionResult>> {
        let client = self.pool.get().await?;
        let rows = client
            .query("SELECT * FROM execution ORDER BY completed_at DESC LIMIT $1", &[&limit])
            .await?;
        Ok(rows.iter().map(row_to_execution).collect())
    }
}

#[async_trait]
impl EventLogStore for PgStore {
    async fn append_event(&self, event: &InternalEvent) -> Result<()> {
        let client = self.pool.get().await?;
        let meta = event.meta();
        let payload = serde_json::to_value(event)?;
        client
            .execute(
                "INSERT INTO event_log (id, slot, variant, mint_address, signature, payload, timestamp_ms)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (id) DO NOTHING",
                &[
                    &meta.id,
                    &(meta.slot as i64),
                    &event.variant(),
                    &event.mint_address(),
                    &meta.signature,
                    &payload,
                    &meta.timestamp_ms,
                ],
            )
            .await
            .context("appending event log")?;
        Ok(())
    }
}
