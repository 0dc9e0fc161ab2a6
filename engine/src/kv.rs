//! Redis wiring: one multiplexed connection for point operations, with the
//! raw client kept around so the signal bus can open its own blocking
//! connection.

use aegis_pipeline::ports::SnapshotStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::info;

#[derive(Clone)]
pub struct Kv {
    pub client: redis::Client,
    pub conn: MultiplexedConnection,
}

impl Kv {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("creating Redis client")?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("connecting to Redis")?;
        info!("Redis connected");
        Ok(Self { client, conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await.context("pinging Redis")?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for Kv {
    async fn write_snapshot(&self, key: &str, payload: &str, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, payload, ttl_seconds).await.context("writing snapshot")?;
        Ok(())
    }
}
