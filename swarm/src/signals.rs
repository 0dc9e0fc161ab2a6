//! Durable cross-node signal bus on KV-store streams: at-least-once delivery
//! through consumer groups, with self-authored messages skipped.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use aegis_core::telemetry;
use anyhow::{Context, Result};
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const GROUP: &str = "aegis-intel";
const STREAM_MAXLEN: usize = 10_000;
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const BLOCK_MS: usize = 2_000;
const BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub node_id: String,
    #[serde(rename = "type")]
    pub signal_type: String,
    pub data: serde_json::Value,
    pub timestamp_ms: i64,
}

type BoxFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type SignalHandler = Arc<dyn Fn(Signal) -> BoxFuture + Send + Sync>;

pub struct SignalBus {
    client: redis::Client,
    publish_conn: MultiplexedConnection,
    node_id: String,
    prefix: String,
    handlers: DashMap<String, Vec<SignalHandler>>,
    cancel: CancellationToken,
}

impl SignalBus {
    pub fn new(
        client: redis::Client,
        publish_conn: MultiplexedConnection,
        node_id: &str,
        prefix: &str,
    ) -> Self {
        Self {
            client,
            publish_conn,
            node_id: node_id.to_string(),
            prefix: prefix.to_string(),
            handlers: DashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    fn stream_key(&self, channel: &str) -> String {
        format!("{}:signals:{}", self.prefix, channel)
    }

    /// Append a signal; the stream is trimmed to roughly 10k entries.
    pub async fn publish(
        &self,
        channel: &str,
        signal_type: &str,
        data: serde_json::Value,
    ) -> Result<String> {
        let signal = Signal {
            id: uuid::Uuid::new_v4().to_string(),
            node_id: self.node_id.clone(),
            signal_type: signal_type.to_string(),
            data,
            timestamp_ms: aegis_core::now_ms(),
        };
        let payload = serde_json::to_string(&signal)?;

        let mut conn = self.publish_conn.clone();
        let _: String = conn
            .xadd_maxlen(
                self.stream_key(channel),
                StreamMaxlen::Approx(STREAM_MAXLEN),
                "*",
                &[("payload", payload.as_str())],
            )
            .await
            .context("appending signal")?;
        telemetry::SIGNALS_PUBLISHED.with_label_values(&[channel]).inc();
        Ok(signal.id)
    }

    /// Register a handler; consuming starts when `start_consuming` runs.
    pub fn subscribe<F, Fut>(&self, channel: &str, handler: F)
    where
        F: Fn(Signal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let boxed: SignalHandler = Arc::new(move |s| Box::pin(handler(s)) as BoxFuture);
        self.handlers.entry(channel.to_string()).or_default().push(boxed);
    }

    /// Ensure consumer groups exist and poll on a dedicated connection so
    /// blocking reads never starve publishers.
    pub async fn start_consuming(self: &Arc<Self>) -> Result<()> {
        let channels: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        if channels.is_empty() {
            debug!("signal bus has no subscriptions; consumer not started");
            return Ok(());
        }

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("opening signal consumer connection")?;

        for channel in &channels {
            let key = self.stream_key(channel);
            let created: redis::RedisResult<()> =
                conn.xgroup_create_mkstream(&key, GROUP, "$").await;
            if let Err(e) = created {
                // BUSYGROUP means another run already created it
                if !e.to_string().contains("BUSYGROUP") {
                    return Err(e).context("creating consumer group");
                }
            }
        }
        info!(channels = ?channels, node = %self.node_id, "signal bus consuming");

        let me = Arc::clone(self);
        let keys: Vec<String> = channels.iter().map(|c| me.stream_key(c)).collect();
        let ids: Vec<String> = keys.iter().map(|_| ">".to_string()).collect();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = me.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = me.poll_once(&mut conn, &keys, &ids, &channels).await {
                            warn!("signal poll failed: {e:#}");
                        }
                    }
                }
            }
            info!("signal bus consumer stopped");
        });
        Ok(())
    }

    async fn poll_once(
        &self,
        conn: &mut MultiplexedConnection,
        keys: &[String],
        ids: &[String],
        channels: &[String],
    ) -> Result<()> {
        let options = StreamReadOptions::default()
            .group(GROUP, &self.node_id)
            .count(BATCH_SIZE)
            .block(BLOCK_MS);
        let reply: StreamReadReply =
            conn.xread_options(keys, ids, &options).await.context("reading signal streams")?;

        for stream in reply.keys {
            let channel = channels
                .iter()
                .find(|c| self.stream_key(c) == stream.key)
                .cloned()
                .unwrap_or_default();

            for entry in stream.ids {
                let payload: Option<String> = entry.get("payload");
                let Some(payload) = payload else {
                    let _: u64 = conn.xack(&stream.key, GROUP, &[&entry.id]).await?;
                    continue;
                };
                let signal: Signal = match serde_json::from_str(&payload) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("unparseable signal on {}: {e}", stream.key);
                        let _: u64 = conn.xack(&stream.key, GROUP, &[&entry.id]).await?;
                        continue;
                    }
                };

                // own messages are acknowledged and skipped
                if signal.node_id == self.node_id {
                    let _: u64 = conn.xack(&stream.key, GROUP, &[&entry.id]).await?;
                    continue;
                }

                telemetry::SIGNALS_CONSUMED.with_label_values(&[channel.as_str()]).inc();
                let mut all_ok = true;
                let handlers: Vec<SignalHandler> = self
                    .handlers
                    .get(&channel)
                    .map(|h| h.clone())
                    .unwrap_or_default();
                for handler in handlers {
                    if let Err(e) = handler(signal.clone()).await {
                        warn!(channel = %channel, "signal handler failed: {e:#}");
                        all_ok = false;
                    }
                }

                // ack only after every handler succeeded: at-least-once
                if all_ok {
                    let _: u64 = conn.xack(&stream.key, GROUP, &[&entry.id]).await?;
                }
            }
        }
        Ok(())
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_wire_format_round_trips() {
        let signal = Signal {
            id: "sig-1".into(),
            node_id: "node-a".into(),
            signal_type: "rug_detected".into(),
            data: serde_json::json!({"mint": "M", "severity": "critical"}),
            timestamp_ms: 1_730_000_000_000,
        };
        let json = serde_json::to_string(&signal).unwrap();
        assert!(json.contains("\"type\":\"rug_detected\""));

        let back: Signal = serde_json::from_str(&json).unwrap();
        assert_eq!(back.node_id, "node-a");
        assert_eq!(back.data["mint"], "M");
    }
}
