//! Cooperative agent base: a fixed-cadence tick loop with protected hooks.
//! A panic-free contract: tick errors are logged and counted, never fatal.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aegis_core::telemetry;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Scout,
    Analyst,
    Strategist,
    Sentinel,
    Executor,
    Memory,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scout => "scout",
            Self::Analyst => "analyst",
            Self::Strategist => "strategist",
            Self::Sentinel => "sentinel",
            Self::Executor => "executor",
            Self::Memory => "memory",
        }
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn role(&self) -> AgentRole;
    fn tick_interval(&self) -> Duration;

    async fn on_start(&self) -> Result<()> {
        Ok(())
    }
    async fn on_stop(&self) -> Result<()> {
        Ok(())
    }
    async fn tick(&self) -> Result<()>;
}

#[derive(Default)]
pub struct AgentStatus {
    pub running: AtomicBool,
    pub tick_count: AtomicU64,
    pub last_tick_ms: AtomicI64,
}

#[derive(Debug, Serialize)]
pub struct AgentStatusView {
    pub role: AgentRole,
    pub running: bool,
    pub paused: bool,
    pub tick_count: u64,
    pub last_tick_ms: i64,
}

/// Owns the spawned loop for one agent.
pub struct AgentHandle {
    pub role: AgentRole,
    status: Arc<AgentStatus>,
    paused: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl AgentHandle {
    /// Run `on_start`, then arm the tick loop.
    pub async fn spawn(agent: Arc<dyn Agent>) -> Result<Self> {
        let role = agent.role();
        agent.on_start().await?;

        let status = Arc::new(AgentStatus::default());
        status.running.store(true, Ordering::SeqCst);
        let paused = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let loop_status = Arc::clone(&status);
        let loop_paused = Arc::clone(&paused);
        let loop_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(agent.tick_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if loop_paused.load(Ordering::SeqCst) {
                            continue;
                        }
                        loop_status.tick_count.fetch_add(1, Ordering::SeqCst);
                        loop_status.last_tick_ms.store(aegis_core::now_ms(), Ordering::SeqCst);
                        telemetry::AGENT_TICKS.with_label_values(&[role.as_str()]).inc();
                        if let Err(e) = agent.tick().await {
                            telemetry::AGENT_TICK_ERRORS.with_label_values(&[role.as_str()]).inc();
                            warn!(role = role.as_str(), "agent tick failed: {e:#}");
                        }
                    }
                }
            }
            loop_status.running.store(false, Ordering::SeqCst);
            if let Err(e) = agent.on_stop().await {
                warn!(role = role.as_str(), "agent on_stop failed: {e:#}");
            }
            info!(role = role.as_str(), "agent stopped");
        });

        Ok(Self { role, status, paused, cancel })
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn status(&self) -> AgentStatusView {
        AgentStatusView {
            role: self.role,
            running: self.status.running.load(Ordering::SeqCst),
            paused: self.paused.load(Ordering::SeqCst),
            tick_count: self.status.tick_count.load(Ordering::SeqCst),
            last_tick_ms: self.status.last_tick_ms.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct Flaky {
        ticks: AtomicU32,
    }

    #[async_trait]
    impl Agent for Flaky {
        fn role(&self) -> AgentRole {
            AgentRole::Scout
        }

        fn tick_interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        async fn tick(&self) -> Result<()> {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                anyhow::bail!("intermittent failure");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn tick_errors_never_stop_the_loop() {
        let agent = Arc::new(Flaky { ticks: AtomicU32::new(0) });
        let handle = AgentHandle::spawn(Arc::clone(&agent) as Arc<dyn Agent>).await.unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(agent.ticks.load(Ordering::SeqCst) >= 5);
        assert!(handle.status().running);

        handle.stop();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!handle.status().running);
    }

    #[tokio::test]
    async fn pause_suspends_ticks() {
        let agent = Arc::new(Flaky { ticks: AtomicU32::new(0) });
        let handle = AgentHandle::spawn(Arc::clone(&agent) as Arc<dyn Agent>).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.pause();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let at_pause = agent.ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(agent.ticks.load(Ordering::SeqCst), at_pause);

        handle.resume();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(agent.ticks.load(Ordering::SeqCst) > at_pause);
        handle.stop();
    }
}
