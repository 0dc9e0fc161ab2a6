//! The cooperative agent swarm: offensive discovery, analysis and sizing on
//! top of the always-on defense pipeline, plus the shared intelligence
//! stores and the cross-node signal bus.

pub mod agent;
pub mod agents;
pub mod intel;
pub mod mailbox;
pub mod reasoning;
pub mod signals;

use std::sync::Arc;

use aegis_core::RiskParameters;
use aegis_executor::{ChainClient, ExecutionEngine};
use aegis_pipeline::StateEngine;
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use tracing::{error, info};

use agent::{Agent, AgentHandle, AgentRole, AgentStatusView};
use agents::{Analyst, ExecutorAgent, MemoryAgent, Scout, Sentinel, Strategist};
use intel::{DeployerScoreEngine, PatternDatabase, WalletGraph};
use mailbox::AgentBus;
use reasoning::Reasoning;
use signals::SignalBus;

/// Everything an agent can reach. Built once by the composition root.
pub struct SwarmContext {
    pub state: Arc<StateEngine>,
    pub execution: Arc<ExecutionEngine>,
    pub chain: Arc<dyn ChainClient>,
    pub reasoner: Arc<dyn Reasoning>,
    pub deployers: Arc<DeployerScoreEngine>,
    pub graph: Arc<WalletGraph>,
    pub patterns: Arc<PatternDatabase>,
    pub signals: Arc<SignalBus>,
    pub mailbox: Arc<AgentBus>,
    pub redis: MultiplexedConnection,
    pub params: RiskParameters,
    pub prefix: String,
    pub wallet_id: String,
}

/// Owns the six agents and their running handles.
pub struct Swarm {
    agents: Vec<Arc<dyn Agent>>,
    handles: DashMap<AgentRole, AgentHandle>,
    mailbox: Arc<AgentBus>,
}

impl Swarm {
    /// Wire the full six-agent roster against one context.
    pub fn build(ctx: Arc<SwarmContext>) -> Self {
        let agents: Vec<Arc<dyn Agent>> = vec![
            Arc::new(Scout::new(Arc::clone(&ctx))),
            Arc::new(Analyst::new(Arc::clone(&ctx))),
            Arc::new(Strategist::new(Arc::clone(&ctx))),
            Arc::new(Sentinel::new(Arc::clone(&ctx))),
            Arc::new(ExecutorAgent::new(Arc::clone(&ctx))),
            Arc::new(MemoryAgent::new(Arc::clone(&ctx))),
        ];
        Self { agents, handles: DashMap::new(), mailbox: Arc::clone(&ctx.mailbox) }
    }

    /// Start every agent concurrently; one failure does not stop the rest.
    pub async fn start(&self) {
        let spawns = self.agents.iter().map(|agent| {
            let agent = Arc::clone(agent);
            async move {
                let role = agent.role();
                match AgentHandle::spawn(agent).await {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        error!(role = role.as_str(), "agent failed to start: {e:#}");
                        None
                    }
                }
            }
        });

        for handle in futures_util::future::join_all(spawns).await.into_iter().flatten() {
            self.handles.insert(handle.role, handle);
        }
        info!(agents = self.handles.len(), "swarm started");
    }

    pub async fn stop(&self) {
        for entry in self.handles.iter() {
            entry.value().stop();
            self.mailbox.unregister_role(entry.value().role);
        }
        info!("swarm stopping");
    }

    pub fn pause_agent(&self, role: AgentRole) -> bool {
        self.handles.get(&role).map(|h| h.pause()).is_some()
    }

    pub fn resume_agent(&self, role: AgentRole) -> bool {
        self.handles.get(&role).map(|h| h.resume()).is_some()
    }

    pub fn statuses(&self) -> Vec<AgentStatusView> {
        self.handles.iter().map(|h| h.status()).collect()
    }
}

/// Tracked-token tag on positions the swarm opens on its own initiative.
pub const SWARM_TRACKED_TOKEN: &str = "swarm";
