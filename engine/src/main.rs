mod alerts;
mod api;
mod config;
mod db;
mod ingestion;
mod kv;

use std::str::FromStr;
use std::sync::Arc;

use aegis_core::{launchpad, telemetry, InternalEvent};
use aegis_executor::{ChainClient, ExecutionEngine, RpcChainClient};
use aegis_pipeline::{EventBus, Orchestrator, PolicyEngine, RiskEngine, StateEngine};
use aegis_swarm::intel::{DeployerScoreEngine, PatternDatabase, WalletGraph};
use aegis_swarm::mailbox::AgentBus;
use aegis_swarm::reasoning::{LlmClient, Provider, Reasoning};
use aegis_swarm::signals::SignalBus;
use aegis_swarm::{Swarm, SwarmContext};
use anyhow::{Context, Result};
use dotenvy::dotenv;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signer;
use spl_associated_token_account::get_associated_token_address;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use alerts::{AlertManager, AlertSeverity};
use config::NodeConfig;
use ingestion::{EventIngestion, WatchKind};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cfg = NodeConfig::load().context("loading configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cfg.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    telemetry::register_metrics();
    info!(node = %cfg.node_id, env = %cfg.node_env, "aegis node starting");

    // ---- infrastructure, in startup order ----
    let pg = Arc::new(db::PgStore::connect(&cfg.database_url).await?);
    pg.init_schema().await?;
    let kv = kv::Kv::connect(&cfg.redis_url).await?;

    let chain = Arc::new(RpcChainClient::new(&cfg.solana_rpc_url));
    let slot = chain.health_check().await.context("RPC unreachable, aborting startup")?;
    info!(slot, "RPC healthy");

    let signer = Arc::new(cfg.signer()?);
    info!(identity = %signer.pubkey(), "signing identity loaded");
    let wallet_id = pg.upsert_wallet(&signer.pubkey().to_string(), "node signer").await?;

    let params = cfg.risk_parameters();
    let alerts = Arc::new(AlertManager::new(cfg.alert_webhook_url.clone()));

    // ---- defense pipeline ----
    let bus = Arc::new(EventBus::new());
    let state = Arc::new(StateEngine::new(pg.clone(), Arc::new(kv.clone()), &cfg.intel_channel_prefix));
    let policies = Arc::new(PolicyEngine::new(pg.clone(), Arc::clone(&state)));
    let risk = Arc::new(RiskEngine::new(params, Arc::clone(&state)));
    let execution = Arc::new(
        ExecutionEngine::new(
            chain.clone() as Arc<dyn ChainClient>,
            Arc::clone(&state),
            Arc::clone(&risk),
            pg.clone(),
            Arc::clone(&signer),
        )
        .with_bus(Arc::clone(&bus)),
    );
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&policies),
        Arc::clone(&state),
        Arc::clone(&execution) as Arc<dyn aegis_pipeline::ExecutionSink>,
        pg.clone(),
        params,
    ));
    let ingestion = Arc::new(EventIngestion::new(&cfg.solana_ws_url, Arc::clone(&bus), pg.clone()));

    // subscription order matters: state first, then the policy-driven
    // orchestrator, so triggers always read post-update metrics
    state.start(&bus).await?;
    policies.start().await?;
    orchestrator.start(&bus).await;
    register_watch_registrar(&bus, &ingestion, chain.clone()).await;

    let shutdown = CancellationToken::new();
    bus.start(shutdown.clone()).await;

    // watch the signer and everything already tracked
    ingestion.watch(
        &signer.pubkey().to_string(),
        WatchKind::SystemAccount { wallet: signer.pubkey().to_string() },
    );
    for position in state.get_open_positions() {
        register_position_watches(&ingestion, chain.as_ref(), &position.mint_address).await;
    }
    ingestion.start();

    // ---- optional agent swarm ----
    let mut swarm: Option<Arc<Swarm>> = None;
    let mut signal_bus: Option<Arc<SignalBus>> = None;
    let mut deployers_for_api = None;
    if cfg.swarm_enabled {
        let provider = Provider::parse(&cfg.llm_provider)?;
        let reasoner: Arc<dyn Reasoning> = Arc::new(LlmClient::new(
            provider,
            cfg.llm_api_key.as_deref().unwrap_or_default(),
            &cfg.llm_model,
            cfg.llm_max_tokens,
        ));

        let signals = Arc::new(SignalBus::new(
            kv.client.clone(),
            kv.conn.clone(),
            &cfg.node_id,
            &cfg.intel_channel_prefix,
        ));
        let deployers =
            Arc::new(DeployerScoreEngine::new(kv.conn.clone(), &cfg.intel_channel_prefix));
        let graph = Arc::new(WalletGraph::new(kv.conn.clone(), &cfg.intel_channel_prefix));
        let patterns = Arc::new(PatternDatabase::new(kv.conn.clone(), &cfg.intel_channel_prefix));
        deployers_for_api = Some(Arc::clone(&deployers));

        // cross-node intelligence becomes operator alerts
        let rug_alerts = Arc::clone(&alerts);
        signals.subscribe("rugs", move |signal| {
            let alerts = Arc::clone(&rug_alerts);
            async move {
                let mint = signal.data["mint"].as_str().unwrap_or("?").to_string();
                alerts
                    .send(
                        &format!("rug:{mint}"),
                        AlertSeverity::Critical,
                        "Network rug signal",
                        &format!("mint {mint} flagged by node {}", signal.node_id),
                    )
                    .await;
                Ok(())
            }
        });

        let ctx = Arc::new(SwarmContext {
            state: Arc::clone(&state),
            execution: Arc::clone(&execution),
            chain: chain.clone() as Arc<dyn ChainClient>,
            reasoner,
            deployers,
            graph,
            patterns,
            signals: Arc::clone(&signals),
            mailbox: Arc::new(AgentBus::new()),
            redis: kv.conn.clone(),
            params,
            prefix: cfg.intel_channel_prefix.clone(),
            wallet_id: wallet_id.clone(),
        });

        let built = Arc::new(Swarm::build(ctx));
        built.start().await;
        signals.start_consuming().await?;

        swarm = Some(built);
        signal_bus = Some(signals);
        info!("agent swarm online");
    }

    // ---- HTTP surface ----
    let api_ctx = Arc::new(api::ApiContext::new(
        pg.clone(),
        kv.clone(),
        chain.clone(),
        Arc::clone(&state),
        Arc::clone(&policies),
        pg.clone(),
        Arc::clone(&execution),
        deployers_for_api,
        params,
        wallet_id,
    ));
    let api_cancel = shutdown.clone();
    let bind = cfg.api_bind();
    let api_task = tokio::spawn(async move {
        if let Err(e) = api::serve(api_ctx, &bind, api_cancel).await {
            error!("API server failed: {e:#}");
        }
    });

    alerts.send("lifecycle", AlertSeverity::Info, "Node started", &cfg.node_id).await;
    info!("startup complete");

    wait_for_termination().await;
    info!("termination signal received; shutting down");

    // ---- shutdown, reverse of startup ----
    shutdown.cancel(); // stops accepting HTTP requests and the bus dispatcher
    if let Some(swarm) = &swarm {
        swarm.stop().await;
    }
    if let Some(signals) = &signal_bus {
        signals.stop();
    }
    ingestion.stop();
    state.stop().await; // flushes the final snapshot
    let _ = api_task.await;

    alerts.send("lifecycle", AlertSeverity::Info, "Node stopped", &cfg.node_id).await;
    info!("shutdown complete");
    Ok(())
}

/// New positions pull their mint, curve vault and dev wallet token account
/// into the ingestion watch set.
async fn register_watch_registrar(
    bus: &Arc<EventBus>,
    ingestion: &Arc<EventIngestion>,
    chain: Arc<RpcChainClient>,
) {
    let ingestion = Arc::clone(ingestion);
    bus.subscribe("watch-registrar", move |event| {
        let ingestion = Arc::clone(&ingestion);
        let chain = Arc::clone(&chain);
        async move {
            if let InternalEvent::PositionOpened { mint_address, .. } = event {
                register_position_watches(&ingestion, chain.as_ref(), &mint_address).await;
            }
        }
    })
    .await;
}

async fn register_position_watches(
    ingestion: &EventIngestion,
    chain: &RpcChainClient,
    mint_address: &str,
) {
    let Ok(mint) = Pubkey::from_str(mint_address) else {
        warn!(mint = mint_address, "unparseable mint; not watching");
        return;
    };

    ingestion.watch(mint_address, WatchKind::MintAccount);
    ingestion.watch(
        &launchpad::associated_bonding_curve(&mint).to_string(),
        WatchKind::PoolAccount { mint: mint_address.to_string() },
    );

    // the curve creator is the dev wallet to watch for dumps
    match chain.get_bonding_curve(&mint).await {
        Ok(curve) => {
            let dev = curve.creator_pubkey();
            let dev_token_account = get_associated_token_address(&dev, &mint);
            ingestion
                .watch(&dev_token_account.to_string(), WatchKind::TokenAccount { is_dev_wallet: true });
        }
        Err(e) => warn!(mint = mint_address, "could not resolve curve creator: {e:#}"),
    }
}

async fn wait_for_termination() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("installing SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
