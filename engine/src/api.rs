//! Operator HTTP surface: health, policy CRUD, wallets, positions,
//! executions and aggregate-only network telemetry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use aegis_core::{telemetry, PolicyDefinition, RiskParameters};
use aegis_executor::{ExecutionEngine, RpcChainClient};
use aegis_pipeline::ports::{ExecutionStore, PolicyStore};
use aegis_pipeline::{PolicyEngine, StateEngine};
use aegis_swarm::intel::DeployerScoreEngine;
use anyhow::Result;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use dashmap::DashMap;
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::db::PgStore;
use crate::kv::Kv;

const RATE_LIMIT_PER_MINUTE: u32 = 100;
const BODY_LIMIT_BYTES: usize = 1024 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ApiContext {
    pub db: Arc<PgStore>,
    pub kv: Kv,
    pub chain: Arc<RpcChainClient>,
    pub state: Arc<StateEngine>,
    pub policies: Arc<PolicyEngine>,
    pub executions: Arc<dyn ExecutionStore>,
    pub execution_engine: Arc<ExecutionEngine>,
    pub deployers: Option<Arc<DeployerScoreEngine>>,
    pub params: RiskParameters,
    pub default_wallet_id: String,
    rate_windows: DashMap<std::net::IpAddr, (i64, u32)>,
}

impl ApiContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<PgStore>,
        kv: Kv,
        chain: Arc<RpcChainClient>,
        state: Arc<StateEngine>,
        policies: Arc<PolicyEngine>,
        executions: Arc<dyn ExecutionStore>,
        execution_engine: Arc<ExecutionEngine>,
        deployers: Option<Arc<DeployerScoreEngine>>,
        params: RiskParameters,
        default_wallet_id: String,
    ) -> Self {
        Self {
            db,
            kv,
            chain,
            state,
            policies,
            executions,
            execution_engine,
            deployers,
            params,
            default_wallet_id,
            rate_windows: DashMap::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed")]
    Validation(serde_json::Value),
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(format!("{e:#}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation(details) => (
                StatusCode::BAD_REQUEST,
                json!({"error": "validation", "details": details}),
            ),
            ApiError::NotFound(what) => {
                (StatusCode::NOT_FOUND, json!({"error": "not_found", "entity": what}))
            }
            ApiError::Conflict(what) => {
                (StatusCode::CONFLICT, json!({"error": "conflict", "detail": what}))
            }
            ApiError::Internal(detail) => {
                warn!("internal API error: {detail}");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "internal"}))
            }
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(ctx: Arc<ApiContext>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/policies", get(list_policies).post(create_policy))
        .route("/policies/{id}", axum::routing::delete(delete_policy))
        .route("/wallets", get(list_wallets))
        .route("/wallets/{wallet_id}/tokens", get(list_tokens))
        .route("/positions", get(list_positions).post(open_position))
        .route("/positions/{id}", get(get_position))
        .route("/executions", get(list_executions))
        .route("/executions/{id}", get(get_execution))
        .route("/metrics/network", get(network_metrics))
        .route("/metrics", get(prometheus_metrics))
        .layer(middleware::from_fn_with_state(Arc::clone(&ctx), rate_limit))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(tower_http::timeout::TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(ctx)
}

pub async fn serve(ctx: Arc<ApiContext>, bind: &str, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "API server listening");
    let app = router(ctx).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

/// Fixed-window limiter per client IP.
async fn rate_limit(
    State(ctx): State<Arc<ApiContext>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let now_minute = aegis_core::now_ms() / 60_000;
    let mut entry = ctx.rate_windows.entry(addr.ip()).or_insert((now_minute, 0));
    if entry.0 != now_minute {
        *entry = (now_minute, 0);
    }
    entry.1 += 1;
    let over = entry.1 > RATE_LIMIT_PER_MINUTE;
    drop(entry);

    if over {
        return (StatusCode::TOO_MANY_REQUESTS, Json(json!({"error": "rate_limited"})))
            .into_response();
    }
    next.run(request).await
}

async fn health(State(ctx): State<Arc<ApiContext>>) -> Response {
    let db_ok = ctx.db.ping().await.is_ok();
    let kv_ok = ctx.kv.ping().await.is_ok();
    let slot = ctx.chain.health_check().await.ok();

    let body = json!({
        "status": if db_ok && kv_ok && slot.is_some() { "ok" } else { "degraded" },
        "db": db_ok,
        "kv": kv_ok,
        "rpc_slot": slot,
    });
    let status = if db_ok && kv_ok && slot.is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

async fn list_policies(State(ctx): State<Arc<ApiContext>>) -> Json<Vec<PolicyDefinition>> {
    Json(ctx.policies.policies())
}

async fn create_policy(
    State(ctx): State<Arc<ApiContext>>,
    Json(mut policy): Json<PolicyDefinition>,
) -> Result<(StatusCode, Json<PolicyDefinition>), ApiError> {
    if policy.id.is_empty() {
        policy.id = uuid::Uuid::new_v4().to_string();
    }
    policy
        .validate()
        .map_err(|e| ApiError::Validation(json!({"policy": e.to_string()})))?;
    if ctx.policies.get_policy(&policy.id).is_some() {
        return Err(ApiError::Conflict(format!("policy {} already exists", policy.id)));
    }

    ctx.db.insert_policy(&policy).await?;
    ctx.policies.add_policy(policy.clone());
    Ok((StatusCode::CREATED, Json(policy)))
}

async fn delete_policy(
    State(ctx): State<Arc<ApiContext>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let removed = ctx.policies.remove_policy(&id);
    let deleted = ctx.db.delete_policy(&id).await?;
    if !removed && !deleted {
        return Err(ApiError::NotFound(format!("policy {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn list_wallets(
    State(ctx): State<Arc<ApiContext>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let wallets = ctx.db.list_wallets().await?;
    Ok(Json(json!({ "wallets": wallets })))
}

async fn list_tokens(
    State(ctx): State<Arc<ApiContext>>,
    Path(wallet_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tokens = ctx.db.list_tracked_tokens(&wallet_id).await?;
    Ok(Json(json!({ "tokens": tokens })))
}

async fn list_positions(State(ctx): State<Arc<ApiContext>>) -> Json<serde_json::Value> {
    Json(json!({ "positions": ctx.state.get_open_positions() }))
}

#[derive(Debug, Deserialize)]
struct OpenPositionRequest {
    mint_address: String,
    amount_sol: f64,
    wallet_id: Option<String>,
    max_slippage_bps: Option<u16>,
    priority_fee_lamports: Option<u64>,
}

async fn open_position(
    State(ctx): State<Arc<ApiContext>>,
    Json(request): Json<OpenPositionRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let mut details = serde_json::Map::new();
    if request.mint_address.is_empty() {
        details.insert("mint_address".into(), json!("required"));
    }
    if request.amount_sol <= 0.0 {
        details.insert("amount_sol".into(), json!("must be > 0"));
    }
    let slippage = request.max_slippage_bps.unwrap_or(ctx.params.max_slippage_bps);
    if slippage == 0 || slippage > 10_000 {
        details.insert("max_slippage_bps".into(), json!("must be in [1, 10000]"));
    }
    if !details.is_empty() {
        return Err(ApiError::Validation(details.into()));
    }

    let wallet_id = request.wallet_id.unwrap_or_else(|| ctx.default_wallet_id.clone());
    let position = ctx
        .execution_engine
        .execute_entry(
            &request.mint_address,
            (request.amount_sol * 1e9) as u64,
            slippage,
            request.priority_fee_lamports.unwrap_or(0),
            &wallet_id,
            "api",
        )
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "position": position }))))
}

async fn get_position(
    State(ctx): State<Arc<ApiContext>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ctx.state
        .get_position(&id)
        .map(|p| Json(json!({ "position": p })))
        .ok_or_else(|| ApiError::NotFound(format!("position {id}")))
}

async fn list_executions(
    State(ctx): State<Arc<ApiContext>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let executions = ctx.executions.list_executions(100).await?;
    Ok(Json(json!({ "executions": executions })))
}

async fn get_execution(
    State(ctx): State<Arc<ApiContext>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ctx.executions
        .get_execution(&id)
        .await?
        .map(|e| Json(json!({ "execution": e })))
        .ok_or_else(|| ApiError::NotFound(format!("execution {id}")))
}

/// Aggregate-only telemetry: counts and rates, never strategy data or
/// addresses.
async fn network_metrics(
    State(ctx): State<Arc<ApiContext>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deployer_summary = match &ctx.deployers {
        Some(engine) => {
            let (count, mean) = engine.score_summary().await.unwrap_or((0, 0.0));
            json!({"tracked": count, "mean_score": mean})
        }
        None => json!(null),
    };

    Ok(Json(json!({
        "open_positions": telemetry::OPEN_POSITIONS.get(),
        "events_dropped_busy": telemetry::EVENTS_DROPPED_BUSY.get(),
        "snapshots_written": telemetry::SNAPSHOTS_WRITTEN.get(),
        "deployers": deployer_summary,
    })))
}

async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let families = telemetry::REGISTRY.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (
        [(axum::http::header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}
