//! pulsebot-gateway: HTTP surface for the scheduler.
//!
//! Provides:
//! - `GET /health` liveness check
//! - `POST /heartbeat` external heartbeat trigger for serverless deployments
//! - `GET /jobs` and `GET /jobs/{id}` job listing and persisted run history
//! - Bearer token authentication on everything except `/health`

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pulsebot_config::GatewayConfig;
use pulsebot_cron::Scheduler;
use pulsebot_types::{HeartbeatReport, JobStatus, JobSummary};

/// Shared gateway state.
pub struct GatewayState {
    pub scheduler: Arc<Scheduler>,
    pub auth_token: Option<String>,
}

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/heartbeat", post(heartbeat_handler))
        .route("/jobs", get(jobs_handler))
        .route("/jobs/{id}", get(job_status_handler))
        .with_state(state)
}

/// Start the gateway and serve until `cancel` fires.
pub async fn start_gateway(
    scheduler: Arc<Scheduler>,
    config: &GatewayConfig,
    port_override: Option<u16>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let port = port_override.unwrap_or(config.port);
    let state = Arc::new(GatewayState {
        scheduler,
        auth_token: config.auth_token.clone(),
    });
    let app = router(state);

    let addr: SocketAddr = format!("{}:{port}", config.host).parse()?;
    info!("Gateway listening on {addr}");
    info!("  Health:    http://{addr}/health");
    info!("  Heartbeat: http://{addr}/heartbeat");
    if config.auth_token.is_none() {
        warn!("No gateway auth token configured, heartbeat endpoint is open");
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

/// GET /health: simple HTTP health check.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// POST /heartbeat: run every due job once and report what ran.
async fn heartbeat_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Result<Json<HeartbeatReport>, StatusCode> {
    authorize(&state, &headers)?;
    let report = state.scheduler.trigger_heartbeat().await;
    info!(ran = report.results.len(), "External heartbeat processed");
    Ok(Json(report))
}

/// GET /jobs: registered jobs.
async fn jobs_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<JobSummary>>, StatusCode> {
    authorize(&state, &headers)?;
    Ok(Json(state.scheduler.list_jobs().await))
}

/// GET /jobs/{id}: persisted run history of one job.
///
/// 404 only when the job is neither registered here nor has any stored state.
async fn job_status_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<JobStatus>, StatusCode> {
    authorize(&state, &headers)?;
    let status = state.scheduler.get_job_status(&id).await;
    if status == JobStatus::default() {
        let registered = state.scheduler.list_jobs().await.iter().any(|j| j.id == id);
        if !registered {
            return Err(StatusCode::NOT_FOUND);
        }
    }
    Ok(Json(status))
}

fn authorize(state: &GatewayState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let Some(expected_token) = &state.auth_token else {
        return Ok(());
    };
    match extract_bearer_token(headers) {
        Some(token) if token == expected_token => Ok(()),
        _ => {
            warn!("Gateway authentication failed");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Extract bearer token from Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
