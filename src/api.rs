use crate::push::{verify_subscription, PushIngestor};
use crate::scheduler::PollScheduler;
use crate::traits::SourceRegistry;
use crate::types::{IngestError, Result, StoreError};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: PollScheduler,
    pub push: PushIngestor,
    pub registry: Arc<dyn SourceRegistry>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/push/callback", get(verify_handler))
        .route("/push/{source_id}", post(push_handler))
        .route("/admin/poll/{source_id}", post(admin_poll_handler))
        .route("/admin/poll-all", post(admin_poll_all_handler))
        .with_state(state)
}

pub async fn serve(state: AppState, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}

/// Hub verification params. Hubs send `hub.mode` style names; the aliases
/// also accept the bare names for manual testing.
#[derive(Debug, Deserialize)]
struct VerifyParams {
    #[serde(alias = "hub.mode")]
    mode: Option<String>,
    #[serde(alias = "hub.topic")]
    topic: Option<String>,
    #[serde(alias = "hub.challenge")]
    challenge: Option<String>,
}

async fn healthz_handler() -> &'static str {
    "ok"
}

/// Subscription handshake: echo the challenge back verbatim or reject with
/// 400 so the hub abandons the subscription attempt.
async fn verify_handler(Query(params): Query<VerifyParams>) -> Response {
    let mode = params.mode.unwrap_or_default();
    let topic = params.topic.unwrap_or_default();
    let challenge = params.challenge.unwrap_or_default();
    match verify_subscription(&mode, &topic, &challenge) {
        Ok(challenge) => challenge.into_response(),
        Err(e) => (error_status(&e), e.to_string()).into_response(),
    }
}

async fn push_handler(
    State(state): State<AppState>,
    Path(source_id): Path<Uuid>,
    body: String,
) -> Response {
    match state.push.ingest_notification(source_id, &body).await {
        Ok(report) => Json(serde_json::json!({
            "status": "ok",
            "fetched_count": report.fetched_count,
            "new_count": report.new_count,
            "errors": report.errors,
        }))
        .into_response(),
        Err(e) => (error_status(&e), e.to_string()).into_response(),
    }
}

async fn admin_poll_handler(
    State(state): State<AppState>,
    Path(source_id): Path<Uuid>,
) -> Response {
    let source = match state.registry.get_source(source_id).await {
        Ok(source) => source,
        Err(e) => {
            let e = IngestError::from(e);
            return (error_status(&e), e.to_string()).into_response();
        }
    };
    match state.scheduler.poll_one(&source).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => (error_status(&e), e.to_string()).into_response(),
    }
}

async fn admin_poll_all_handler(State(state): State<AppState>) -> Response {
    match state.scheduler.poll_all().await {
        Ok(outcomes) => Json(outcomes).into_response(),
        Err(e) => (error_status(&e), e.to_string()).into_response(),
    }
}

fn error_status(error: &IngestError) -> StatusCode {
    match error {
        IngestError::Store(StoreError::SourceNotFound { .. }) => StatusCode::NOT_FOUND,
        IngestError::Verification(_) => StatusCode::BAD_REQUEST,
        IngestError::Parse(_)
        | IngestError::NoFeedUrl { .. }
        | IngestError::InvalidUrl(_)
        | IngestError::UnsupportedScheme(_) => StatusCode::UNPROCESSABLE_ENTITY,
        IngestError::Http(_) | IngestError::Status { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
