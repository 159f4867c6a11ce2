//! Webhook server.
//!
//! One POST endpoint receives provider push notifications, either as
//! explicit delta pairs or as a history id the provider resolves. Each
//! delta feeds the event ingestor. Benign skips answer success so the
//! provider stops redelivering; retryable failures answer 503 so it
//! tries again.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Account;
use crate::ingest::{EventIngestor, IngestOutcome};
use crate::provider::{EmailProvider, HistoryDelta};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub account: Account,
    pub provider: Arc<dyn EmailProvider>,
    pub ingestor: Arc<EventIngestor>,
}

/// Build the Axum router for webhook and health routes.
pub fn webhook_routes(
    account: Account,
    provider: Arc<dyn EmailProvider>,
    ingestor: Arc<EventIngestor>,
) -> Router {
    let state = AppState {
        account,
        provider,
        ingestor,
    };

    Router::new()
        .route("/healthz", get(health))
        .route("/webhooks/email", post(receive_push))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mailflow"
    }))
}

// ── Webhook ─────────────────────────────────────────────────────────

/// Push payload: explicit deltas, a history id, or both.
#[derive(Debug, Default, Deserialize)]
struct PushPayload {
    #[serde(default)]
    deltas: Vec<HistoryDelta>,
    #[serde(default)]
    history_id: Option<String>,
}

async fn receive_push(
    State(state): State<AppState>,
    Json(payload): Json<PushPayload>,
) -> impl IntoResponse {
    let mut deltas = payload.deltas;

    if let Some(history_id) = &payload.history_id {
        match state.provider.history_deltas(history_id).await {
            Ok(resolved) => deltas.extend(resolved),
            Err(e) if e.is_retryable() => {
                warn!(history_id, error = %e, "history resolution failed, asking for redelivery");
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(serde_json::json!({ "status": "retry" })),
                );
            }
            Err(e) => {
                warn!(history_id, error = %e, "history resolution failed permanently");
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "status": "error", "error": e.to_string() })),
                );
            }
        }
    }

    let mut processed = 0usize;
    let mut skipped = 0usize;

    for delta in &deltas {
        match state.ingestor.ingest(&state.account, delta).await {
            Ok(IngestOutcome::Processed { .. }) | Ok(IngestOutcome::ReplyStateUpdated) => {
                processed += 1;
            }
            Ok(_) => skipped += 1,
            Err(e) if e.is_retryable() => {
                warn!(message_id = %delta.message_id, error = %e, "ingest failed, asking for redelivery");
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(serde_json::json!({ "status": "retry" })),
                );
            }
            Err(e) => {
                // Redelivering a permanent failure would just repeat it;
                // acknowledge and surface it in the logs.
                warn!(message_id = %delta.message_id, error = %e, "ingest failed permanently");
                skipped += 1;
            }
        }
    }

    info!(deltas = deltas.len(), processed, skipped, "push handled");
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "processed": processed,
            "skipped": skipped,
        })),
    )
}
