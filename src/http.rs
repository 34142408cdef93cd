//! HTTP surface — webhook ingress and the operator endpoints.
//!
//! The webhook handler is the single `Ingest(event)` entry point for
//! engagement signals; providers deliver at-least-once and the processor
//! dedupes by event id, so redelivery always returns 200. The ops routes
//! cover the emergency stop, breaker visibility, and the audit trail — no
//! review UI lives here.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::dispatch::EmergencyStop;
use crate::limits::BreakerRegistry;
use crate::signals::{IngestOutcome, SignalEvent, SignalKind, SignalProcessor};
use crate::store::{AuditKind, AuditRecord, Database};

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<SignalProcessor>,
    pub breakers: Arc<BreakerRegistry>,
    pub stop: EmergencyStop,
    pub store: Arc<dyn Database>,
}

/// Webhook payload: the minimal shape every provider adapter normalizes to.
#[derive(Debug, Deserialize)]
struct WebhookPayload {
    lead_id: Uuid,
    event: String,
    event_id: String,
    #[serde(default)]
    occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    payload: serde_json::Value,
}

/// POST /webhooks/{provider}
///
/// Ingest one engagement event. Idempotent: a redelivered event id returns
/// 200 with `"duplicate"`.
async fn ingest_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(body): Json<WebhookPayload>,
) -> impl IntoResponse {
    let Some(kind) = SignalKind::parse(&body.event) else {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({"error": format!("unknown event kind '{}'", body.event)})),
        )
            .into_response();
    };

    let mut event = SignalEvent::new(body.lead_id, kind, body.event_id).with_provider(&provider);
    if let Some(at) = body.occurred_at {
        event.occurred_at = at;
    }
    event.payload = body.payload;

    match state.processor.ingest(event).await {
        Ok(outcome) => {
            let result = match outcome {
                IngestOutcome::Transitioned { from, to } => {
                    serde_json::json!({"result": "applied", "from": from, "to": to})
                }
                IngestOutcome::NoChange => serde_json::json!({"result": "no_change"}),
                IngestOutcome::Duplicate => serde_json::json!({"result": "duplicate"}),
                IngestOutcome::UnknownLead => {
                    return (
                        StatusCode::NOT_FOUND,
                        Json(serde_json::json!({"error": "unknown lead"})),
                    )
                        .into_response();
                }
            };
            Json(result).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

/// GET /health
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "emergency_stop": state.stop.is_engaged(),
    }))
}

#[derive(Debug, Deserialize)]
struct StopRequest {
    engaged: bool,
}

/// POST /ops/emergency-stop
///
/// Engage or release the kill switch. Purely local state — takes effect at
/// the next dispatch attempt, within one in-flight item.
async fn set_emergency_stop(
    State(state): State<AppState>,
    Json(body): Json<StopRequest>,
) -> impl IntoResponse {
    if body.engaged {
        state.stop.engage();
    } else {
        state.stop.release();
    }

    let record = AuditRecord::new(
        AuditKind::EmergencyStop,
        None,
        "emergency_stop",
        if body.engaged { "engaged" } else { "released" },
    );
    if let Err(e) = state.store.append_audit(&record).await {
        tracing::warn!("Failed to audit emergency stop: {e}");
    }

    info!(engaged = body.engaged, "Emergency stop updated via ops API");
    Json(serde_json::json!({"engaged": state.stop.is_engaged()}))
}

/// GET /ops/breakers
///
/// Current state of every provider circuit, for alerting.
async fn breaker_status(State(state): State<AppState>) -> impl IntoResponse {
    let circuits = state.breakers.snapshot().await;
    let entries: Vec<_> = circuits
        .iter()
        .map(|c| {
            serde_json::json!({
                "circuit": c.key.storage_key(),
                "state": c.state,
                "consecutive_failures": c.consecutive_failures,
                "last_transition": c.last_transition,
            })
        })
        .collect();
    Json(serde_json::json!({"circuits": entries}))
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    #[serde(default = "default_audit_limit")]
    limit: usize,
}

fn default_audit_limit() -> usize {
    100
}

/// GET /ops/audit?limit=N
async fn audit_trail(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> impl IntoResponse {
    match state.store.list_audit(query.limit.min(1000)).await {
        Ok(records) => Json(serde_json::json!({"records": records})).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

/// Build the router.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/{provider}", post(ingest_webhook))
        .route("/health", get(health))
        .route("/ops/emergency-stop", post(set_emergency_stop))
        .route("/ops/breakers", get(breaker_status))
        .route("/ops/audit", get(audit_trail))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_payload_parses() {
        let payload: WebhookPayload = serde_json::from_str(
            r#"{
                "lead_id": "6f9b9e6e-9a1f-4f43-a371-4ac94ec05c1a",
                "event": "opened",
                "event_id": "evt-123",
                "payload": {"ip": "10.0.0.1"}
            }"#,
        )
        .unwrap();
        assert_eq!(payload.event, "opened");
        assert!(payload.occurred_at.is_none());
        assert_eq!(SignalKind::parse(&payload.event), Some(SignalKind::Opened));
    }
}
