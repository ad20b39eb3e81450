//! HTTP surface (§4.12): health check, manual resync trigger, and one
//! route per registered Live Event Processor path, generalized from the
//! teacher's `infrastructure::mcp::http_server` axum wiring.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tracing::{info, warn};

use crate::domain::models::{LiveEvent, TriggerType};
use crate::services::{IngestOutcome, LiveEventRuntime, ResyncOrchestrator};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ResyncOrchestrator>,
    pub live_events: Arc<LiveEventRuntime>,
}

pub fn router(state: AppState, webhook_paths: Vec<String>) -> Router {
    let mut router = Router::new().route("/health", get(health)).route("/resync", post(trigger_resync));

    for path in webhook_paths {
        let route_path = path.clone();
        router = router.route(
            &path,
            post(move |State(state): State<AppState>, headers: HeaderMap, body: Option<Json<Value>>| {
                let route_path = route_path.clone();
                async move { handle_webhook(state, route_path, headers, body).await }
            }),
        );
    }

    router.with_state(state)
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

async fn trigger_resync(State(state): State<AppState>) -> impl IntoResponse {
    info!("manual resync triggered via http");
    let report = state.orchestrator.trigger_resync(TriggerType::Manual).await;
    Json(serde_json::json!({
        "created": report.created,
        "updated": report.updated,
        "deleted": report.deleted,
        "failed": report.failed,
        "errors": report.errors,
    }))
}

async fn handle_webhook(state: AppState, path: String, headers: HeaderMap, body: Option<Json<Value>>) -> impl IntoResponse {
    let event = LiveEvent::new(path, "POST", headers_to_map(&headers), body.map(|Json(v)| v).unwrap_or(Value::Null));
    match state.live_events.submit(event).await {
        IngestOutcome::Enqueued => StatusCode::ACCEPTED,
        IngestOutcome::UnknownPath => StatusCode::NOT_FOUND,
        IngestOutcome::Unauthorized => StatusCode::UNAUTHORIZED,
        IngestOutcome::InvalidPayload => StatusCode::BAD_REQUEST,
        IngestOutcome::ShuttingDown => {
            warn!("webhook rejected: live event runtime is shutting down");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

fn headers_to_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect()
}
