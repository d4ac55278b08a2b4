//! HTTP endpoints
//!
//! The WhatsApp webhook plus health, readiness, metrics and admin
//! surfaces. The webhook is the only hot path; everything else exists
//! for operators and orchestrators.

use std::time::Duration;

use axum::{
    extract::{Form, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use sales_agent_core::phone::last_ten;
use sales_agent_core::IncomingMessage;

use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::ServerError;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let (cors_layer, timeout) = {
        let settings = state.settings.read();
        (
            build_cors_layer(&settings.server.cors_origins, settings.server.cors_enabled),
            Duration::from_secs(settings.server.timeout_seconds),
        )
    };

    Router::new()
        .route("/webhook/whatsapp", post(whatsapp_webhook))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route("/admin/config/reload", post(reload_config))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .layer(cors_layer)
        .with_state(state)
}

/// Build the CORS layer from configured origins. Disabled means
/// permissive, which only matters in development; the webhook itself is
/// server-to-server traffic.
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins");
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            })
        })
        .collect();

    if parsed.is_empty() {
        // No browser origins allowed; Twilio does not preflight.
        return CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any);
    }

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// Twilio webhook form payload. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub(crate) struct TwilioForm {
    pub from: String,
    pub body: String,
    pub profile_name: Option<String>,
    pub message_sid: Option<String>,
    pub sms_status: Option<String>,
    pub num_media: Option<String>,
}

impl TwilioForm {
    fn into_message(self) -> IncomingMessage {
        let mut msg = IncomingMessage::new(self.from, self.body);
        msg.profile_name = self.profile_name.filter(|p| !p.is_empty());
        msg.message_sid = self.message_sid.filter(|s| !s.is_empty());
        msg.media_count = self
            .num_media
            .as_deref()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        msg
    }
}

/// POST /webhook/whatsapp
///
/// The transport retries on anything but 2xx, so every well-formed
/// request gets its 200 even when the message goes nowhere. The one
/// exception is a sender over the rate limit, who gets a 429.
async fn whatsapp_webhook(
    State(state): State<AppState>,
    Form(form): Form<TwilioForm>,
) -> StatusCode {
    // Delivery receipts carry a status and no body. They are dropped in
    // the engine without charging the sender's bucket here.
    let status_callback = form.body.is_empty() && form.sms_status.is_some();
    if !status_callback && !state.limiter.check(&last_ten(&form.from)) {
        metrics::counter!("sales_agent_webhook_total", "result" => "rate_limited").increment(1);
        tracing::warn!(from = %form.from, "Sender over the rate limit");
        return ServerError::RateLimit.into();
    }

    let message = form.into_message();
    let outcome = state.engine().handle_incoming_message(&message).await;
    tracing::debug!(outcome = outcome.as_str(), "Webhook handled");
    metrics::counter!("sales_agent_webhook_total", "result" => "accepted").increment(1);
    StatusCode::OK
}

/// GET /health, plain liveness.
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /ready, dependency checks. Not ready until the store answers.
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let mut checks = serde_json::Map::new();
    let mut ready = true;

    let store_status = match state.stores.outbox.due(chrono::Utc::now(), 1).await {
        Ok(_) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "Store not reachable");
            ready = false;
            "unreachable"
        }
    };
    checks.insert(
        "store".to_string(),
        serde_json::json!({ "status": store_status }),
    );

    // A disabled classifier is a valid configuration, not an outage.
    let llm_status = if state.engine().classifier_enabled() {
        "configured"
    } else {
        "disabled"
    };
    checks.insert(
        "llm".to_string(),
        serde_json::json!({ "status": llm_status }),
    );

    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status_code,
        Json(serde_json::json!({
            "status": if ready { "ready" } else { "not_ready" },
            "checks": checks,
        })),
    )
}

/// POST /admin/config/reload
///
/// Re-reads settings and the business catalog from disk. Guarded by a
/// bearer token when one is configured.
async fn reload_config(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<serde_json::Value>) {
    let expected = state.settings.read().server.admin_token.clone();
    if let Some(token) = expected {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(token.as_str()) {
            let err = ServerError::Auth("missing or invalid bearer token".to_string());
            let message = err.to_string();
            return (
                err.into(),
                Json(serde_json::json!({ "status": "error", "message": message })),
            );
        }
    }

    match state.reload() {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "success",
                "message": "Configuration reloaded. Transport, persistence and rate-limit \
                            settings apply at next restart.",
            })),
        ),
        Err(e) => {
            tracing::error!("Config reload failed: {}", e);
            let message = e.to_string();
            (
                e.into(),
                Json(serde_json::json!({ "status": "error", "message": message })),
            )
        }
    }
}
