//! HTTP handlers: probes and metrics here, the chat/feedback surface in
//! [`public`], the role-gated console in [`admin`].

pub mod admin;
pub mod public;

use std::convert::Infallible;
use std::fmt::Write as _;

use axum::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::error::ApiError;
use crate::metrics::SecurityEventKind;
use crate::util::client_key_from_parts;
use crate::AppState;

pub const SERVICE_NAME: &str = "mentorgate";

/// Identity of the calling client, derived the same way the guards do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey(pub String);

#[async_trait]
impl FromRequestParts<AppState> for ClientKey {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(ClientKey(client_key_from_parts(
            &parts.headers,
            &parts.extensions,
            state.config.trust_forwarded_for,
        )))
    }
}

/// All routes, without middleware.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
        .route("/metrics", get(metrics_handler))
        .route("/api/v1/chat", post(public::chat))
        .route("/api/v1/chat/:session_id", get(public::transcript))
        .route("/api/v1/feedback", post(public::submit_feedback))
        .route("/api/v1/admin/auth/login", post(admin::login))
        .route("/api/v1/admin/me", get(admin::me))
        .route("/api/v1/admin/dashboard", get(admin::dashboard))
        .route("/api/v1/admin/feedback", get(admin::list_feedback))
        .route("/api/v1/admin/feedback/resolve", post(admin::resolve_feedback))
        .route("/api/v1/admin/users/list", get(admin::list_users))
        .route("/api/v1/admin/users/add", post(admin::add_user))
        .route("/api/v1/admin/users/:id/revoke", post(admin::revoke_user))
        .route("/api/v1/admin/db/query", post(admin::db_query))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "service": SERVICE_NAME }))
}

async fn ready(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .db
        .ping()
        .await
        .map_err(|e| ApiError::unavailable(format!("readiness probe: {}", e)))?;
    Ok(Json(json!({ "status": "ready" })))
}

/// Prometheus text exposition.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let mut buf = String::new();
    let traffic = state.metrics.traffic();
    let sink = state.metrics.sink();

    writeln!(&mut buf, "# HELP mentorgate_requests_total Requests seen by the monitor since first boot").ok();
    writeln!(&mut buf, "# TYPE mentorgate_requests_total counter").ok();
    writeln!(&mut buf, "mentorgate_requests_total {}", traffic.total_requests).ok();
    writeln!(&mut buf, "# HELP mentorgate_request_latency_ms_sum Summed request latency in milliseconds").ok();
    writeln!(&mut buf, "# TYPE mentorgate_request_latency_ms_sum counter").ok();
    writeln!(&mut buf, "mentorgate_request_latency_ms_sum {}", state.metrics.total_latency_ms()).ok();
    writeln!(&mut buf, "# HELP mentorgate_request_latency_ms_avg Mean request latency in milliseconds").ok();
    writeln!(&mut buf, "# TYPE mentorgate_request_latency_ms_avg gauge").ok();
    writeln!(&mut buf, "mentorgate_request_latency_ms_avg {}", traffic.average_latency_ms).ok();

    writeln!(&mut buf, "# HELP mentorgate_security_events_total Security events by kind").ok();
    writeln!(&mut buf, "# TYPE mentorgate_security_events_total counter").ok();
    for kind in SecurityEventKind::ALL {
        writeln!(
            &mut buf,
            "mentorgate_security_events_total{{kind=\"{}\"}} {}",
            kind.as_str(),
            state.metrics.security_count(kind)
        )
        .ok();
    }
    writeln!(&mut buf, "# HELP mentorgate_blocks_total Requests rejected by admission control").ok();
    writeln!(&mut buf, "# TYPE mentorgate_blocks_total counter").ok();
    writeln!(&mut buf, "mentorgate_blocks_total {}", state.metrics.total_blocks()).ok();

    writeln!(&mut buf, "# HELP mentorgate_rate_limit_tracked_clients Clients with rate-limit state").ok();
    writeln!(&mut buf, "# TYPE mentorgate_rate_limit_tracked_clients gauge").ok();
    writeln!(&mut buf, "mentorgate_rate_limit_tracked_clients {}", state.rate_limiter.tracked_clients()).ok();

    writeln!(&mut buf, "# HELP mentorgate_persist_queue_depth Pending background persistence jobs").ok();
    writeln!(&mut buf, "# TYPE mentorgate_persist_queue_depth gauge").ok();
    writeln!(&mut buf, "mentorgate_persist_queue_depth {}", state.metrics.queue_depth()).ok();
    writeln!(&mut buf, "# HELP mentorgate_persist_queue_dropped_total Persistence jobs dropped on a full queue").ok();
    writeln!(&mut buf, "# TYPE mentorgate_persist_queue_dropped_total counter").ok();
    writeln!(&mut buf, "mentorgate_persist_queue_dropped_total {}", state.metrics.queue_dropped()).ok();

    writeln!(&mut buf, "# HELP mentorgate_telemetry_lines_total Security-event JSON lines written").ok();
    writeln!(&mut buf, "# TYPE mentorgate_telemetry_lines_total counter").ok();
    writeln!(&mut buf, "mentorgate_telemetry_lines_total {}", sink.lines_total()).ok();
    writeln!(&mut buf, "# HELP mentorgate_telemetry_write_errors_total Security-event JSON line write failures").ok();
    writeln!(&mut buf, "# TYPE mentorgate_telemetry_write_errors_total counter").ok();
    writeln!(&mut buf, "mentorgate_telemetry_write_errors_total {}", sink.write_errors_total()).ok();

    writeln!(&mut buf, "# HELP mentorgate_uptime_seconds Seconds since the first recorded boot").ok();
    writeln!(&mut buf, "# TYPE mentorgate_uptime_seconds gauge").ok();
    writeln!(&mut buf, "mentorgate_uptime_seconds {}", traffic.uptime_seconds).ok();
    writeln!(&mut buf, "# HELP mentorgate_process_uptime_seconds Process uptime seconds").ok();
    writeln!(&mut buf, "# TYPE mentorgate_process_uptime_seconds gauge").ok();
    writeln!(
        &mut buf,
        "mentorgate_process_uptime_seconds {}",
        state.process_start.elapsed().as_secs_f64()
    )
    .ok();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buf,
    )
        .into_response()
}
