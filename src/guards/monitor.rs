use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::FailureCause;
use crate::metrics::SecurityEventKind;
use crate::util::client_key;
use crate::AppState;

/// Outermost guard: counts every request with its latency, including ones
/// rejected further in, and records the cause of any generic 503 as a
/// system-error event.
pub async fn monitor(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let client = client_key(&req, state.config.trust_forwarded_for);
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    state.metrics.record_request(latency_ms);

    if let Some(FailureCause(cause)) = response.extensions().get::<FailureCause>() {
        tracing::error!(client = %client, %method, path = %path, error = %cause, "request failed");
        state
            .metrics
            .record_event(SecurityEventKind::SystemError, cause.clone(), Some(&client));
    } else {
        tracing::debug!(
            client = %client,
            %method,
            path = %path,
            status = response.status().as_u16(),
            latency_ms,
            "request complete"
        );
    }
    response
}
