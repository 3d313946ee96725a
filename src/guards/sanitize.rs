use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use once_cell::sync::Lazy;
use regex::RegexSet;

use super::{is_exempt, SANITIZE_EXEMPT};
use crate::error::ApiError;
use crate::metrics::SecurityEventKind;
use crate::util::client_key;
use crate::AppState;

/// Keyword set, comment/terminator markers, quoted tautology.
static SQL_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\b(SELECT|INSERT|UPDATE|DELETE|DROP|ALTER|CREATE|EXEC|UNION)\b",
        r"--|;|/\*|\*/",
        r"(?i)'\s*(OR|AND)\s*'",
    ])
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanitizeVerdict {
    Clean,
    Oversized,
    PatternMatch,
}

/// Coarse body screen.  False negatives are expected; exempt paths never
/// reach it.
#[derive(Debug, Clone)]
pub struct PayloadSanitizer {
    max_bytes: usize,
}

impl PayloadSanitizer {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn inspect(&self, body: &[u8]) -> SanitizeVerdict {
        if body.len() > self.max_bytes {
            return SanitizeVerdict::Oversized;
        }
        let text = String::from_utf8_lossy(body);
        if SQL_PATTERNS.is_match(&text) {
            SanitizeVerdict::PatternMatch
        } else {
            SanitizeVerdict::Clean
        }
    }
}

pub async fn sanitize(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let screened = matches!(*req.method(), Method::POST | Method::PUT);
    if !screened || is_exempt(req.uri().path(), SANITIZE_EXEMPT) {
        return next.run(req).await;
    }
    let client = client_key(&req, state.config.trust_forwarded_for);
    let (parts, body) = req.into_parts();

    // Reading at most max_bytes; anything longer fails the read.
    let verdict_and_bytes = match axum::body::to_bytes(body, state.sanitizer.max_bytes()).await {
        Ok(bytes) => (state.sanitizer.inspect(&bytes), Some(bytes)),
        Err(e) => {
            tracing::debug!(client = %client, error = %e, "body read failed or exceeded limit");
            (SanitizeVerdict::Oversized, None)
        }
    };

    match verdict_and_bytes {
        (SanitizeVerdict::Clean, Some(bytes)) => {
            next.run(Request::from_parts(parts, Body::from(bytes))).await
        }
        (SanitizeVerdict::PatternMatch, _) => {
            tracing::warn!(client = %client, path = %parts.uri.path(), "suspicious payload rejected");
            state.metrics.record_event(
                SecurityEventKind::SqlPattern,
                format!("Pattern matched from {}", client),
                Some(&client),
            );
            ApiError::SuspiciousPayload.into_response()
        }
        _ => {
            tracing::warn!(client = %client, path = %parts.uri.path(), "oversized payload rejected");
            state.metrics.record_event(
                SecurityEventKind::SqlPattern,
                format!("Oversized payload from {}", client),
                Some(&client),
            );
            ApiError::PayloadTooLarge.into_response()
        }
    }
}
