use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;

use super::{is_exempt, RATE_LIMIT_EXEMPT};
use crate::config::RateLimitConfig;
use crate::error::ApiError;
use crate::metrics::SecurityEventKind;
use crate::util::client_key;
use crate::AppState;

/// Checks between sweeps of idle clients.
const SWEEP_EVERY: u64 = 1024;

/// Per-client sliding window.  State lives in memory only; expired entries
/// are pruned on each check for that client, and every [`SWEEP_EVERY`]th
/// check drops clients whose window has fully drained.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    hits: DashMap<String, VecDeque<Instant>>,
    checks: AtomicU64,
}

impl RateLimiter {
    pub fn new(cfg: &RateLimitConfig) -> Self {
        Self {
            max_requests: cfg.max_requests,
            window: cfg.window,
            hits: DashMap::new(),
            checks: AtomicU64::new(0),
        }
    }

    pub fn admit(&self, key: &str) -> bool {
        self.admit_at(key, Instant::now())
    }

    /// Rejected attempts are not added to the window.
    pub fn admit_at(&self, key: &str, now: Instant) -> bool {
        if (self.checks.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
            self.drop_idle(now);
        }
        let admitted = {
            let mut entry = self.hits.entry(key.to_string()).or_default();
            let window = entry.value_mut();
            while let Some(oldest) = window.front() {
                if now.saturating_duration_since(*oldest) >= self.window {
                    window.pop_front();
                } else {
                    break;
                }
            }
            if window.len() >= self.max_requests {
                false
            } else {
                window.push_back(now);
                true
            }
        };
        if !admitted {
            self.hits.remove_if(key, |_, window| window.is_empty());
        }
        admitted
    }

    /// Forget clients with no admissions inside the window at `now`.
    pub fn drop_idle(&self, now: Instant) {
        self.hits.retain(|_, window| {
            window
                .back()
                .is_some_and(|newest| now.saturating_duration_since(*newest) < self.window)
        });
    }

    /// Number of clients with tracked state.
    pub fn tracked_clients(&self) -> usize {
        self.hits.len()
    }
}

pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if is_exempt(req.uri().path(), RATE_LIMIT_EXEMPT) {
        return next.run(req).await;
    }
    let client = client_key(&req, state.config.trust_forwarded_for);
    if !state.rate_limiter.admit(&client) {
        tracing::warn!(client = %client, "rate limit exceeded");
        state.metrics.record_event(
            SecurityEventKind::RateLimit,
            format!("IP {} blocked", client),
            Some(&client),
        );
        return ApiError::RateLimited.into_response();
    }
    next.run(req).await
}
