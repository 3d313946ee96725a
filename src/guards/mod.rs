//! Request guards, applied as axum middleware.
//!
//! Order from the outside in: [`monitor`] times and counts every request,
//! [`rate_limit`] applies per-client admission, [`sanitize`] screens
//! POST/PUT bodies.  Each guard skips the path prefixes listed here.

pub mod monitor;
pub mod rate_limit;
pub mod sanitize;

pub use monitor::monitor;
pub use rate_limit::{rate_limit, RateLimiter};
pub use sanitize::{sanitize, PayloadSanitizer, SanitizeVerdict};

use crate::util::path_has_prefix;

/// Probes and the admin surface bypass the rate limiter.
pub const RATE_LIMIT_EXEMPT: &[&str] = &["/health", "/metrics", "/api/v1/admin"];

/// The SQL console sends SQL on purpose; chat and feedback carry natural
/// language and are screened by the safety gate instead.
pub const SANITIZE_EXEMPT: &[&str] = &[
    "/health",
    "/metrics",
    "/api/v1/admin",
    "/api/v1/chat",
    "/api/v1/feedback",
];

pub(crate) fn is_exempt(path: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|p| path_has_prefix(path, p))
}
