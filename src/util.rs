//! Utility helpers for Mentorgate.
//!
//! Shared pattern compilation, client identification and timestamp
//! formatting used by the guards, the safety scanners and the store.

use ahash::AHasher;
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap, Request};
use chrono::{SecondsFormat, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::Arc;

/// Current UTC time as RFC 3339 with millisecond precision. Every stored
/// timestamp uses this format so lexicographic order equals time order.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A memoising wrapper around `AhoCorasick::new` to avoid recompiling
/// automata for repeated lists.  The cache key is a hash of the pattern list.
static AC_CACHE: Lazy<DashMap<u64, Arc<AhoCorasick>>> = Lazy::new(DashMap::new);

/// Given a list of literal patterns, return a shared case-insensitive
/// matcher with standard semantics, so overlapping iteration is available.
/// Returns `None` for an empty list or if the automaton cannot be built.
pub fn ac_for(list: &[String]) -> Option<Arc<AhoCorasick>> {
    if list.is_empty() {
        return None;
    }
    let mut hasher = AHasher::default();
    for pat in list {
        pat.hash(&mut hasher);
    }
    let key = hasher.finish();
    if let Some(existing) = AC_CACHE.get(&key) {
        return Some(existing.clone());
    }
    let lower: Vec<String> = list.iter().map(|p| p.to_lowercase()).collect();
    match AhoCorasickBuilder::new()
        .ascii_case_insensitive(true)
        .match_kind(MatchKind::Standard)
        .build(lower)
    {
        Ok(ac) => {
            let arc = Arc::new(ac);
            AC_CACHE.insert(key, arc.clone());
            Some(arc)
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to build pattern matcher");
            None
        }
    }
}

/// Identify the calling client.  With `trust_forwarded` the first
/// `X-Forwarded-For` hop (then `X-Real-IP`) wins; otherwise the peer address
/// is used.  Falls back to `"unknown"`.
pub fn client_key<B>(req: &Request<B>, trust_forwarded: bool) -> String {
    client_key_from_parts(req.headers(), req.extensions(), trust_forwarded)
}

/// [`client_key`] over already split request parts.
pub fn client_key_from_parts(
    headers: &HeaderMap,
    extensions: &Extensions,
    trust_forwarded: bool,
) -> String {
    if trust_forwarded {
        if let Some(forwarded) = forwarded_client(headers) {
            return forwarded;
        }
    }
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_client(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Path prefix match on segment boundaries: `/api/v1/admin` matches
/// `/api/v1/admin` and `/api/v1/admin/x`, not `/api/v1/administrator`.
pub fn path_has_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn prefix_respects_segments() {
        assert!(path_has_prefix("/api/v1/admin", "/api/v1/admin"));
        assert!(path_has_prefix("/api/v1/admin/dashboard", "/api/v1/admin"));
        assert!(!path_has_prefix("/api/v1/administrator", "/api/v1/admin"));
        assert!(!path_has_prefix("/health", "/api"));
    }

    #[test]
    fn forwarded_header_only_when_trusted() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_key(&req, true), "203.0.113.7");
        assert_eq!(client_key(&req, false), "unknown");
    }

    #[test]
    fn matcher_is_cached_and_case_insensitive() {
        let list = vec!["Ignore Previous Instructions".to_string()];
        let a = ac_for(&list).unwrap();
        let b = ac_for(&list).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_match("please IGNORE previous instructions now"));
        assert!(ac_for(&[]).is_none());
    }
}
