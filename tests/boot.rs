#[path = "common/mod.rs"]
mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{empty_request, json_request, spawn, EnvGuard};
use http_body_util::BodyExt;
use mentorgate::{app, build_state_from_env, AppConfig};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::ServiceExt;

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

const OPTIONAL_VARS: &[&str] = &[
    "SAFETY_SCANNER_URL",
    "MAX_REQUEST_BYTES",
    "SUPER_ADMIN_EMAIL",
    "LOG_MAX_BYTES",
    "LOG_ROTATE_COMPRESS",
    "LOG_STDOUT",
    "LOG_SAMPLE_N",
];

#[tokio::test]
async fn boot_requires_a_signing_secret() {
    let _lock = ENV_MUTEX.lock().await;
    let mut env = EnvGuard::new();
    env.remove("JWT_SECRET_KEY");
    let err = AppConfig::from_env().unwrap_err();
    assert!(err.to_string().contains("JWT_SECRET_KEY"));
}

#[tokio::test]
async fn boots_from_environment_and_mirrors_events() {
    let _lock = ENV_MUTEX.lock().await;
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("boot.db");
    let log_path = dir.path().join("events.jsonl");
    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let mut env = EnvGuard::new();
    for var in OPTIONAL_VARS {
        env.remove(var);
    }
    env.set_many(&[
        ("JWT_SECRET_KEY", "boot-secret"),
        ("DATABASE_URL", db_url.as_str()),
        ("LOG_FILE", log_path.to_str().unwrap()),
        ("TRUST_FORWARDED_FOR", "true"),
        ("RATE_LIMIT_MAX", "1"),
    ]);

    let state = build_state_from_env().await.unwrap();
    let router = app(state.clone());

    // first request reaches the handler, second is rejected by the limiter
    let body = json!({"message": "hello"});
    let resp = router
        .clone()
        .oneshot(json_request("POST", "/api/v1/chat", "192.0.2.50", None, &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let resp = router
        .clone()
        .oneshot(json_request("POST", "/api/v1/chat", "192.0.2.50", None, &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    let resp = router
        .clone()
        .oneshot(empty_request("GET", "/health/ready", "192.0.2.50", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    state.metrics.shutdown().await;

    let contents = std::fs::read_to_string(&log_path).unwrap();
    let lines: Vec<Value> = contents
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["kind"], "RATE_LIMIT");
    assert_eq!(lines[0]["client"], "192.0.2.50");
    assert_eq!(lines[0]["detail"], "IP 192.0.2.50 blocked");
    assert_eq!(state.metrics.sink().lines_total(), 1);

    assert!(db_path.exists());
    state.db.close().await;
}

#[tokio::test]
async fn metrics_endpoint_exposes_counters() {
    let app = spawn().await;
    app.post("/api/v1/other", "192.0.2.60", &json!({"q": "1; DROP TABLE x"}))
        .await;

    let resp = app
        .router
        .clone()
        .oneshot(empty_request("GET", "/metrics", "192.0.2.60", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/plain; version=0.0.4"
    );
    let text = String::from_utf8(resp.into_body().collect().await.unwrap().to_bytes().to_vec())
        .unwrap();
    assert!(text.contains("mentorgate_requests_total 1\n"), "{}", text);
    assert!(text.contains("mentorgate_security_events_total{kind=\"SQLI\"} 1\n"));
    assert!(text.contains("mentorgate_security_events_total{kind=\"RATE_LIMIT\"} 0\n"));
    assert!(text.contains("mentorgate_blocks_total 1\n"));
    assert!(text.contains("# TYPE mentorgate_persist_queue_dropped_total counter"));
}

#[tokio::test]
async fn cors_allows_configured_origins_only() {
    let app = spawn().await;
    let preflight = |origin: &str| {
        Request::builder()
            .method("OPTIONS")
            .uri("/api/v1/chat")
            .header("origin", origin)
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "content-type")
            .body(Body::empty())
            .unwrap()
    };

    let resp = app
        .router
        .clone()
        .oneshot(preflight("http://localhost:3000"))
        .await
        .unwrap();
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "http://localhost:3000"
    );
    assert_eq!(
        resp.headers().get("access-control-allow-credentials").unwrap(),
        "true"
    );

    let resp = app
        .router
        .clone()
        .oneshot(preflight("https://evil.example"))
        .await
        .unwrap();
    assert!(resp.headers().get("access-control-allow-origin").is_none());
}
