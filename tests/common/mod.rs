#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use mentorgate::auth::{AuthError, IdentityVerifier, VerifiedIdentity};
use mentorgate::botcheck::BotCheck;
use mentorgate::config::{
    AppConfig, AuthConfig, EngineConfig, PersistConfig, RateLimitConfig, RotationConfig,
};
use mentorgate::engine::{ChatEngine, EngineError};
use mentorgate::safety::heuristic::HeuristicScanner;
use mentorgate::store::Database;
use mentorgate::system::{SystemSample, SystemSampler};
use mentorgate::{app, build_state, AppState, Collaborators};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

pub const SUPER_ADMIN: &str = "root@mentorgate.test";
pub const HUMAN_TOKEN: &str = "human";

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// Replies `reply N` and records every payload it was asked.
#[derive(Default)]
pub struct ScriptedEngine {
    pub calls: AtomicUsize,
    pub payloads: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl ChatEngine for ScriptedEngine {
    async fn ask(&self, payload: &str) -> Result<String, EngineError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.payloads.lock().unwrap().push(payload.to_string());
        Ok(format!("reply {}", n))
    }
}

/// Accepts `id:<email>` tokens, with a fixed display name.
pub struct TokenIdentity;

#[async_trait::async_trait]
impl IdentityVerifier for TokenIdentity {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        match token.strip_prefix("id:") {
            Some(email) => Ok(VerifiedIdentity {
                email: email.to_string(),
                name: Some("Test User".into()),
                picture: Some("https://example.test/avatar.png".into()),
            }),
            None => Err(AuthError::Identity("unknown token".into())),
        }
    }
}

pub struct FixedBotCheck;

#[async_trait::async_trait]
impl BotCheck for FixedBotCheck {
    async fn verify(&self, token: &str, _client: Option<&str>) -> bool {
        token == HUMAN_TOKEN
    }
}

pub struct FixedSampler;

#[async_trait::async_trait]
impl SystemSampler for FixedSampler {
    async fn sample(&self) -> SystemSample {
        SystemSample {
            cpu_usage_percent: 7.0,
            ram_usage_percent: 42.0,
            ..SystemSample::default()
        }
    }
}

/// Configuration for tests: loose rate limit, forwarded-for trusted so each
/// test can pick its client, a 1 ms retry cooldown.
pub fn test_config(database_url: &str) -> AppConfig {
    AppConfig {
        port: 0,
        database_url: database_url.to_string(),
        database_pool_size: 5,
        auth: AuthConfig {
            jwt_secret: "test-secret".into(),
            token_ttl_minutes: 60,
            super_admin_email: Some(SUPER_ADMIN.into()),
            google_client_id: Some("client-id".into()),
        },
        turnstile_secret: None,
        engine: EngineConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout: Duration::from_secs(2),
            retry_cooldown: Duration::from_millis(1),
            history_messages: 3,
            history_char_budget: 2000,
        },
        rate_limit: RateLimitConfig {
            max_requests: 1000,
            window: Duration::from_secs(60),
        },
        max_payload_bytes: 10_000,
        max_request_bytes: None,
        trust_forwarded_for: true,
        persist: PersistConfig {
            flush_every: 50,
            flush_interval: Duration::from_secs(3600),
            queue_capacity: 1024,
            workers: 2,
        },
        safety_scanner_url: None,
        safety_scanner_fail_open: true,
        banned_topics: vec![
            "politics".into(),
            "crypto".into(),
            "nsfw".into(),
            "gambling".into(),
        ],
        cors_origins: vec!["http://localhost:3000".into()],
        log_file: None,
        rotation: RotationConfig {
            max_bytes: None,
            keep: 1,
            compress: false,
        },
        log_stdout: false,
        log_sample_n: None,
    }
}

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub engine: Arc<ScriptedEngine>,
    pub database_url: String,
    _dir: TempDir,
}

/// Fake network and OS collaborators around `engine`.
pub fn fake_collaborators(config: &AppConfig, engine: Arc<dyn ChatEngine>) -> Collaborators {
    Collaborators {
        engine,
        scanner: Arc::new(HeuristicScanner::new(&config.banned_topics)),
        identity: Arc::new(TokenIdentity),
        bot_check: Arc::new(FixedBotCheck),
        sampler: Arc::new(FixedSampler),
    }
}

pub async fn spawn_with(
    tweak: impl FnOnce(&mut AppConfig),
    engine: Option<Arc<dyn ChatEngine>>,
) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("test.db").display());
    let mut config = test_config(&url);
    tweak(&mut config);

    let db = Database::connect_with_pool_size(&config.database_url, config.database_pool_size)
        .await
        .unwrap();
    db.migrate().await.unwrap();

    let scripted = Arc::new(ScriptedEngine::default());
    let engine: Arc<dyn ChatEngine> = match engine {
        Some(engine) => engine,
        None => scripted.clone(),
    };
    let collaborators = fake_collaborators(&config, engine);
    let state = build_state(config, db, collaborators).await.unwrap();
    TestApp {
        router: app(state.clone()),
        state,
        engine: scripted,
        database_url: url,
        _dir: dir,
    }
}

pub async fn spawn() -> TestApp {
    spawn_with(|_| {}, None).await
}

impl TestApp {
    pub async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, body)
    }

    pub async fn post(&self, uri: &str, client: &str, body: &Value) -> (StatusCode, Value) {
        self.send(json_request("POST", uri, client, None, body)).await
    }

    pub async fn get(&self, uri: &str, client: &str) -> (StatusCode, Value) {
        self.send(empty_request("GET", uri, client, None)).await
    }

    pub async fn admin_post(&self, uri: &str, token: &str, body: &Value) -> (StatusCode, Value) {
        self.send(json_request("POST", uri, "10.0.0.1", Some(token), body))
            .await
    }

    pub async fn admin_get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.send(empty_request("GET", uri, "10.0.0.1", Some(token)))
            .await
    }

    /// Bearer credential for `email` without going through login.
    pub fn token_for(&self, email: &str) -> String {
        self.state.auth.signer().issue(email).unwrap()
    }

    pub async fn seed_admin(&self, email: &str, role: &str) -> i64 {
        mentorgate::store::admins::create_admin(self.state.db.pool(), email, role)
            .await
            .unwrap()
            .id
    }
}

pub fn json_request(
    method: &str,
    uri: &str,
    client: &str,
    bearer: Option<&str>,
    body: &Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-forwarded-for", client);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

pub fn empty_request(method: &str, uri: &str, client: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", client);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

/// Waits until background persistence has drained.
pub async fn settle(app: &TestApp) {
    for _ in 0..200 {
        if app.state.metrics.queue_depth() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}
