//! Core library for Mentorgate.  This module wires the admission guards,
//! the chat orchestrator, the admin console and their shared state into an
//! axum router.

pub mod auth;
pub mod botcheck;
pub mod config;
pub mod dashboard;
pub mod engine;
pub mod error;
pub mod guards;
pub mod metrics;
pub mod orchestrator;
pub mod routes;
pub mod safety;
pub mod store;
pub mod system;
pub mod telemetry;
pub mod util;

pub use config::AppConfig;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::http::HeaderValue;
use axum::middleware::from_fn_with_state;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthService, GoogleIdentityVerifier, IdentityVerifier};
use crate::botcheck::{BotCheck, TurnstileVerifier};
use crate::engine::{ChatEngine, HttpChatEngine};
use crate::guards::{PayloadSanitizer, RateLimiter};
use crate::metrics::MetricsStore;
use crate::orchestrator::Orchestrator;
use crate::safety::heuristic::HeuristicScanner;
use crate::safety::remote::RemoteScanner;
use crate::safety::{SafetyGate, SafetyScanner};
use crate::store::Database;
use crate::system::{SysinfoSampler, SystemSampler};
use crate::telemetry::EventSink;

const SAFETY_SCANNER_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state.  Cloned into every handler and guard.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Database,
    pub metrics: MetricsStore,
    pub rate_limiter: Arc<RateLimiter>,
    pub sanitizer: Arc<PayloadSanitizer>,
    pub safety: SafetyGate,
    pub orchestrator: Arc<Orchestrator>,
    pub auth: Arc<AuthService>,
    pub bot_check: Arc<dyn BotCheck>,
    pub sampler: Arc<dyn SystemSampler>,
    pub process_start: Instant,
}

/// The external parties the gateway talks to.  Tests substitute fakes.
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn ChatEngine>,
    pub scanner: Arc<dyn SafetyScanner>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub bot_check: Arc<dyn BotCheck>,
    pub sampler: Arc<dyn SystemSampler>,
}

impl Collaborators {
    /// Real network and OS collaborators for `config`.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let engine = HttpChatEngine::new(&config.engine).context("building chat engine client")?;
        let scanner: Arc<dyn SafetyScanner> = match config.safety_scanner_url.as_deref() {
            Some(url) => {
                tracing::info!(url = %url, fail_open = config.safety_scanner_fail_open, "using remote safety scanner");
                Arc::new(
                    RemoteScanner::new(
                        url,
                        config.banned_topics.clone(),
                        config.safety_scanner_fail_open,
                        SAFETY_SCANNER_TIMEOUT,
                    )
                    .context("building safety scanner client")?,
                )
            }
            None => {
                tracing::info!("SAFETY_SCANNER_URL not set; using heuristic safety scanner");
                Arc::new(HeuristicScanner::new(&config.banned_topics))
            }
        };
        let identity = GoogleIdentityVerifier::new(config.auth.google_client_id.clone())
            .context("building identity verifier client")?;
        let bot_check = TurnstileVerifier::new(config.turnstile_secret.clone())
            .context("building bot-check client")?;
        Ok(Self {
            engine: Arc::new(engine),
            scanner,
            identity: Arc::new(identity),
            bot_check: Arc::new(bot_check),
            sampler: Arc::new(SysinfoSampler::new()),
        })
    }
}

/// Assemble state over an already migrated database.  Hydrates the metrics
/// store and starts its background workers.
pub async fn build_state(
    config: AppConfig,
    db: Database,
    collaborators: Collaborators,
) -> anyhow::Result<AppState> {
    let sink = EventSink::from_path(
        config.log_file.as_deref(),
        &config.rotation,
        config.log_stdout,
        config.log_sample_n,
    );
    let metrics = MetricsStore::hydrate(db.pool().clone(), sink, &config.persist)
        .await
        .context("hydrating metrics store")?;

    let orchestrator = Orchestrator::new(
        db.pool().clone(),
        collaborators.engine,
        metrics.clone(),
        &config.engine,
    );
    let auth = AuthService::new(&config.auth, collaborators.identity);

    Ok(AppState {
        rate_limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
        sanitizer: Arc::new(PayloadSanitizer::new(config.max_payload_bytes)),
        safety: SafetyGate::new(collaborators.scanner, metrics.clone()),
        orchestrator: Arc::new(orchestrator),
        auth: Arc::new(auth),
        bot_check: collaborators.bot_check,
        sampler: collaborators.sampler,
        process_start: Instant::now(),
        config: Arc::new(config),
        db,
        metrics,
    })
}

/// Build state from environment variables (see [`AppConfig::from_env`]).
pub async fn build_state_from_env() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env()?;
    let db = Database::connect_with_pool_size(&config.database_url, config.database_pool_size)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))?;
    db.migrate().await.context("running migrations")?;
    let collaborators = Collaborators::from_config(&config)?;
    build_state(config, db, collaborators).await
}

fn handle_panic(_: Box<dyn std::any::Any + Send + 'static>) -> axum::response::Response {
    error::panic_response()
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(origin = %o, error = %e, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Build the axum router with the guard chain.  Outermost first: trace,
/// CORS, monitor, rate limiter, sanitizer, panic catcher, handlers.
pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.config.max_request_bytes;
    let cors = cors_layer(&state.config.cors_origins);

    let router = routes::router().layer(CatchPanicLayer::custom(handle_panic));
    let router = match max_request_bytes {
        Some(limit) => router.layer(RequestBodyLimitLayer::new(limit)),
        None => router,
    };

    router
        .layer(from_fn_with_state(state.clone(), guards::sanitize))
        .layer(from_fn_with_state(state.clone(), guards::rate_limit))
        .layer(from_fn_with_state(state.clone(), guards::monitor))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
