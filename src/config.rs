use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub max_bytes: Option<u64>,
    pub keep: usize,
    pub compress: bool,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub retry_cooldown: Duration,
    pub history_messages: usize,
    pub history_char_budget: usize,
}

#[derive(Debug, Clone)]
pub struct PersistConfig {
    pub flush_every: u64,
    pub flush_interval: Duration,
    pub queue_capacity: usize,
    pub workers: usize,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_minutes: i64,
    pub super_admin_email: Option<String>,
    pub google_client_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub database_pool_size: u32,
    pub auth: AuthConfig,
    pub turnstile_secret: Option<String>,
    pub engine: EngineConfig,
    pub rate_limit: RateLimitConfig,
    pub max_payload_bytes: usize,
    pub max_request_bytes: Option<usize>,
    pub trust_forwarded_for: bool,
    pub persist: PersistConfig,
    pub safety_scanner_url: Option<String>,
    pub safety_scanner_fail_open: bool,
    pub banned_topics: Vec<String>,
    pub cors_origins: Vec<String>,
    pub log_file: Option<String>,
    pub rotation: RotationConfig,
    pub log_stdout: bool,
    pub log_sample_n: Option<u64>,
}

pub const DEFAULT_DATABASE_URL: &str = "sqlite:mentorgate.db?mode=rwc";
pub const DEFAULT_ENGINE_URL: &str = "http://172.17.0.1:8000";
pub const DEFAULT_BANNED_TOPICS: &str = "politics,crypto,nsfw,gambling";
pub const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,http://127.0.0.1:3000";

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let jwt_secret = non_empty_var("JWT_SECRET_KEY")
            .ok_or_else(|| anyhow!("JWT_SECRET_KEY must be set"))?;

        let port = parse_optional_u64("PORT")?.unwrap_or(8080);
        let port = u16::try_from(port).map_err(|_| anyhow!("PORT must fit in 16 bits"))?;

        let auth = AuthConfig {
            jwt_secret,
            token_ttl_minutes: parse_optional_u64("ACCESS_TOKEN_EXPIRE_MINUTES")?.unwrap_or(1440)
                as i64,
            super_admin_email: non_empty_var("SUPER_ADMIN_EMAIL").map(|e| e.to_lowercase()),
            google_client_id: non_empty_var("GOOGLE_CLIENT_ID"),
        };

        let engine = EngineConfig {
            base_url: non_empty_var("CHAT_ENGINE_URL")
                .unwrap_or_else(|| DEFAULT_ENGINE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout: Duration::from_secs(
                parse_optional_u64("CHAT_ENGINE_TIMEOUT_SECS")?.unwrap_or(45),
            ),
            retry_cooldown: Duration::from_millis(
                parse_optional_u64("CHAT_ENGINE_RETRY_COOLDOWN_MS")?.unwrap_or(500),
            ),
            history_messages: parse_optional_u64("HISTORY_MESSAGES")?.unwrap_or(3) as usize,
            history_char_budget: parse_optional_u64("HISTORY_CHAR_BUDGET")?.unwrap_or(2000)
                as usize,
        };

        let rate_limit = RateLimitConfig {
            max_requests: parse_optional_u64("RATE_LIMIT_MAX")?.unwrap_or(10) as usize,
            window: Duration::from_secs(parse_optional_u64("RATE_LIMIT_WINDOW_SECS")?.unwrap_or(60)),
        };

        let persist = PersistConfig {
            flush_every: parse_optional_u64("METRICS_FLUSH_EVERY")?
                .unwrap_or(50)
                .max(1),
            flush_interval: Duration::from_secs(
                parse_optional_u64("METRICS_FLUSH_INTERVAL_SECS")?
                    .unwrap_or(60)
                    .max(1),
            ),
            queue_capacity: parse_optional_u64("PERSIST_QUEUE_CAPACITY")?
                .unwrap_or(1024)
                .max(1) as usize,
            workers: parse_optional_u64("PERSIST_WORKERS")?.unwrap_or(2).max(1) as usize,
        };

        let rotation = RotationConfig {
            max_bytes: parse_optional_u64("LOG_MAX_BYTES")?,
            keep: parse_optional_u64("LOG_ROTATE_KEEP")?.unwrap_or(1) as usize,
            compress: parse_bool_env("LOG_ROTATE_COMPRESS")?.unwrap_or(false),
        };

        Ok(Self {
            port,
            database_url: non_empty_var("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            database_pool_size: parse_optional_u64("DATABASE_POOL_SIZE")?
                .unwrap_or(10)
                .max(1) as u32,
            auth,
            turnstile_secret: non_empty_var("TURNSTILE_SECRET_KEY"),
            engine,
            rate_limit,
            max_payload_bytes: parse_optional_u64("MAX_PAYLOAD_BYTES")?.unwrap_or(10_000) as usize,
            max_request_bytes: parse_optional_u64("MAX_REQUEST_BYTES")?.map(|v| v as usize),
            trust_forwarded_for: parse_bool_env("TRUST_FORWARDED_FOR")?.unwrap_or(false),
            persist,
            safety_scanner_url: non_empty_var("SAFETY_SCANNER_URL"),
            safety_scanner_fail_open: parse_bool_env("SAFETY_SCANNER_FAIL_OPEN")?.unwrap_or(true),
            banned_topics: parse_list("BANNED_TOPICS", DEFAULT_BANNED_TOPICS),
            cors_origins: parse_list("CORS_ORIGINS", DEFAULT_CORS_ORIGINS),
            log_file: non_empty_var("LOG_FILE"),
            rotation,
            log_stdout: parse_bool_env("LOG_STDOUT")?.unwrap_or(false),
            log_sample_n: parse_optional_u64("LOG_SAMPLE_N")?.filter(|n| *n > 1),
        })
    }
}

fn non_empty_var(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_list(var: &str, default: &str) -> Vec<String> {
    let raw = env::var(var).unwrap_or_else(|_| default.to_string());
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
