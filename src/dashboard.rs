//! Read-only admin snapshot assembled from the metrics store, the entity
//! store and a live host sample.

use chrono::{Duration, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::metrics::{MetricsStore, SecurityEventKind};
use crate::store::{self, feedback, sessions};
use crate::system::{SystemSample, SystemSampler};

/// Entries of the recent-activity log shown on the dashboard.
pub const DASHBOARD_RECENT_LOGS: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct TrafficSection {
    pub total_requests: u64,
    pub active_sessions_24h: i64,
    pub average_latency_ms: f64,
    pub uptime_seconds: i64,
    pub first_started_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecuritySection {
    pub total_blocks: u64,
    pub rate_limit_hits: u64,
    pub prompt_injection_attempts: u64,
    pub sqli_attempts: u64,
    pub banned_topic_hits: u64,
    pub system_warnings: u64,
    pub system_errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemSection {
    #[serde(flatten)]
    pub host: SystemSample,
    pub db_connection_status: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BusinessSection {
    pub total_feedback: i64,
    pub avg_rating: f64,
    pub unresolved_feedback: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub timestamp: String,
    pub traffic: TrafficSection,
    pub security: SecuritySection,
    pub system: SystemSection,
    pub business: BusinessSection,
    pub recent_security_logs: Vec<String>,
}

pub async fn build_snapshot(
    pool: &SqlitePool,
    metrics: &MetricsStore,
    sampler: &dyn SystemSampler,
) -> store::Result<DashboardSnapshot> {
    let db_connection_status = sqlx::query("SELECT 1").execute(pool).await.is_ok();
    let since = (Utc::now() - Duration::hours(24)).to_rfc3339_opts(SecondsFormat::Millis, true);
    let active_sessions_24h = sessions::count_sessions_since(pool, &since).await?;
    let stats = feedback::feedback_stats(pool).await?;
    let host = sampler.sample().await;

    let traffic = metrics.traffic();
    Ok(DashboardSnapshot {
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        traffic: TrafficSection {
            total_requests: traffic.total_requests,
            active_sessions_24h,
            average_latency_ms: traffic.average_latency_ms,
            uptime_seconds: traffic.uptime_seconds,
            first_started_at: traffic.first_started_at,
        },
        security: SecuritySection {
            total_blocks: metrics.total_blocks(),
            rate_limit_hits: metrics.security_count(SecurityEventKind::RateLimit),
            prompt_injection_attempts: metrics.security_count(SecurityEventKind::PromptInjection),
            sqli_attempts: metrics.security_count(SecurityEventKind::SqlPattern),
            banned_topic_hits: metrics.security_count(SecurityEventKind::BannedTopic),
            system_warnings: metrics.security_count(SecurityEventKind::SystemWarning),
            system_errors: metrics.security_count(SecurityEventKind::SystemError),
        },
        system: SystemSection {
            host,
            db_connection_status,
        },
        business: BusinessSection {
            total_feedback: stats.total,
            avg_rating: stats.avg_rating,
            unresolved_feedback: stats.unresolved,
        },
        recent_security_logs: metrics.recent(DASHBOARD_RECENT_LOGS),
    })
}
