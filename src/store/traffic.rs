//! The single-row traffic summary. Only ever incremented.

use sqlx::SqlitePool;

use super::models::TrafficRow;
use super::Result;

/// Read the summary row, seeding it on first-ever boot.
pub async fn load_or_seed(pool: &SqlitePool, started_at: &str) -> Result<TrafficRow> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO traffic_metrics (id, total_requests, total_latency_ms, first_started_at)
        VALUES (1, 0, 0, ?)
        "#,
    )
    .bind(started_at)
    .execute(pool)
    .await?;

    let row = sqlx::query_as::<_, TrafficRow>(
        r#"
        SELECT total_requests, total_latency_ms, first_started_at
        FROM traffic_metrics
        WHERE id = 1
        "#,
    )
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Additive update; concurrent callers never overwrite each other.
pub async fn add_deltas(pool: &SqlitePool, requests: u64, latency_ms: f64) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE traffic_metrics
        SET total_requests = total_requests + ?,
            total_latency_ms = total_latency_ms + ?
        WHERE id = 1
        "#,
    )
    .bind(requests as i64)
    .bind(latency_ms)
    .execute(pool)
    .await?;
    Ok(())
}
