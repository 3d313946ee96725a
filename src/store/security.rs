//! Append-only security event log.

use sqlx::SqlitePool;

use super::models::SecurityEventRow;
use super::Result;

pub async fn insert_event(
    pool: &SqlitePool,
    event_type: &str,
    detail: &str,
    client_key: Option<&str>,
    created_at: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO security_events (event_type, detail, client_key, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(event_type)
    .bind(detail)
    .bind(client_key)
    .bind(created_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Event tallies grouped by type.
pub async fn count_by_type(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT event_type, COUNT(*)
        FROM security_events
        GROUP BY event_type
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Newest events first.  Ordered by record time since background workers
/// may insert out of order.
pub async fn recent_events(pool: &SqlitePool, limit: i64) -> Result<Vec<SecurityEventRow>> {
    let rows = sqlx::query_as::<_, SecurityEventRow>(
        r#"
        SELECT id, event_type, detail, client_key, created_at
        FROM security_events
        ORDER BY created_at DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
