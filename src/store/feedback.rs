//! Feedback records.

use serde::Serialize;
use sqlx::SqlitePool;

use super::models::{Feedback, NewFeedback};
use super::{Result, StoreError};
use crate::util::now_timestamp;

/// Aggregates shown on the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedbackStats {
    pub total: i64,
    pub avg_rating: f64,
    pub unresolved: i64,
}

/// Record new feedback. Always stored unresolved.
pub async fn create_feedback(pool: &SqlitePool, new: &NewFeedback) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO feedback
            (session_id, user_name, user_email, user_phone, message, rating, is_resolved, created_at)
        VALUES (?, ?, ?, ?, ?, ?, 0, ?)
        "#,
    )
    .bind(&new.session_id)
    .bind(&new.user_name)
    .bind(&new.user_email)
    .bind(&new.user_phone)
    .bind(&new.message)
    .bind(new.rating)
    .bind(now_timestamp())
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// One page of feedback, newest first, plus the total matching count.
pub async fn list_feedback(
    pool: &SqlitePool,
    resolved: Option<bool>,
    page: i64,
    page_size: i64,
) -> Result<(Vec<Feedback>, i64)> {
    let offset = (page.max(1) - 1) * page_size;
    let items = sqlx::query_as::<_, Feedback>(
        r#"
        SELECT id, session_id, user_name, user_email, user_phone, message, rating,
               is_resolved, created_at
        FROM feedback
        WHERE (?1 IS NULL OR is_resolved = ?1)
        ORDER BY id DESC
        LIMIT ?2 OFFSET ?3
        "#,
    )
    .bind(resolved)
    .bind(page_size)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM feedback WHERE (?1 IS NULL OR is_resolved = ?1)
        "#,
    )
    .bind(resolved)
    .fetch_one(pool)
    .await?;

    Ok((items, total))
}

pub async fn resolve_feedback(pool: &SqlitePool, id: i64) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE feedback SET is_resolved = 1 WHERE id = ?
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound {
            entity: "Feedback",
            id: id.to_string(),
        });
    }
    Ok(())
}

pub async fn feedback_stats(pool: &SqlitePool) -> Result<FeedbackStats> {
    let (total, avg, unresolved): (i64, Option<f64>, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*),
               AVG(rating),
               COALESCE(SUM(CASE WHEN is_resolved = 0 THEN 1 ELSE 0 END), 0)
        FROM feedback
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(FeedbackStats {
        total,
        avg_rating: avg.map(|a| (a * 100.0).round() / 100.0).unwrap_or(0.0),
        unresolved,
    })
}
