//! Sessions and their messages.

use sqlx::SqlitePool;

use super::models::{ChatMessage, ChatSession};
use super::{Result, StoreError};
use crate::util::now_timestamp;

/// Insert a new session with a freshly minted UUID.
pub async fn create_session(pool: &SqlitePool, client_key: Option<&str>) -> Result<ChatSession> {
    let session = ChatSession {
        id: uuid::Uuid::new_v4().to_string(),
        client_key: client_key.map(str::to_string),
        created_at: now_timestamp(),
    };
    sqlx::query(
        r#"
        INSERT INTO chat_sessions (id, client_key, created_at)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(&session.id)
    .bind(&session.client_key)
    .bind(&session.created_at)
    .execute(pool)
    .await?;
    Ok(session)
}

pub async fn get_session(pool: &SqlitePool, id: &str) -> Result<ChatSession> {
    sqlx::query_as::<_, ChatSession>(
        r#"
        SELECT id, client_key, created_at
        FROM chat_sessions
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::NotFound {
        entity: "Session",
        id: id.to_string(),
    })
}

/// The newest `limit` messages of a session, returned oldest first.
pub async fn recent_messages(
    pool: &SqlitePool,
    session_id: &str,
    limit: i64,
) -> Result<Vec<ChatMessage>> {
    let mut rows = sqlx::query_as::<_, ChatMessage>(
        r#"
        SELECT id, session_id, role, content, created_at
        FROM chat_messages
        WHERE session_id = ?
        ORDER BY id DESC
        LIMIT ?
        "#,
    )
    .bind(session_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.reverse();
    Ok(rows)
}

/// Full transcript in creation order.
pub async fn list_messages(pool: &SqlitePool, session_id: &str) -> Result<Vec<ChatMessage>> {
    let rows = sqlx::query_as::<_, ChatMessage>(
        r#"
        SELECT id, session_id, role, content, created_at
        FROM chat_messages
        WHERE session_id = ?
        ORDER BY id ASC
        "#,
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Persist one turn (user message then assistant reply) atomically.
pub async fn append_turn(
    pool: &SqlitePool,
    session_id: &str,
    user_text: &str,
    assistant_text: &str,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    for (role, content) in [("user", user_text), ("assistant", assistant_text)] {
        sqlx::query(
            r#"
            INSERT INTO chat_messages (session_id, role, content, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(now_timestamp())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Sessions opened at or after `since` (RFC 3339, UTC).
pub async fn count_sessions_since(pool: &SqlitePool, since: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM chat_sessions WHERE created_at >= ?
        "#,
    )
    .bind(since)
    .fetch_one(pool)
    .await?;
    Ok(count)
}
