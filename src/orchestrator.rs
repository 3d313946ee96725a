//! Session and context orchestration for chat turns.
//!
//! A turn resolves (or opens) a session, folds the most recent messages into
//! a bounded history block, asks the engine with a single retry on transport
//! failure, and only then persists the user message and the reply together.
//! Engine exhaustion surfaces as [`ApiError::Unavailable`]; the monitor layer
//! records the matching system-error event.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;

use crate::config::EngineConfig;
use crate::engine::{ChatEngine, EngineError};
use crate::error::ApiError;
use crate::metrics::{MetricsStore, SecurityEventKind};
use crate::store::models::{ChatMessage, ChatSession};
use crate::store::sessions;

pub const TRIM_MARKER: &str = "[...earlier context trimmed...]";

/// Keep the newest `max_chars` characters of `history`, dropping any partial
/// first line, and prefix the marker.  Text within budget is returned as is.
pub fn trim_history(history: &str, max_chars: usize) -> String {
    if history.chars().count() <= max_chars {
        return history.to_string();
    }
    let start = if max_chars == 0 {
        history.len()
    } else {
        history
            .char_indices()
            .rev()
            .nth(max_chars - 1)
            .map(|(i, _)| i)
            .unwrap_or(0)
    };
    let tail = &history[start..];
    let at_line_start = start == 0 || history.as_bytes()[start - 1] == b'\n';
    let kept = if at_line_start {
        tail
    } else {
        match memchr::memchr(b'\n', tail.as_bytes()) {
            Some(nl) => &tail[nl + 1..],
            None => "",
        }
    };
    format!("{}\n{}", TRIM_MARKER, kept)
}

/// `User: ...` / `Assistant: ...`, one line each, oldest first.
pub fn render_history(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    for msg in messages {
        let label = if msg.role == "user" { "User" } else { "Assistant" };
        out.push_str(label);
        out.push_str(": ");
        out.push_str(&msg.content);
        out.push('\n');
    }
    out
}

/// The bare message on a first turn, otherwise the delimited wrapper.
pub fn build_payload(history: &str, message: &str) -> String {
    if history.trim().is_empty() {
        message.to_string()
    } else {
        format!(
            "### CONVERSATION HISTORY:\n{}\n### CURRENT QUESTION:\n{}",
            history, message
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub session_id: String,
    pub reply: String,
    pub new_session: bool,
}

pub struct Orchestrator {
    pool: SqlitePool,
    engine: Arc<dyn ChatEngine>,
    metrics: MetricsStore,
    history_messages: usize,
    history_char_budget: usize,
    retry_cooldown: Duration,
}

impl Orchestrator {
    pub fn new(
        pool: SqlitePool,
        engine: Arc<dyn ChatEngine>,
        metrics: MetricsStore,
        cfg: &EngineConfig,
    ) -> Self {
        Self {
            pool,
            engine,
            metrics,
            history_messages: cfg.history_messages,
            history_char_budget: cfg.history_char_budget,
            retry_cooldown: cfg.retry_cooldown,
        }
    }

    /// Run one chat turn.  `message` must already have passed the safety gate.
    pub async fn converse(
        &self,
        session_id: Option<&str>,
        message: &str,
        client: &str,
    ) -> Result<ChatTurn, ApiError> {
        let (session_id, new_session) = match session_id {
            Some(id) => (sessions::get_session(&self.pool, id).await?.id, false),
            None => {
                let session = sessions::create_session(&self.pool, Some(client)).await?;
                tracing::info!(session_id = %session.id, client = %client, "session opened");
                (session.id, true)
            }
        };

        let history = if new_session {
            String::new()
        } else {
            let recent =
                sessions::recent_messages(&self.pool, &session_id, self.history_messages as i64)
                    .await?;
            trim_history(&render_history(&recent), self.history_char_budget)
        };
        let payload = build_payload(&history, message);

        let reply = self.ask_with_retry(&payload, client).await?;

        sessions::append_turn(&self.pool, &session_id, message, &reply).await?;
        Ok(ChatTurn {
            session_id,
            reply,
            new_session,
        })
    }

    /// At most two attempts; the second only after a transport failure.
    async fn ask_with_retry(&self, payload: &str, client: &str) -> Result<String, ApiError> {
        match self.engine.ask(payload).await {
            Ok(reply) => Ok(reply),
            Err(first) if first.is_retryable() => {
                tracing::warn!(error = %first, "chat engine attempt failed; retrying once");
                self.metrics.record_event(
                    SecurityEventKind::SystemWarning,
                    format!("Chat engine glitch. Retrying... ({})", first),
                    Some(client),
                );
                tokio::time::sleep(self.retry_cooldown).await;
                self.engine
                    .ask(payload)
                    .await
                    .map_err(|second| exhausted(&second))
            }
            Err(err) => Err(ApiError::unavailable(format!(
                "Chat engine rejected request: {}",
                err
            ))),
        }
    }

    /// Session header and every message in creation order.
    pub async fn transcript(
        &self,
        session_id: &str,
    ) -> Result<(ChatSession, Vec<ChatMessage>), ApiError> {
        let session = sessions::get_session(&self.pool, session_id).await?;
        let messages = sessions::list_messages(&self.pool, session_id).await?;
        Ok((session, messages))
    }
}

fn exhausted(err: &EngineError) -> ApiError {
    ApiError::unavailable(format!("Chat engine failed after retry: {}", err))
}
