//! Client for the upstream conversational engine.
//!
//! Contract: `POST {base}/chat` with `{"message": <payload>}`; a 2xx body
//! carries the reply in `message`.  Only [`EngineError::Transport`] is worth
//! retrying; a status or body problem is a well-formed answer.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::EngineConfig;

/// Reply used when the engine answers 2xx without a `message` field.
pub const EMPTY_REPLY: &str = "Error: Empty response from AI";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("engine returned status {0}")]
    Status(u16),

    #[error("malformed engine response: {0}")]
    Malformed(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Transport(_))
    }
}

#[async_trait::async_trait]
pub trait ChatEngine: Send + Sync {
    async fn ask(&self, payload: &str) -> Result<String, EngineError>;
}

#[derive(Serialize)]
struct EngineRequest<'a> {
    message: &'a str,
}

#[derive(Deserialize)]
struct EngineReply {
    message: Option<String>,
}

pub struct HttpChatEngine {
    url: String,
    client: reqwest::Client,
}

impl HttpChatEngine {
    pub fn new(cfg: &EngineConfig) -> reqwest::Result<Self> {
        Self::with_timeout(&cfg.base_url, cfg.timeout)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: format!("{}/chat", base_url.trim_end_matches('/')),
            client,
        })
    }
}

#[async_trait::async_trait]
impl ChatEngine for HttpChatEngine {
    async fn ask(&self, payload: &str) -> Result<String, EngineError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&EngineRequest { message: payload })
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EngineError::Status(status.as_u16()));
        }
        let text = resp
            .text()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        let reply: EngineReply =
            serde_json::from_str(&text).map_err(|e| EngineError::Malformed(e.to_string()))?;
        Ok(reply.message.unwrap_or_else(|| EMPTY_REPLY.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::{routing::post, Json, Router};
    use serde_json::{json, Value};

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn echoes_reply_field() {
        let base = spawn(Router::new().route(
            "/chat",
            post(|Json(body): Json<Value>| async move {
                Json(json!({"message": format!("echo: {}", body["message"].as_str().unwrap())}))
            }),
        ))
        .await;
        let engine = HttpChatEngine::with_timeout(&base, Duration::from_secs(2)).unwrap();
        assert_eq!(engine.ask("hi").await.unwrap(), "echo: hi");
    }

    #[tokio::test]
    async fn missing_message_yields_placeholder() {
        let base = spawn(Router::new().route("/chat", post(|| async { Json(json!({})) }))).await;
        let engine = HttpChatEngine::with_timeout(&base, Duration::from_secs(2)).unwrap();
        assert_eq!(engine.ask("hi").await.unwrap(), EMPTY_REPLY);
    }

    #[tokio::test]
    async fn classifies_failures() {
        let base = spawn(Router::new().route(
            "/chat",
            post(|| async { (StatusCode::BAD_GATEWAY, "upstream sad") }),
        ))
        .await;
        let engine = HttpChatEngine::with_timeout(&base, Duration::from_secs(2)).unwrap();
        let err = engine.ask("hi").await.unwrap_err();
        assert!(matches!(err, EngineError::Status(502)));
        assert!(!err.is_retryable());

        let dead = HttpChatEngine::with_timeout("http://127.0.0.1:9", Duration::from_millis(300)).unwrap();
        let err = dead.ask("hi").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
