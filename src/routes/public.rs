//! Chat and feedback endpoints.  Admission control has already run by the
//! time a handler is entered.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::ClientKey;
use crate::error::ApiError;
use crate::store::feedback;
use crate::store::models::NewFeedback;
use crate::AppState;

pub const MAX_CHAT_MESSAGE_CHARS: usize = 5000;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub turnstile_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptResponse {
    pub id: String,
    pub created_at: String,
    pub messages: Vec<TranscriptMessage>,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub user_name: String,
    pub user_email: String,
    #[serde(default)]
    pub user_phone: Option<String>,
    pub message: String,
    #[serde(default)]
    pub rating: Option<i64>,
    #[serde(default)]
    pub turnstile_token: Option<String>,
}

fn check_len(field: &str, value: &str, min: usize, max: usize) -> Result<(), ApiError> {
    let n = value.chars().count();
    if n < min || n > max {
        return Err(ApiError::Validation(format!(
            "{} must be between {} and {} characters",
            field, min, max
        )));
    }
    Ok(())
}

fn check_session_id(id: Option<&str>) -> Result<(), ApiError> {
    match id {
        Some(id) if uuid::Uuid::parse_str(id).is_err() => {
            Err(ApiError::Validation("session_id must be a UUID".into()))
        }
        _ => Ok(()),
    }
}

fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

fn non_empty(token: Option<&str>) -> Option<&str> {
    token.map(str::trim).filter(|t| !t.is_empty())
}

/// One chat turn.  New sessions must carry a bot-check token; follow-ups
/// ride on the already verified session.
pub async fn chat(
    State(state): State<AppState>,
    ClientKey(client): ClientKey,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(req) = payload?;
    check_len("message", &req.message, 1, MAX_CHAT_MESSAGE_CHARS)?;
    check_session_id(req.session_id.as_deref())?;

    if req.session_id.is_none() {
        let token = non_empty(req.turnstile_token.as_deref()).ok_or_else(|| {
            ApiError::BadRequest("Turnstile token required for new sessions".into())
        })?;
        if !state.bot_check.verify(token, Some(&client)).await {
            return Err(ApiError::BotCheckFailed);
        }
    }

    let accepted = state.safety.check(&req.message, Some(&client)).await?;
    let turn = state
        .orchestrator
        .converse(req.session_id.as_deref(), &accepted, &client)
        .await?;

    Ok(Json(ChatResponse {
        session_id: turn.session_id,
        message: turn.reply,
    }))
}

pub async fn transcript(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<TranscriptResponse>, ApiError> {
    let (session, messages) = state.orchestrator.transcript(&session_id).await?;
    Ok(Json(TranscriptResponse {
        id: session.id,
        created_at: session.created_at,
        messages: messages
            .into_iter()
            .map(|m| TranscriptMessage {
                role: m.role,
                content: m.content,
                created_at: m.created_at,
            })
            .collect(),
    }))
}

pub async fn submit_feedback(
    State(state): State<AppState>,
    ClientKey(client): ClientKey,
    payload: Result<Json<FeedbackRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(req) = payload?;
    check_session_id(req.session_id.as_deref())?;
    check_len("user_name", &req.user_name, 2, 100)?;
    if !looks_like_email(&req.user_email) {
        return Err(ApiError::Validation("user_email must be a valid email address".into()));
    }
    if let Some(phone) = req.user_phone.as_deref() {
        check_len("user_phone", phone, 0, 15)?;
    }
    check_len("message", &req.message, 5, 2000)?;
    if let Some(rating) = req.rating {
        if !(1..=5).contains(&rating) {
            return Err(ApiError::Validation("rating must be between 1 and 5".into()));
        }
    }

    if let Some(token) = non_empty(req.turnstile_token.as_deref()) {
        if !state.bot_check.verify(token, Some(&client)).await {
            return Err(ApiError::BotCheckFailed);
        }
    }

    let id = feedback::create_feedback(
        state.db.pool(),
        &NewFeedback {
            session_id: req.session_id,
            user_name: req.user_name,
            user_email: req.user_email,
            user_phone: req.user_phone,
            message: req.message,
            rating: req.rating,
        },
    )
    .await?;
    tracing::info!(feedback_id = id, client = %client, "feedback recorded");

    Ok(Json(serde_json::json!({
        "status": "success",
        "message": "Feedback received"
    })))
}
