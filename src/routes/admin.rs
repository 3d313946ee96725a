//! Role-gated admin console.  Every handler except `login` takes a
//! [`Principal`], which rejects a missing or invalid bearer credential
//! before the body is read.

use axum::async_trait;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::{Principal, PrincipalProfile, Role};
use crate::dashboard::{self, DashboardSnapshot};
use crate::error::ApiError;
use crate::store::console::{self, QueryOutput};
use crate::store::models::{AdminUser, Feedback};
use crate::store::{admins, feedback};
use crate::AppState;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        state.auth.authenticate(state.db.pool(), &parts.headers).await
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub google_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub user: PrincipalProfile,
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(req) = payload?;
    let outcome = state.auth.login(state.db.pool(), &req.google_token).await?;
    Ok(Json(LoginResponse {
        access_token: outcome.access_token,
        token_type: "bearer".into(),
        user: outcome.principal.profile(),
    }))
}

pub async fn me(principal: Principal) -> Json<PrincipalProfile> {
    Json(principal.profile())
}

pub async fn dashboard(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<DashboardSnapshot>, ApiError> {
    principal.require(Role::Viewer)?;
    let snapshot =
        dashboard::build_snapshot(state.db.pool(), &state.metrics, state.sampler.as_ref()).await?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub resolved: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeedbackPage {
    pub items: Vec<Feedback>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

pub async fn list_feedback(
    State(state): State<AppState>,
    principal: Principal,
    query: Result<Query<FeedbackQuery>, QueryRejection>,
) -> Result<Json<FeedbackPage>, ApiError> {
    principal.require(Role::Editor)?;
    let Query(q) = query.map_err(|e| ApiError::Validation(e.body_text()))?;

    let page = q.page.unwrap_or(1);
    if page < 1 {
        return Err(ApiError::Validation("page must be at least 1".into()));
    }
    let page_size = q.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(ApiError::Validation(format!(
            "page_size must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }

    let (items, total) = feedback::list_feedback(state.db.pool(), q.resolved, page, page_size).await?;
    Ok(Json(FeedbackPage {
        items,
        total,
        page,
        page_size,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub feedback_id: i64,
}

pub async fn resolve_feedback(
    State(state): State<AppState>,
    principal: Principal,
    payload: Result<Json<ResolveRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    principal.require(Role::Editor)?;
    let Json(req) = payload?;
    feedback::resolve_feedback(state.db.pool(), req.feedback_id).await?;
    tracing::info!(feedback_id = req.feedback_id, by = %principal.email(), "feedback resolved");
    Ok(Json(json!({
        "status": "success",
        "message": format!("Feedback {} resolved by {}", req.feedback_id, principal.email()),
    })))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserList {
    pub users: Vec<AdminUser>,
}

pub async fn list_users(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<UserList>, ApiError> {
    principal.require(Role::Admin)?;
    let users = admins::list_admins(state.db.pool()).await?;
    Ok(Json(UserList { users }))
}

#[derive(Debug, Deserialize)]
pub struct AddUserRequest {
    pub email: String,
    pub role: String,
}

pub async fn add_user(
    State(state): State<AppState>,
    principal: Principal,
    payload: Result<Json<AddUserRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    principal.require(Role::Admin)?;
    let Json(req) = payload?;

    let role: Role = req.role.parse().map_err(ApiError::Validation)?;
    if role == Role::SuperAdmin {
        return Err(ApiError::Forbidden("Cannot create Super Admin via API".into()));
    }
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::Validation("email must be a valid email address".into()));
    }

    let user = admins::create_admin(state.db.pool(), &email, role.as_str()).await?;
    tracing::info!(email = %user.email, role = %role, by = %principal.email(), "admin added");
    Ok(Json(json!({
        "status": "success",
        "message": format!("Added {} as {}", user.email, role),
        "user": user,
    })))
}

pub async fn revoke_user(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    principal.require(Role::Admin)?;
    let target = admins::get_admin(state.db.pool(), id).await?;
    if target.email.eq_ignore_ascii_case(principal.email()) {
        return Err(ApiError::Forbidden("Cannot revoke your own access".into()));
    }
    if state.auth.is_super_admin_email(&target.email) {
        return Err(ApiError::Forbidden("Cannot revoke the Super Admin".into()));
    }
    admins::deactivate_admin(state.db.pool(), id).await?;
    tracing::info!(email = %target.email, by = %principal.email(), "admin revoked");
    Ok(Json(json!({
        "status": "success",
        "message": format!("Revoked access for {}", target.email),
    })))
}

#[derive(Debug, Deserialize)]
pub struct DbQueryRequest {
    pub query: String,
}

pub async fn db_query(
    State(state): State<AppState>,
    principal: Principal,
    payload: Result<Json<DbQueryRequest>, JsonRejection>,
) -> Result<Json<QueryOutput>, ApiError> {
    principal.require(Role::SuperAdmin)?;
    let Json(req) = payload?;
    if let Some(keyword) = console::blocked_keyword(&req.query) {
        tracing::warn!(keyword, by = %principal.email(), "console query refused");
        return Err(ApiError::BadRequest(
            "ReadOnly Mode: Only SELECT allowed in dashboard.".into(),
        ));
    }
    let output = console::run_query(state.db.pool(), req.query.trim())
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(output))
}
