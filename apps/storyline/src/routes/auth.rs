use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::BackendError;
use crate::errors::AppError;
use crate::models::Session;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct OAuthQuery {
    pub redirect_to: String,
}

#[derive(Deserialize)]
pub struct OAuthCallbackRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct VisibilityRequest {
    pub visible: bool,
}

/// Session as shown to the client; tokens stay in the gateway.
#[derive(Serialize)]
pub struct SessionView {
    pub signed_in: bool,
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub expires_at: Option<i64>,
    pub is_admin: bool,
    pub auth_error: Option<String>,
}

async fn session_view(state: &AppState, session: Option<Session>, recheck_admin: bool) -> SessionView {
    let is_admin = match session {
        Some(_) if recheck_admin => state.admin.force_check().await,
        Some(_) => state.admin.is_admin().await,
        None => false,
    };
    SessionView {
        signed_in: session.is_some(),
        user_id: session.as_ref().map(|s| s.user.id),
        email: session.as_ref().and_then(|s| s.user.email.clone()),
        expires_at: session.as_ref().map(|s| s.expires_at),
        is_admin,
        auth_error: state.session.auth_error(),
    }
}

/// The auth service answers bad credentials with a 400.
fn sign_in_error(e: BackendError) -> AppError {
    match e {
        BackendError::Api {
            status: 400,
            message,
            ..
        } => AppError::Validation(message),
        e => AppError::Backend(e),
    }
}

/// POST /api/v1/auth/sign-in
pub async fn handle_sign_in(
    State(state): State<AppState>,
    Json(req): Json<SignInRequest>,
) -> Result<Json<SessionView>, AppError> {
    if state.session.current().is_some() {
        state.sign_out().await;
    }
    let session = state
        .session
        .sign_in_with_password(req.email.trim(), &req.password)
        .await
        .map_err(sign_in_error)?;
    state.sync_user();
    Ok(Json(session_view(&state, Some(session), false).await))
}

/// POST /api/v1/auth/sign-out
pub async fn handle_sign_out(State(state): State<AppState>) -> StatusCode {
    state.sign_out().await;
    StatusCode::NO_CONTENT
}

/// POST /api/v1/auth/refresh
/// Also re-reads the admin role instead of trusting the cache.
pub async fn handle_refresh(State(state): State<AppState>) -> Result<Json<SessionView>, AppError> {
    if !state.session.refresh_session(true).await {
        return Err(AppError::Unauthorized);
    }
    let session = state.session.current();
    Ok(Json(session_view(&state, session, true).await))
}

/// GET /api/v1/auth/session
pub async fn handle_get_session(State(state): State<AppState>) -> Json<SessionView> {
    let session = state.session.ensure_fresh().await;
    Json(session_view(&state, session, false).await)
}

/// GET /api/v1/auth/oauth/:provider
pub async fn handle_oauth_url(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<OAuthQuery>,
) -> Json<serde_json::Value> {
    let url = state
        .session
        .oauth_authorize_url(&provider, &params.redirect_to);
    Json(serde_json::json!({ "url": url }))
}

/// POST /api/v1/auth/oauth/callback
pub async fn handle_oauth_callback(
    State(state): State<AppState>,
    Json(req): Json<OAuthCallbackRequest>,
) -> Result<Json<SessionView>, AppError> {
    let session = state
        .session
        .sign_in_with_refresh_token(&req.refresh_token)
        .await
        .map_err(sign_in_error)?;
    state.sync_user();
    Ok(Json(session_view(&state, Some(session), false).await))
}

/// POST /api/v1/auth/visibility
pub async fn handle_visibility(
    State(state): State<AppState>,
    Json(req): Json<VisibilityRequest>,
) -> StatusCode {
    state.session.on_visibility_change(req.visible).await;
    StatusCode::NO_CONTENT
}

/// POST /api/v1/auth/online
pub async fn handle_online(State(state): State<AppState>) -> StatusCode {
    state.session.on_online().await;
    StatusCode::NO_CONTENT
}
