use axum::{
    Json,
    extract::{Query, State},
    http::HeaderMap,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_sessions::Session;

use super::{ApiError, ApiResponse, AppState, MessageResponse};
use crate::services::auth_service::SessionUser;

pub const SESSION_USER_KEY: &str = "user";

/// Client address for rate-limit keys. The app runs behind a reverse proxy,
/// so the forwarded header is the usable signal.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map_or_else(|| "unknown".to_string(), ToString::to_string)
}

pub async fn session_user(session: &Session) -> Result<Option<SessionUser>, ApiError> {
    session
        .get::<SessionUser>(SESSION_USER_KEY)
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))
}

/// Session user or 401.
pub async fn require_session(session: &Session) -> Result<SessionUser, ApiError> {
    session_user(session)
        .await?
        .ok_or_else(ApiError::unauthorized)
}

fn require_captcha_token(token: Option<&str>) -> Result<&str, ApiError> {
    token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::validation("Vérification anti-robot requise."))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub captcha_token: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub captcha_token: Option<String>,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub name: String,
    pub email: String,
    pub role: String,
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
    pub captcha_token: Option<String>,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub email: String,
    pub password: String,
    pub captcha_token: Option<String>,
}

#[derive(Deserialize)]
pub struct VerifyEmailQuery {
    pub token: String,
    pub email: String,
}

#[derive(Serialize)]
pub struct AdminCheckResponse {
    #[serde(rename = "isAdmin")]
    pub is_admin: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    session: Session,
    headers: HeaderMap,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    if session_user(&session).await?.is_some() {
        return Err(ApiError::forbidden());
    }

    let captcha = require_captcha_token(payload.captcha_token.as_deref())?;
    let ip = client_ip(&headers);

    state
        .auth_service()
        .register(&payload.name, &payload.email, &payload.password, captcha, &ip)
        .await?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Compte créé. Vérifiez votre boîte mail pour confirmer votre adresse.",
    ))))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    session: Session,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<ApiResponse<LoginResponse>>, ApiError> {
    // Already-authenticated short-circuit happens before any captcha or
    // rate-limit work.
    if let Some(user) = session_user(&session).await? {
        return Ok(Json(ApiResponse::success(LoginResponse {
            name: user.name,
            email: user.email,
            role: user.role.as_str().to_string(),
        })));
    }

    let captcha = require_captcha_token(payload.captcha_token.as_deref())?;
    let ip = client_ip(&headers);

    let user = state
        .auth_service()
        .login(&payload.email, &payload.password, captcha, &ip)
        .await?;

    session
        .insert(SESSION_USER_KEY, &user)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create session: {e}")))?;

    Ok(Json(ApiResponse::success(LoginResponse {
        name: user.name,
        email: user.email,
        role: user.role.as_str().to_string(),
    })))
}

/// POST /api/auth/logout
pub async fn logout(session: Session) -> impl IntoResponse {
    let _ = session.flush().await;
    Json(ApiResponse::success(MessageResponse::new("Déconnecté.")))
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<ApiResponse<super::UserDto>>, ApiError> {
    let user = require_session(&session).await?;

    let fresh = state
        .store()
        .get_user_by_id(user.user_id)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to get user: {e}")))?
        .ok_or_else(ApiError::unauthorized)?;

    Ok(Json(ApiResponse::success(super::UserDto {
        id: fresh.id,
        name: fresh.name,
        email: fresh.email,
        email_verified: fresh.email_verified.is_some(),
        newsletter_subscribed: fresh.newsletter_subscribed,
        phone: fresh.phone,
        avatar_path: fresh.avatar_path,
        role: user.role.as_str().to_string(),
    })))
}

/// POST /api/auth/forgot-password
///
/// The success body is byte-identical whether or not the account exists.
pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    session: Session,
    headers: HeaderMap,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    if session_user(&session).await?.is_some() {
        return Err(ApiError::forbidden());
    }

    let captcha = require_captcha_token(payload.captcha_token.as_deref())?;
    let ip = client_ip(&headers);

    state
        .auth_service()
        .forgot_password(&payload.email, captcha, &ip)
        .await?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Email envoyé si le compte existe.",
    ))))
}

/// POST /api/auth/reset-password
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    session: Session,
    headers: HeaderMap,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    if session_user(&session).await?.is_some() {
        return Err(ApiError::forbidden());
    }

    let captcha = require_captcha_token(payload.captcha_token.as_deref())?;
    let ip = client_ip(&headers);

    state
        .auth_service()
        .reset_password(&payload.token, &payload.email, &payload.password, captcha, &ip)
        .await?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Mot de passe réinitialisé. Vous pouvez vous connecter.",
    ))))
}

/// GET /api/auth/verify-email?token=…&email=…
pub async fn verify_email(
    State(state): State<Arc<AppState>>,
    session: Session,
    Query(query): Query<VerifyEmailQuery>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    if session_user(&session).await?.is_some() {
        return Err(ApiError::forbidden());
    }

    state
        .auth_service()
        .verify_email(&query.token, &query.email)
        .await?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Email vérifié. Vous pouvez vous connecter.",
    ))))
}

/// GET /api/auth/admin-check
///
/// Every failure is the same 404 a probe of a nonexistent route would get.
pub async fn admin_check(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<ApiResponse<AdminCheckResponse>>, ApiError> {
    let Some(user) = session_user(&session).await? else {
        return Err(ApiError::NotFound("Not found".to_string()));
    };

    state.auth_service().check_admin(&user.email).await?;

    Ok(Json(ApiResponse::success(AdminCheckResponse {
        is_admin: true,
    })))
}
