use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_sessions::Session;
use tracing::warn;

use super::auth::{SESSION_USER_KEY, client_ip};
use super::{ApiError, ApiResponse, AppState};
use crate::clients::oauth::{OAuthProfile, OAuthProvider};
use crate::services::auth_service::{Role, SessionUser};

const OAUTH_STATE_KEY: &str = "oauth_state";
const PENDING_LINK_KEY: &str = "oauth_pending_link";

#[derive(Serialize)]
pub struct AuthorizeResponse {
    pub url: String,
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
}

#[derive(Deserialize)]
pub struct LinkRequest {
    pub password: String,
}

/// Provider identity held in the session between a 409 callback and the
/// explicit link confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingLink {
    provider: String,
    provider_account_id: String,
    email: String,
    name: String,
}

fn parse_provider(provider: &str) -> Result<OAuthProvider, ApiError> {
    OAuthProvider::parse(provider)
        .ok_or_else(|| ApiError::NotFound("Unknown provider".to_string()))
}

fn redirect_uri(base_url: &str, provider: OAuthProvider) -> String {
    format!("{base_url}/api/auth/oauth/{}/callback", provider.as_str())
}

async fn establish_session(
    state: &AppState,
    session: &Session,
    user_id: i32,
    email: &str,
    name: &str,
) -> Result<SessionUser, ApiError> {
    let role = if state.config().read().await.is_admin_email(email) {
        Role::Admin
    } else {
        Role::User
    };

    let user = SessionUser {
        user_id,
        email: email.to_string(),
        name: name.to_string(),
        role,
    };

    session
        .insert(SESSION_USER_KEY, &user)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create session: {e}")))?;

    Ok(user)
}

/// GET /api/auth/oauth/{provider}
///
/// Hands the client the provider consent URL; the state nonce lives in the
/// session until the callback.
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(provider): Path<String>,
) -> Result<Json<ApiResponse<AuthorizeResponse>>, ApiError> {
    let provider = parse_provider(&provider)?;

    if !state.oauth().is_enabled(provider) {
        return Err(ApiError::NotFound("Unknown provider".to_string()));
    }

    let nonce = uuid::Uuid::new_v4().to_string();
    session
        .insert(OAUTH_STATE_KEY, &nonce)
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))?;

    let base_url = state.config().read().await.server.base_url.clone();
    let url = state
        .oauth()
        .authorize_url(provider, &redirect_uri(&base_url, provider), &nonce)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(ApiResponse::success(AuthorizeResponse { url })))
}

/// GET /api/auth/oauth/{provider}/callback
pub async fn callback(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, ApiError> {
    let provider = parse_provider(&provider)?;

    let expected: Option<String> = session
        .remove(OAUTH_STATE_KEY)
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))?;
    if expected.as_deref() != Some(query.state.as_str()) {
        return Err(ApiError::validation("État OAuth invalide."));
    }

    let base_url = state.config().read().await.server.base_url.clone();
    let profile = state
        .oauth()
        .fetch_profile(provider, &query.code, &redirect_uri(&base_url, provider))
        .await
        .map_err(|e| ApiError::ExternalApiError {
            service: "OAuth".to_string(),
            message: e.to_string(),
        })?;

    sign_in_with_profile(&state, &session, profile).await
}

async fn sign_in_with_profile(
    state: &AppState,
    session: &Session,
    profile: OAuthProfile,
) -> Result<Response, ApiError> {
    let provider = profile.provider.as_str();

    // Known provider identity: straight sign-in.
    if let Some(link) = state
        .store()
        .get_oauth_account(provider, &profile.provider_account_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
    {
        let user = state
            .store()
            .get_user_by_id(link.user_id)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?
            .ok_or_else(|| ApiError::internal("Dangling OAuth link"))?;

        let session_user =
            establish_session(state, session, user.id, &user.email, &user.name).await?;
        return Ok(signed_in_response(&session_user));
    }

    let existing = state
        .store()
        .get_user_by_email(&profile.email)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    match existing {
        Some(user) if user.has_password => {
            // A password-holding account with this email exists and is not
            // linked. Never auto-merge; the account owner must confirm with
            // their password.
            let pending = PendingLink {
                provider: provider.to_string(),
                provider_account_id: profile.provider_account_id,
                email: user.email.clone(),
                name: user.name,
            };
            session
                .insert(PENDING_LINK_KEY, &pending)
                .await
                .map_err(|e| ApiError::internal(format!("Session error: {e}")))?;

            Ok((
                StatusCode::CONFLICT,
                Json(serde_json::json!({
                    "success": false,
                    "error": "link_required",
                    "email": user.email,
                })),
            )
                .into_response())
        }
        _ if !profile.email_verified => {
            // Providers hand back addresses they never confirmed (GitHub
            // does for public profile emails). Acting on one would let
            // anyone claim an address by asserting it.
            Err(ApiError::Forbidden(
                "Adresse email non vérifiée par le fournisseur.".to_string(),
            ))
        }
        None => {
            // First sign-in for this email: the provider identity is the
            // account, and its provider-verified email counts as verified.
            let user = state
                .store()
                .create_user_from_oauth(&profile.name, &profile.email)
                .await
                .map_err(|e| ApiError::internal(e.to_string()))?;
            state
                .store()
                .link_oauth_account(user.id, provider, &profile.provider_account_id)
                .await
                .map_err(|e| ApiError::internal(e.to_string()))?;

            let session_user =
                establish_session(state, session, user.id, &user.email, &user.name).await?;
            Ok(signed_in_response(&session_user))
        }
        Some(user) => {
            // Existing provider-created account gaining a second provider.
            state
                .store()
                .link_oauth_account(user.id, provider, &profile.provider_account_id)
                .await
                .map_err(|e| ApiError::internal(e.to_string()))?;

            let session_user =
                establish_session(state, session, user.id, &user.email, &user.name).await?;
            Ok(signed_in_response(&session_user))
        }
    }
}

/// POST /api/auth/oauth/link
///
/// Completes the explicit link after a `link_required` callback: the caller
/// proves ownership of the credential account with its password.
pub async fn link(
    State(state): State<Arc<AppState>>,
    session: Session,
    headers: HeaderMap,
    Json(payload): Json<LinkRequest>,
) -> Result<Response, ApiError> {
    let pending: PendingLink = session
        .get(PENDING_LINK_KEY)
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))?
        .ok_or_else(|| ApiError::validation("Aucune liaison en attente."))?;

    // The confirmation is a password check, so it shares the login failure
    // accounting; guessing here is no cheaper than at /login.
    let ip = client_ip(&headers);
    if state.limiter().is_login_blocked(&pending.email, &ip).await? {
        return Err(ApiError::TooManyRequests(
            "Trop de tentatives. Réessayez plus tard.".to_string(),
        ));
    }

    let is_valid = state
        .store()
        .verify_user_password(&pending.email, &payload.password)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    if !is_valid {
        if state
            .limiter()
            .record_login_failure(&pending.email, &ip)
            .await?
        {
            warn!("Link confirmation identity blocked: ip={}", ip);
        }
        return Err(ApiError::Unauthorized("Identifiants invalides".to_string()));
    }

    state
        .limiter()
        .clear_login_failures(&pending.email, &ip)
        .await?;

    let user = state
        .store()
        .get_user_by_email(&pending.email)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| ApiError::validation("Aucune liaison en attente."))?;

    state
        .store()
        .link_oauth_account(user.id, &pending.provider, &pending.provider_account_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    session
        .remove::<PendingLink>(PENDING_LINK_KEY)
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))?;

    let session_user =
        establish_session(&state, &session, user.id, &user.email, &user.name).await?;
    Ok(signed_in_response(&session_user))
}

fn signed_in_response(user: &SessionUser) -> Response {
    Json(ApiResponse::success(serde_json::json!({
        "name": user.name,
        "email": user.email,
        "role": user.role.as_str(),
    })))
    .into_response()
}
