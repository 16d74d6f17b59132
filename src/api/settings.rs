use axum::{
    Json,
    extract::{Multipart, State},
};
use serde::Deserialize;
use std::sync::Arc;
use tower_sessions::Session;

use super::auth::require_session;
use super::{ApiError, ApiResponse, AppState, MessageResponse, UserDto};
use crate::services::uploads::FileKind;

const AVATAR_DIR: &str = "avatars";

#[derive(Deserialize)]
pub struct PersonalRequest {
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Deserialize)]
pub struct CredentialsRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct SubscriptionsRequest {
    pub newsletter: bool,
}

fn user_dto(user: crate::db::User, role: crate::services::auth_service::Role) -> UserDto {
    UserDto {
        id: user.id,
        name: user.name,
        email: user.email,
        email_verified: user.email_verified.is_some(),
        newsletter_subscribed: user.newsletter_subscribed,
        phone: user.phone,
        avatar_path: user.avatar_path,
        role: role.as_str().to_string(),
    }
}

/// GET /api/settings/personal
pub async fn get_personal(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<ApiResponse<UserDto>>, ApiError> {
    let session_user = require_session(&session).await?;

    let user = state
        .store()
        .get_user_by_id(session_user.user_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(ApiError::unauthorized)?;

    Ok(Json(ApiResponse::success(user_dto(user, session_user.role))))
}

/// PUT /api/settings/personal
pub async fn update_personal(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(payload): Json<PersonalRequest>,
) -> Result<Json<ApiResponse<UserDto>>, ApiError> {
    let session_user = require_session(&session).await?;

    if payload.name.trim().is_empty() {
        return Err(ApiError::validation("Le nom est requis."));
    }

    let user = state
        .store()
        .update_user_profile(session_user.user_id, &payload.name, payload.phone.as_deref())
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(ApiResponse::success(user_dto(user, session_user.role))))
}

/// POST /api/settings/avatar (multipart, single `avatar` image part)
pub async fn update_avatar(
    State(state): State<Arc<AppState>>,
    session: Session,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let session_user = require_session(&session).await?;

    let mut staged = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("Formulaire invalide: {e}")))?
    {
        if field.name() == Some("avatar") {
            let content_type = field.content_type().unwrap_or_default().to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::validation(format!("Formulaire invalide: {e}")))?;
            let file = state.uploads().stage(&content_type, &bytes).await?;
            if let Some(previous) = staged.replace(file) {
                state.uploads().discard(previous).await;
            }
        }
    }

    let Some(staged) = staged else {
        return Err(ApiError::validation("Une image est requise."));
    };

    if staged.kind != FileKind::Image {
        state.uploads().discard(staged).await;
        return Err(ApiError::validation("L'avatar doit être une image."));
    }

    let relative = state.uploads().publish(staged, AVATAR_DIR).await?;

    let previous = state
        .store()
        .update_user_avatar(session_user.user_id, Some(&relative))
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    if let Some(previous) = previous {
        state.uploads().remove_relative(&previous).await.ok();
    }

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Avatar mis à jour.",
    ))))
}

/// PUT /api/settings/credentials
pub async fn update_credentials(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(payload): Json<CredentialsRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let session_user = require_session(&session).await?;

    state
        .auth_service()
        .change_password(
            session_user.user_id,
            &payload.current_password,
            &payload.new_password,
        )
        .await?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Mot de passe mis à jour.",
    ))))
}

/// PUT /api/settings/subscriptions
pub async fn update_subscriptions(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(payload): Json<SubscriptionsRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let session_user = require_session(&session).await?;

    state
        .store()
        .set_newsletter_subscription(session_user.user_id, payload.newsletter)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Préférences mises à jour.",
    ))))
}

/// DELETE /api/settings/account
///
/// Self-service deletion. The avatar file goes with the account; posts are
/// club property and stay.
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let session_user = require_session(&session).await?;

    let user = state
        .store()
        .get_user_by_id(session_user.user_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(ApiError::unauthorized)?;

    state
        .store()
        .delete_user(user.id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    if let Some(avatar) = user.avatar_path {
        state.uploads().remove_relative(&avatar).await.ok();
    }

    let _ = session.flush().await;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Compte supprimé.",
    ))))
}
