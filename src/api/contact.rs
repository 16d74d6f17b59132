use axum::{Json, extract::State, http::HeaderMap};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::client_ip;
use super::{ApiError, ApiResponse, AppState, MessageResponse};
use crate::clients::captcha::CaptchaOutcome;
use crate::services::mail_templates;

#[derive(Deserialize)]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    pub message: String,
    pub captcha_token: Option<String>,
}

/// POST /api/contact — relay a visitor message to the club address.
pub async fn send_contact(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<ContactRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    if payload.name.trim().is_empty()
        || payload.email.trim().is_empty()
        || payload.message.trim().is_empty()
    {
        return Err(ApiError::validation("Tous les champs sont requis."));
    }

    let captcha = payload
        .captcha_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::validation("Vérification anti-robot requise."))?;

    let ip = client_ip(&headers);
    match state.captcha().verify(captcha, Some(&ip)).await {
        CaptchaOutcome::Verified { .. } => {}
        CaptchaOutcome::Failed => {
            return Err(ApiError::validation("Échec de la vérification anti-robot."));
        }
        CaptchaOutcome::Unavailable => {
            return Err(ApiError::ExternalApiError {
                service: "Captcha".to_string(),
                message: "verification unavailable".to_string(),
            });
        }
    }

    let contact_address = state.config().read().await.mail.contact_address.clone();
    state
        .mailer()
        .send(mail_templates::contact_email(
            &contact_address,
            &payload.name,
            &payload.email,
            &payload.message,
        ))
        .await
        .map_err(|e| ApiError::ExternalApiError {
            service: "Mail".to_string(),
            message: e.to_string(),
        })?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Message envoyé.",
    ))))
}
