use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;

use super::ApiResponse;
use crate::services::auth_service::AuthError;
use crate::services::post_service::PostError;
use crate::services::uploads::UploadError;

#[derive(Debug)]
pub enum ApiError {
    ValidationError(String),

    Unauthorized(String),

    Forbidden(String),

    /// Also the deliberate stealth response for privileged probes.
    NotFound(String),

    Conflict(String),

    TooManyRequests(String),

    MailError(String),

    DatabaseError(String),

    ExternalApiError { service: String, message: String },

    InternalError(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::TooManyRequests(msg) => write!(f, "Too many requests: {}", msg),
            ApiError::MailError(msg) => write!(f, "Mail error: {}", msg),
            ApiError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            ApiError::ExternalApiError { service, message } => {
                write!(f, "{} error: {}", service, message)
            }
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            ApiError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg.clone()),
            ApiError::MailError(msg) => {
                tracing::error!("Mail error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Échec de l'envoi de l'email.".to_string(),
                )
            }
            ApiError::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Une erreur est survenue.".to_string(),
                )
            }
            ApiError::ExternalApiError { service, message } => {
                tracing::warn!("{} API error: {}", service, message);
                (
                    StatusCode::BAD_GATEWAY,
                    format!("{} service is unavailable", service),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Une erreur est survenue.".to_string(),
                )
            }
        };

        let body = ApiResponse::<()>::error(error_message);
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => ApiError::Unauthorized(err.to_string()),
            AuthError::EmailNotVerified => ApiError::Forbidden(err.to_string()),
            AuthError::EmailTaken
            | AuthError::InvalidToken
            | AuthError::CaptchaFailed
            | AuthError::Validation(_) => ApiError::ValidationError(err.to_string()),
            AuthError::Blocked => ApiError::TooManyRequests(err.to_string()),
            AuthError::NotFound => ApiError::NotFound("Not found".to_string()),
            AuthError::CaptchaUnavailable => ApiError::ExternalApiError {
                service: "Captcha".to_string(),
                message: err.to_string(),
            },
            AuthError::Mail(msg) => ApiError::MailError(msg),
            AuthError::Database(msg) => ApiError::DatabaseError(msg),
            AuthError::Internal(msg) => ApiError::InternalError(msg),
        }
    }
}

impl From<PostError> for ApiError {
    fn from(err: PostError) -> Self {
        match err {
            PostError::Validation(_) | PostError::Upload(_) => {
                ApiError::ValidationError(err.to_string())
            }
            PostError::NotFound => ApiError::NotFound(err.to_string()),
            PostError::Database(msg) => ApiError::DatabaseError(msg),
            PostError::Internal(msg) => ApiError::InternalError(msg),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::UnsupportedType | UploadError::TooLarge => {
                ApiError::ValidationError(err.to_string())
            }
            UploadError::NotFound | UploadError::InvalidPath => {
                ApiError::NotFound("Fichier introuvable".to_string())
            }
            UploadError::Io(e) => ApiError::InternalError(e.to_string()),
        }
    }
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::ValidationError(msg.into())
    }

    pub fn unauthorized() -> Self {
        ApiError::Unauthorized("Non authentifié".to_string())
    }

    pub fn forbidden() -> Self {
        ApiError::Forbidden("Accès refusé".to_string())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError::InternalError(msg.into())
    }
}
