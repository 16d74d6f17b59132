//! Domain service for the authentication lifecycle.
//!
//! Orchestrates registration, login, password reset and email verification,
//! composing the rate limiter, captcha verifier, token store and mailer.
//! The ordering inside each flow is load-bearing: captcha first, then block
//! check, then credential work, then counter mutation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to authentication operations. User-facing messages are
/// French and deliberately generic where enumeration is a concern.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Identifiants invalides")]
    InvalidCredentials,

    #[error("Email non vérifié. Vérifiez votre boîte mail.")]
    EmailNotVerified,

    #[error("Un compte existe déjà avec cet email.")]
    EmailTaken,

    #[error("Lien invalide ou expiré.")]
    InvalidToken,

    #[error("Échec de la vérification anti-robot.")]
    CaptchaFailed,

    #[error("Vérification anti-robot indisponible.")]
    CaptchaUnavailable,

    #[error("Trop de tentatives. Réessayez plus tard.")]
    Blocked,

    #[error("{0}")]
    Validation(String),

    #[error("Not found")]
    NotFound,

    #[error("Mail delivery failed: {0}")]
    Mail(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for AuthError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Privilege resolved once at session issuance and stored in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Admin,
}

impl Role {
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }

    /// Wire form of the role, as returned in login and profile payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Admin => "Admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What gets written into the session on successful login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUser {
    pub user_id: i32,
    pub email: String,
    pub name: String,
    pub role: Role,
}

/// Domain service trait for authentication.
#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Registers a user, issues a verification token and sends the
    /// verification mail. Registration is not complete until the mail
    /// transport accepted the message.
    async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        captcha_token: &str,
        ip: &str,
    ) -> Result<(), AuthError>;

    /// Verifies credentials and returns the session payload.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Blocked`] while the `(email, ip)` identity is in
    /// a block window, even for correct credentials.
    async fn login(
        &self,
        email: &str,
        password: &str,
        captcha_token: &str,
        ip: &str,
    ) -> Result<SessionUser, AuthError>;

    /// Requests a password reset. The outcome is identical whether or not
    /// the account exists.
    async fn forgot_password(
        &self,
        email: &str,
        captcha_token: &str,
        ip: &str,
    ) -> Result<(), AuthError>;

    /// Redeems a reset token and stores the new password.
    async fn reset_password(
        &self,
        token: &str,
        email: &str,
        new_password: &str,
        captcha_token: &str,
        ip: &str,
    ) -> Result<(), AuthError>;

    /// Redeems a verification token and marks the account verified.
    async fn verify_email(&self, token: &str, email: &str) -> Result<(), AuthError>;

    /// Confirms the session email belongs to an administrator. Every
    /// failure, including a block, is [`AuthError::NotFound`] so probers
    /// cannot tell the route apart from a missing one.
    async fn check_admin(&self, email: &str) -> Result<(), AuthError>;

    /// In-session password change (settings page).
    async fn change_password(
        &self,
        user_id: i32,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError>;
}

/// Password complexity rule: at least 8 characters with an uppercase
/// letter, a lowercase letter, a digit and a special character.
pub fn validate_password(password: &str) -> Result<(), AuthError> {
    let long_enough = password.chars().count() >= 8;
    let has_upper = password.chars().any(char::is_uppercase);
    let has_lower = password.chars().any(char::is_lowercase);
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_special = password.chars().any(|c| !c.is_alphanumeric());

    if long_enough && has_upper && has_lower && has_digit && has_special {
        Ok(())
    } else {
        Err(AuthError::Validation(
            "Le mot de passe doit contenir au moins 8 caractères, une majuscule, \
             une minuscule, un chiffre et un caractère spécial."
                .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_policy_accepts_strong() {
        assert!(validate_password("Abcdef1!").is_ok());
        assert!(validate_password("Très-Sûr-2024").is_ok());
    }

    #[test]
    fn test_role_wire_form() {
        assert_eq!(Role::User.to_string(), "User");
        assert_eq!(Role::Admin.as_str(), "Admin");
    }

    #[test]
    fn test_password_policy_rejects_each_missing_class() {
        assert!(validate_password("Abc1!").is_err()); // too short
        assert!(validate_password("abcdef1!").is_err()); // no uppercase
        assert!(validate_password("ABCDEF1!").is_err()); // no lowercase
        assert!(validate_password("Abcdefg!").is_err()); // no digit
        assert!(validate_password("Abcdefg1").is_err()); // no special
    }
}
