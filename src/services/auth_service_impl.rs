//! `SeaORM` implementation of the `AuthService` trait.

use std::sync::Arc;
use tracing::{info, warn};

use crate::clients::captcha::{CaptchaOutcome, CaptchaVerifier};
use crate::clients::mail::Mailer;
use crate::config::Config;
use crate::db::Store;
use crate::db::repositories::user::normalize_email;
use crate::services::auth_service::{
    AuthError, AuthService, Role, SessionUser, validate_password,
};
use crate::services::mail_templates;
use crate::services::rate_limit::RateLimiter;
use async_trait::async_trait;

const RESET_TOKEN_TTL_SECONDS: i64 = 60 * 60;
const VERIFICATION_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;

pub struct SeaOrmAuthService {
    store: Store,
    limiter: RateLimiter,
    captcha: Arc<dyn CaptchaVerifier>,
    mailer: Arc<dyn Mailer>,
    config: Config,
}

impl SeaOrmAuthService {
    #[must_use]
    pub fn new(
        store: Store,
        limiter: RateLimiter,
        captcha: Arc<dyn CaptchaVerifier>,
        mailer: Arc<dyn Mailer>,
        config: Config,
    ) -> Self {
        Self {
            store,
            limiter,
            captcha,
            mailer,
            config,
        }
    }

    async fn require_captcha(&self, token: &str, ip: &str) -> Result<(), AuthError> {
        match self.captcha.verify(token, Some(ip)).await {
            CaptchaOutcome::Verified { .. } => Ok(()),
            CaptchaOutcome::Failed => Err(AuthError::CaptchaFailed),
            CaptchaOutcome::Unavailable => Err(AuthError::CaptchaUnavailable),
        }
    }

    fn resolve_role(&self, email: &str) -> Role {
        if self.config.is_admin_email(email) {
            Role::Admin
        } else {
            Role::User
        }
    }
}

#[async_trait]
impl AuthService for SeaOrmAuthService {
    async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        captcha_token: &str,
        ip: &str,
    ) -> Result<(), AuthError> {
        self.require_captcha(captcha_token, ip).await?;

        if name.trim().is_empty() {
            return Err(AuthError::Validation("Le nom est requis.".to_string()));
        }
        let email = normalize_email(email);
        if !email.contains('@') {
            return Err(AuthError::Validation("Email invalide.".to_string()));
        }
        validate_password(password)?;

        if self.store.get_user_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        // The unique index is the real arbiter; a concurrent registration
        // can still win between the check and the insert.
        let user = self
            .store
            .create_user(name, &email, password, false, &self.config.security)
            .await
            .map_err(|e| {
                if e.to_string().contains("UNIQUE") {
                    AuthError::EmailTaken
                } else {
                    AuthError::Internal(e.to_string())
                }
            })?;

        let token = self
            .store
            .issue_verification_token(&email, VERIFICATION_TOKEN_TTL_SECONDS)
            .await?;

        self.mailer
            .send(mail_templates::verification_email(
                &self.config.server.base_url,
                &email,
                &token,
            ))
            .await
            .map_err(|e| AuthError::Mail(e.to_string()))?;

        info!("User registered: id={}", user.id);
        Ok(())
    }

    async fn login(
        &self,
        email: &str,
        password: &str,
        captcha_token: &str,
        ip: &str,
    ) -> Result<SessionUser, AuthError> {
        self.require_captcha(captcha_token, ip).await?;

        let email = normalize_email(email);

        if self.limiter.is_login_blocked(&email, ip).await? {
            return Err(AuthError::Blocked);
        }

        let user = self.store.get_user_by_email(&email).await?;

        let credentials_ok = match &user {
            Some(u) if u.has_password => {
                self.store.verify_user_password(&email, password).await?
            }
            _ => false,
        };

        if !credentials_ok {
            if self.limiter.record_login_failure(&email, ip).await? {
                warn!("Login identity blocked: ip={}", ip);
            }
            return Err(AuthError::InvalidCredentials);
        }

        let user = user.ok_or(AuthError::InvalidCredentials)?;

        // Correct password but pending verification: reject without touching
        // the failure counter, so a legitimate new member is not pushed
        // toward a block while waiting for the mail.
        if user.email_verified.is_none() {
            return Err(AuthError::EmailNotVerified);
        }

        self.limiter.clear_login_failures(&email, ip).await?;
        self.store.record_login(user.id, ip).await?;

        let role = self.resolve_role(&email);
        info!("Login: user_id={}", user.id);

        Ok(SessionUser {
            user_id: user.id,
            email: user.email,
            name: user.name,
            role,
        })
    }

    async fn forgot_password(
        &self,
        email: &str,
        captcha_token: &str,
        ip: &str,
    ) -> Result<(), AuthError> {
        self.require_captcha(captcha_token, ip).await?;

        let email = normalize_email(email);

        if self.limiter.is_reset_blocked(&email, ip).await?
            || self.limiter.in_reset_cooldown(&email).await?
        {
            return Err(AuthError::Blocked);
        }

        let user = self.store.get_user_by_email(&email).await?;

        // Attempts count whether or not the account exists, so a prober
        // cannot map registered emails through the attempt budget either.
        self.limiter.record_reset_attempt(&email, ip).await?;

        if user.is_some() {
            let token = self
                .store
                .issue_reset_token(&email, RESET_TOKEN_TTL_SECONDS)
                .await?;

            self.mailer
                .send(mail_templates::reset_email(
                    &self.config.server.base_url,
                    &email,
                    &token,
                ))
                .await
                .map_err(|e| AuthError::Mail(e.to_string()))?;
        }

        // The cooldown starts whether or not the account exists; a 429 that
        // only real accounts produce would leak which emails are registered.
        self.limiter.start_reset_cooldown(&email).await?;

        Ok(())
    }

    async fn reset_password(
        &self,
        token: &str,
        email: &str,
        new_password: &str,
        captcha_token: &str,
        ip: &str,
    ) -> Result<(), AuthError> {
        self.require_captcha(captcha_token, ip).await?;

        let email = normalize_email(email);

        // Policy first, so a weak password does not burn a live token.
        validate_password(new_password)?;

        if !self.store.consume_reset_token(token, &email).await? {
            return Err(AuthError::InvalidToken);
        }

        let user = self
            .store
            .get_user_by_email(&email)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        self.store
            .update_user_password(user.id, new_password, &self.config.security)
            .await?;

        if let Err(e) = self
            .mailer
            .send(mail_templates::reset_confirmation_email(&email))
            .await
        {
            // The reset already happened; the confirmation is advisory.
            warn!("Reset confirmation mail failed: {}", e);
        }

        info!("Password reset: user_id={}", user.id);
        Ok(())
    }

    async fn verify_email(&self, token: &str, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);

        if !self.store.consume_verification_token(token, &email).await? {
            return Err(AuthError::InvalidToken);
        }

        if !self.store.mark_email_verified(&email).await? {
            return Err(AuthError::InvalidToken);
        }

        info!("Email verified");
        Ok(())
    }

    async fn check_admin(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);

        if self.limiter.is_admin_blocked(&email).await? {
            return Err(AuthError::NotFound);
        }

        if self.config.is_admin_email(&email) {
            self.limiter.clear_admin_failures(&email).await?;
            return Ok(());
        }

        if self.limiter.record_admin_failure(&email).await? {
            warn!("Admin probe identity blocked");
        }
        Err(AuthError::NotFound)
    }

    async fn change_password(
        &self,
        user_id: i32,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        validate_password(new_password)?;

        if current_password == new_password {
            return Err(AuthError::Validation(
                "Le nouveau mot de passe doit être différent de l'ancien.".to_string(),
            ));
        }

        let user = self
            .store
            .get_user_by_id(user_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let is_valid = self
            .store
            .verify_user_password(&user.email, current_password)
            .await?;

        if !is_valid {
            return Err(AuthError::Validation(
                "Mot de passe actuel incorrect.".to_string(),
            ));
        }

        self.store
            .update_user_password(user_id, new_password, &self.config.security)
            .await?;

        Ok(())
    }
}
