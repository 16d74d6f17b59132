use anyhow::{Context, Result};
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tokio::task;

use crate::config::SecurityConfig;
use crate::entities::users;

/// User data returned from repository (without the password hash).
#[derive(Debug, Clone)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub email_verified: Option<String>,
    pub newsletter_subscribed: bool,
    pub phone: Option<String>,
    pub avatar_path: Option<String>,
    pub has_password: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<users::Model> for User {
    fn from(model: users::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            email: model.email,
            email_verified: model.email_verified,
            newsletter_subscribed: model.newsletter_subscribed,
            phone: model.phone,
            avatar_path: model.avatar_path,
            has_password: model.password_hash.is_some(),
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

pub struct UserRepository {
    conn: DatabaseConnection,
}

impl UserRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = users::Entity::find()
            .filter(users::Column::Email.eq(normalize_email(email)))
            .one(&self.conn)
            .await
            .context("Failed to query user by email")?;

        Ok(user.map(User::from))
    }

    pub async fn get_by_id(&self, id: i32) -> Result<Option<User>> {
        let user = users::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user by ID")?;

        Ok(user.map(User::from))
    }

    /// Create a user with a password. The password is hashed here; callers
    /// enforce the password policy before getting this far.
    pub async fn create(
        &self,
        name: &str,
        email: &str,
        password: &str,
        newsletter_subscribed: bool,
        config: &SecurityConfig,
    ) -> Result<User> {
        let password = password.to_string();
        let config = config.clone();
        let hash = task::spawn_blocking(move || hash_password(&password, &config))
            .await
            .context("Password hashing task panicked")??;

        let now = chrono::Utc::now().to_rfc3339();
        let model = users::ActiveModel {
            name: Set(name.trim().to_string()),
            email: Set(normalize_email(email)),
            password_hash: Set(Some(hash)),
            email_verified: Set(None),
            newsletter_subscribed: Set(newsletter_subscribed),
            phone: Set(None),
            avatar_path: Set(None),
            created_at: Set(now.clone()),
            updated_at: Set(now),
            ..Default::default()
        };

        let inserted = model
            .insert(&self.conn)
            .await
            .context("Failed to insert user")?;

        Ok(User::from(inserted))
    }

    /// Create a user from an OAuth profile. No password is set; the account
    /// can only sign in through the provider until one is added.
    pub async fn create_from_oauth(&self, name: &str, email: &str) -> Result<User> {
        let now = chrono::Utc::now().to_rfc3339();
        let model = users::ActiveModel {
            name: Set(name.trim().to_string()),
            email: Set(normalize_email(email)),
            password_hash: Set(None),
            // Provider-asserted emails count as verified.
            email_verified: Set(Some(now.clone())),
            newsletter_subscribed: Set(false),
            phone: Set(None),
            avatar_path: Set(None),
            created_at: Set(now.clone()),
            updated_at: Set(now),
            ..Default::default()
        };

        let inserted = model
            .insert(&self.conn)
            .await
            .context("Failed to insert user from OAuth profile")?;

        Ok(User::from(inserted))
    }

    /// Verify a password against the stored hash.
    /// Note: This uses `spawn_blocking` because Argon2 hashing is CPU-intensive
    /// and would block the async runtime if run directly.
    pub async fn verify_password(&self, email: &str, password: &str) -> Result<bool> {
        let user = users::Entity::find()
            .filter(users::Column::Email.eq(normalize_email(email)))
            .one(&self.conn)
            .await
            .context("Failed to query user for password verification")?;

        let Some(user) = user else {
            return Ok(false);
        };

        let Some(password_hash) = user.password_hash else {
            // OAuth-only account, there is nothing to compare against.
            return Ok(false);
        };

        let password = password.to_string();

        let is_valid = task::spawn_blocking(move || {
            let parsed_hash = PasswordHash::new(&password_hash)
                .map_err(|e| anyhow::anyhow!("Invalid password hash format: {e}"))?;

            let argon2 = Argon2::default();
            Ok::<bool, anyhow::Error>(
                argon2
                    .verify_password(password.as_bytes(), &parsed_hash)
                    .is_ok(),
            )
        })
        .await
        .context("Password verification task panicked")??;

        Ok(is_valid)
    }

    pub async fn update_password(
        &self,
        user_id: i32,
        new_password: &str,
        config: &SecurityConfig,
    ) -> Result<()> {
        let user = users::Entity::find_by_id(user_id)
            .one(&self.conn)
            .await
            .context("Failed to query user for password update")?
            .ok_or_else(|| anyhow::anyhow!("User not found: {user_id}"))?;

        let password = new_password.to_string();
        let config = config.clone();
        let new_hash = task::spawn_blocking(move || hash_password(&password, &config))
            .await
            .context("Password hashing task panicked")??;

        let now = chrono::Utc::now().to_rfc3339();

        let mut active: users::ActiveModel = user.into();
        active.password_hash = Set(Some(new_hash));
        active.updated_at = Set(now);
        active.update(&self.conn).await?;

        Ok(())
    }

    pub async fn mark_email_verified(&self, email: &str) -> Result<bool> {
        let user = users::Entity::find()
            .filter(users::Column::Email.eq(normalize_email(email)))
            .one(&self.conn)
            .await
            .context("Failed to query user for email verification")?;

        let Some(user) = user else {
            return Ok(false);
        };

        if user.email_verified.is_some() {
            return Ok(true);
        }

        let now = chrono::Utc::now().to_rfc3339();
        let mut active: users::ActiveModel = user.into();
        active.email_verified = Set(Some(now.clone()));
        active.updated_at = Set(now);
        active.update(&self.conn).await?;

        Ok(true)
    }

    pub async fn update_profile(
        &self,
        user_id: i32,
        name: &str,
        phone: Option<&str>,
    ) -> Result<User> {
        let user = users::Entity::find_by_id(user_id)
            .one(&self.conn)
            .await
            .context("Failed to query user for profile update")?
            .ok_or_else(|| anyhow::anyhow!("User not found: {user_id}"))?;

        let now = chrono::Utc::now().to_rfc3339();
        let mut active: users::ActiveModel = user.into();
        active.name = Set(name.trim().to_string());
        active.phone = Set(phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()));
        active.updated_at = Set(now);
        let updated = active.update(&self.conn).await?;

        Ok(User::from(updated))
    }

    /// Store the new avatar path and return the previous one so the caller
    /// can remove the old file.
    pub async fn update_avatar(
        &self,
        user_id: i32,
        avatar_path: Option<&str>,
    ) -> Result<Option<String>> {
        let user = users::Entity::find_by_id(user_id)
            .one(&self.conn)
            .await
            .context("Failed to query user for avatar update")?
            .ok_or_else(|| anyhow::anyhow!("User not found: {user_id}"))?;

        let previous = user.avatar_path.clone();
        let now = chrono::Utc::now().to_rfc3339();

        let mut active: users::ActiveModel = user.into();
        active.avatar_path = Set(avatar_path.map(ToString::to_string));
        active.updated_at = Set(now);
        active.update(&self.conn).await?;

        Ok(previous)
    }

    pub async fn set_newsletter_subscription(&self, user_id: i32, subscribed: bool) -> Result<()> {
        let user = users::Entity::find_by_id(user_id)
            .one(&self.conn)
            .await
            .context("Failed to query user for subscription update")?
            .ok_or_else(|| anyhow::anyhow!("User not found: {user_id}"))?;

        let now = chrono::Utc::now().to_rfc3339();
        let mut active: users::ActiveModel = user.into();
        active.newsletter_subscribed = Set(subscribed);
        active.updated_at = Set(now);
        active.update(&self.conn).await?;

        Ok(())
    }

    /// Delete the account. OAuth links are removed by the cascade constraint.
    pub async fn delete(&self, user_id: i32) -> Result<bool> {
        let res = users::Entity::delete_by_id(user_id)
            .exec(&self.conn)
            .await
            .context("Failed to delete user")?;

        Ok(res.rows_affected > 0)
    }

    /// Verified users who opted into the newsletter.
    pub async fn newsletter_recipients(&self) -> Result<Vec<User>> {
        let rows = users::Entity::find()
            .filter(users::Column::NewsletterSubscribed.eq(true))
            .filter(users::Column::EmailVerified.is_not_null())
            .all(&self.conn)
            .await
            .context("Failed to query newsletter recipients")?;

        Ok(rows.into_iter().map(User::from).collect())
    }
}

/// Canonical form used everywhere an email is stored or compared.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Hash a password using Argon2id with the configured params.
pub fn hash_password(password: &str, config: &SecurityConfig) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    let params = Params::new(
        config.argon2_memory_cost_kib,
        config.argon2_time_cost,
        config.argon2_parallelism,
        None,
    )
    .map_err(|e| anyhow::anyhow!("Invalid Argon2 params: {e}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;

    Ok(hash.to_string())
}
