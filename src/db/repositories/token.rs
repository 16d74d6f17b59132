use anyhow::{Context, Result};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use crate::entities::{email_verification_tokens, password_reset_tokens};

pub struct TokenRepository {
    conn: DatabaseConnection,
}

impl TokenRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Issue a password-reset token, invalidating any previous one for the
    /// same email.
    pub async fn issue_reset(&self, email: &str, ttl_seconds: i64) -> Result<String> {
        password_reset_tokens::Entity::delete_many()
            .filter(password_reset_tokens::Column::Email.eq(email))
            .exec(&self.conn)
            .await
            .context("Failed to clear previous reset tokens")?;

        let token = generate_token();
        let expires = expiry(ttl_seconds);

        password_reset_tokens::ActiveModel {
            token: Set(token.clone()),
            email: Set(email.to_string()),
            expires: Set(expires),
        }
        .insert(&self.conn)
        .await
        .context("Failed to insert reset token")?;

        Ok(token)
    }

    /// Consume a reset token. Valid only when the row exists, is bound to
    /// the given email and has not expired. The row is deleted on success
    /// and on expiry; a token can never be redeemed twice.
    pub async fn consume_reset(&self, token: &str, email: &str) -> Result<bool> {
        let row = password_reset_tokens::Entity::find_by_id(token.to_string())
            .one(&self.conn)
            .await
            .context("Failed to query reset token")?;

        let Some(row) = row else {
            return Ok(false);
        };

        if row.email != email {
            return Ok(false);
        }

        let live = is_live(&row.expires);

        password_reset_tokens::Entity::delete_by_id(token.to_string())
            .exec(&self.conn)
            .await
            .context("Failed to delete reset token")?;

        Ok(live)
    }

    pub async fn issue_verification(&self, email: &str, ttl_seconds: i64) -> Result<String> {
        email_verification_tokens::Entity::delete_many()
            .filter(email_verification_tokens::Column::Email.eq(email))
            .exec(&self.conn)
            .await
            .context("Failed to clear previous verification tokens")?;

        let token = generate_token();
        let expires = expiry(ttl_seconds);

        email_verification_tokens::ActiveModel {
            token: Set(token.clone()),
            email: Set(email.to_string()),
            expires: Set(expires),
        }
        .insert(&self.conn)
        .await
        .context("Failed to insert verification token")?;

        Ok(token)
    }

    pub async fn consume_verification(&self, token: &str, email: &str) -> Result<bool> {
        let row = email_verification_tokens::Entity::find_by_id(token.to_string())
            .one(&self.conn)
            .await
            .context("Failed to query verification token")?;

        let Some(row) = row else {
            return Ok(false);
        };

        if row.email != email {
            return Ok(false);
        }

        let live = is_live(&row.expires);

        email_verification_tokens::Entity::delete_by_id(token.to_string())
            .exec(&self.conn)
            .await
            .context("Failed to delete verification token")?;

        Ok(live)
    }
}

fn expiry(ttl_seconds: i64) -> String {
    (chrono::Utc::now() + chrono::Duration::seconds(ttl_seconds)).to_rfc3339()
}

fn is_live(expires: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(expires)
        .map(|t| t > chrono::Utc::now())
        .unwrap_or(false)
}

/// Generate a random single-use token (64 character hex string).
#[must_use]
pub fn generate_token() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();

    bytes.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}
