use anyhow::{Context, Result};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};

use crate::entities::login_audit;

pub struct AuditRepository {
    conn: DatabaseConnection,
}

impl AuditRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn record_login(&self, user_id: i32, ip: &str) -> Result<()> {
        login_audit::ActiveModel {
            user_id: Set(user_id),
            ip: Set(ip.to_string()),
            created_at: Set(chrono::Utc::now().to_rfc3339()),
            ..Default::default()
        }
        .insert(&self.conn)
        .await
        .context("Failed to record login audit entry")?;

        Ok(())
    }
}
