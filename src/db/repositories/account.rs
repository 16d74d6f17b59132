use anyhow::{Context, Result};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use crate::entities::oauth_accounts;

pub struct AccountRepository {
    conn: DatabaseConnection,
}

impl AccountRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get_by_provider_account(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<oauth_accounts::Model>> {
        oauth_accounts::Entity::find()
            .filter(oauth_accounts::Column::Provider.eq(provider))
            .filter(oauth_accounts::Column::ProviderAccountId.eq(provider_account_id))
            .one(&self.conn)
            .await
            .context("Failed to query OAuth account")
    }

    pub async fn link(
        &self,
        user_id: i32,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<oauth_accounts::Model> {
        let model = oauth_accounts::ActiveModel {
            user_id: Set(user_id),
            provider: Set(provider.to_string()),
            provider_account_id: Set(provider_account_id.to_string()),
            created_at: Set(chrono::Utc::now().to_rfc3339()),
            ..Default::default()
        };

        model
            .insert(&self.conn)
            .await
            .context("Failed to link OAuth account")
    }
}
