use anyhow::Result;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::config::SecurityConfig;
use crate::entities::{oauth_accounts, posts};

pub mod migrator;
pub mod repositories;

pub use repositories::post::PostInput;
pub use repositories::user::User;

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if !db_url.contains(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    fn user_repo(&self) -> repositories::user::UserRepository {
        repositories::user::UserRepository::new(self.conn.clone())
    }

    fn account_repo(&self) -> repositories::account::AccountRepository {
        repositories::account::AccountRepository::new(self.conn.clone())
    }

    fn post_repo(&self) -> repositories::post::PostRepository {
        repositories::post::PostRepository::new(self.conn.clone())
    }

    fn token_repo(&self) -> repositories::token::TokenRepository {
        repositories::token::TokenRepository::new(self.conn.clone())
    }

    fn audit_repo(&self) -> repositories::audit::AuditRepository {
        repositories::audit::AuditRepository::new(self.conn.clone())
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.user_repo().get_by_email(email).await
    }

    pub async fn get_user_by_id(&self, id: i32) -> Result<Option<User>> {
        self.user_repo().get_by_id(id).await
    }

    pub async fn create_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
        newsletter_subscribed: bool,
        config: &SecurityConfig,
    ) -> Result<User> {
        self.user_repo()
            .create(name, email, password, newsletter_subscribed, config)
            .await
    }

    pub async fn create_user_from_oauth(&self, name: &str, email: &str) -> Result<User> {
        self.user_repo().create_from_oauth(name, email).await
    }

    pub async fn verify_user_password(&self, email: &str, password: &str) -> Result<bool> {
        self.user_repo().verify_password(email, password).await
    }

    pub async fn update_user_password(
        &self,
        user_id: i32,
        new_password: &str,
        config: &SecurityConfig,
    ) -> Result<()> {
        self.user_repo()
            .update_password(user_id, new_password, config)
            .await
    }

    pub async fn mark_email_verified(&self, email: &str) -> Result<bool> {
        self.user_repo().mark_email_verified(email).await
    }

    pub async fn update_user_profile(
        &self,
        user_id: i32,
        name: &str,
        phone: Option<&str>,
    ) -> Result<User> {
        self.user_repo().update_profile(user_id, name, phone).await
    }

    pub async fn update_user_avatar(
        &self,
        user_id: i32,
        avatar_path: Option<&str>,
    ) -> Result<Option<String>> {
        self.user_repo().update_avatar(user_id, avatar_path).await
    }

    pub async fn set_newsletter_subscription(&self, user_id: i32, subscribed: bool) -> Result<()> {
        self.user_repo()
            .set_newsletter_subscription(user_id, subscribed)
            .await
    }

    pub async fn delete_user(&self, user_id: i32) -> Result<bool> {
        self.user_repo().delete(user_id).await
    }

    pub async fn newsletter_recipients(&self) -> Result<Vec<User>> {
        self.user_repo().newsletter_recipients().await
    }

    pub async fn get_oauth_account(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<oauth_accounts::Model>> {
        self.account_repo()
            .get_by_provider_account(provider, provider_account_id)
            .await
    }

    pub async fn link_oauth_account(
        &self,
        user_id: i32,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<oauth_accounts::Model> {
        self.account_repo()
            .link(user_id, provider, provider_account_id)
            .await
    }

    pub async fn create_post(&self, input: &PostInput) -> Result<posts::Model> {
        self.post_repo().create(input).await
    }

    pub async fn get_post(&self, id: i32) -> Result<Option<posts::Model>> {
        self.post_repo().get(id).await
    }

    pub async fn get_post_by_slug(&self, slug: &str) -> Result<Option<posts::Model>> {
        self.post_repo().get_by_slug(slug).await
    }

    pub async fn post_slug_exists(&self, slug: &str) -> Result<bool> {
        self.post_repo().slug_exists(slug).await
    }

    pub async fn list_posts(&self, category: Option<&str>) -> Result<Vec<posts::Model>> {
        self.post_repo().list(category).await
    }

    pub async fn update_post(&self, id: i32, input: &PostInput) -> Result<Option<posts::Model>> {
        self.post_repo().update(id, input).await
    }

    pub async fn delete_post(&self, id: i32) -> Result<Option<posts::Model>> {
        self.post_repo().delete(id).await
    }

    pub async fn newsletter_pending_posts(&self) -> Result<Vec<posts::Model>> {
        self.post_repo().newsletter_pending().await
    }

    pub async fn mark_post_newsletter_sent(&self, id: i32) -> Result<()> {
        self.post_repo().mark_newsletter_sent(id).await
    }

    pub async fn issue_reset_token(&self, email: &str, ttl_seconds: i64) -> Result<String> {
        self.token_repo().issue_reset(email, ttl_seconds).await
    }

    pub async fn consume_reset_token(&self, token: &str, email: &str) -> Result<bool> {
        self.token_repo().consume_reset(token, email).await
    }

    pub async fn issue_verification_token(&self, email: &str, ttl_seconds: i64) -> Result<String> {
        self.token_repo().issue_verification(email, ttl_seconds).await
    }

    pub async fn consume_verification_token(&self, token: &str, email: &str) -> Result<bool> {
        self.token_repo().consume_verification(token, email).await
    }

    pub async fn record_login(&self, user_id: i32, ip: &str) -> Result<()> {
        self.audit_repo().record_login(user_id, ip).await
    }
}
