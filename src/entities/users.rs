use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub name: String,

    /// Stored lowercased and trimmed; unique.
    #[sea_orm(unique)]
    pub email: String,

    /// Argon2id password hash. None for OAuth-only accounts.
    pub password_hash: Option<String>,

    /// RFC 3339 timestamp of email verification. None = unverified.
    pub email_verified: Option<String>,

    pub newsletter_subscribed: bool,

    pub phone: Option<String>,

    /// Relative path under the upload root (`avatars/<uuid>.<ext>`).
    pub avatar_path: Option<String>,

    pub created_at: String,

    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::oauth_accounts::Entity")]
    OauthAccounts,
}

impl Related<super::oauth_accounts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OauthAccounts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
