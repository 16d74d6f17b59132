use sea_orm::entity::prelude::*;

/// Single-use password reset token. Deleted on consumption.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "password_reset_tokens")]
pub struct Model {
    /// 64-char random hex string.
    #[sea_orm(primary_key, auto_increment = false)]
    pub token: String,

    pub email: String,

    /// RFC 3339 expiry timestamp.
    pub expires: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
