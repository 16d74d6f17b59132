use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "posts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub title: String,

    pub content: String,

    /// One of the club sections: VTT, Basket, Boule, Tennis, Gym.
    pub category: String,

    #[sea_orm(unique)]
    pub slug: String,

    /// Relative path under the upload root (`<slug>/<uuid>.<ext>`).
    /// Mandatory at creation time; enforced by the service.
    pub image_path: Option<String>,

    pub pdf_path: Option<String>,

    pub newsletter_sent: bool,

    pub created_at: String,

    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
