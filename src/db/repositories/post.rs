use anyhow::{Context, Result};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};

use crate::entities::posts;

#[derive(Debug, Clone)]
pub struct PostInput {
    pub title: String,
    pub content: String,
    pub category: String,
    pub slug: String,
    pub image_path: Option<String>,
    pub pdf_path: Option<String>,
}

pub struct PostRepository {
    conn: DatabaseConnection,
}

impl PostRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn create(&self, input: &PostInput) -> Result<posts::Model> {
        let now = chrono::Utc::now().to_rfc3339();

        posts::ActiveModel {
            title: Set(input.title.clone()),
            content: Set(input.content.clone()),
            category: Set(input.category.clone()),
            slug: Set(input.slug.clone()),
            image_path: Set(input.image_path.clone()),
            pdf_path: Set(input.pdf_path.clone()),
            newsletter_sent: Set(false),
            created_at: Set(now.clone()),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.conn)
        .await
        .context("Failed to insert post")
    }

    pub async fn get(&self, id: i32) -> Result<Option<posts::Model>> {
        posts::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query post by ID")
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<posts::Model>> {
        posts::Entity::find()
            .filter(posts::Column::Slug.eq(slug))
            .one(&self.conn)
            .await
            .context("Failed to query post by slug")
    }

    pub async fn slug_exists(&self, slug: &str) -> Result<bool> {
        let found = posts::Entity::find()
            .filter(posts::Column::Slug.eq(slug))
            .one(&self.conn)
            .await
            .context("Failed to check slug existence")?;

        Ok(found.is_some())
    }

    /// Newest first, optionally restricted to one category.
    pub async fn list(&self, category: Option<&str>) -> Result<Vec<posts::Model>> {
        let mut query = posts::Entity::find().order_by_desc(posts::Column::CreatedAt);

        if let Some(category) = category {
            query = query.filter(posts::Column::Category.eq(category));
        }

        query.all(&self.conn).await.context("Failed to list posts")
    }

    pub async fn update(&self, id: i32, input: &PostInput) -> Result<Option<posts::Model>> {
        let post = posts::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query post for update")?;

        let Some(post) = post else {
            return Ok(None);
        };

        let now = chrono::Utc::now().to_rfc3339();
        let mut active: posts::ActiveModel = post.into();
        active.title = Set(input.title.clone());
        active.content = Set(input.content.clone());
        active.category = Set(input.category.clone());
        active.slug = Set(input.slug.clone());
        active.image_path = Set(input.image_path.clone());
        active.pdf_path = Set(input.pdf_path.clone());
        active.updated_at = Set(now);

        let updated = active
            .update(&self.conn)
            .await
            .context("Failed to update post")?;

        Ok(Some(updated))
    }

    /// Delete a post and return the removed row so callers can clean up its
    /// files on disk.
    pub async fn delete(&self, id: i32) -> Result<Option<posts::Model>> {
        let post = posts::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query post for deletion")?;

        let Some(post) = post else {
            return Ok(None);
        };

        posts::Entity::delete_by_id(id)
            .exec(&self.conn)
            .await
            .context("Failed to delete post")?;

        Ok(Some(post))
    }

    /// Posts not yet announced by the newsletter job, oldest first.
    pub async fn newsletter_pending(&self) -> Result<Vec<posts::Model>> {
        posts::Entity::find()
            .filter(posts::Column::NewsletterSent.eq(false))
            .order_by_asc(posts::Column::CreatedAt)
            .all(&self.conn)
            .await
            .context("Failed to query newsletter-pending posts")
    }

    pub async fn mark_newsletter_sent(&self, id: i32) -> Result<()> {
        let post = posts::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query post for newsletter flag")?
            .ok_or_else(|| anyhow::anyhow!("Post not found: {id}"))?;

        let mut active: posts::ActiveModel = post.into();
        active.newsletter_sent = Set(true);
        active.update(&self.conn).await?;

        Ok(())
    }
}
