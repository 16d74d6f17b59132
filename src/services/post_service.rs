//! Domain service for announcement posts and their attached files.

use serde::Serialize;
use thiserror::Error;

use crate::entities::posts;
use crate::services::uploads::{StagedFile, UploadError};

#[derive(Debug, Error)]
pub enum PostError {
    #[error("{0}")]
    Validation(String),

    #[error("Annonce introuvable")]
    NotFound,

    #[error("Fichier invalide: {0}")]
    Upload(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for PostError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for PostError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<UploadError> for PostError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::UnsupportedType | UploadError::TooLarge => {
                Self::Upload(err.to_string())
            }
            UploadError::NotFound => Self::NotFound,
            UploadError::InvalidPath => Self::Upload(err.to_string()),
            UploadError::Io(e) => Self::Internal(e.to_string()),
        }
    }
}

/// The club's sections. Posts are filed under exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    Vtt,
    Basket,
    Boule,
    Tennis,
    Gym,
}

impl Category {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vtt => "VTT",
            Self::Basket => "Basket",
            Self::Boule => "Boule",
            Self::Tennis => "Tennis",
            Self::Gym => "Gym",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "VTT" => Some(Self::Vtt),
            "Basket" => Some(Self::Basket),
            "Boule" => Some(Self::Boule),
            "Tennis" => Some(Self::Tennis),
            "Gym" => Some(Self::Gym),
            _ => None,
        }
    }
}

/// Post DTO for responses.
#[derive(Debug, Clone, Serialize)]
pub struct PostDto {
    pub id: i32,
    pub title: String,
    pub content: String,
    pub category: String,
    pub slug: String,
    pub image_path: Option<String>,
    pub pdf_path: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<posts::Model> for PostDto {
    fn from(model: posts::Model) -> Self {
        Self {
            id: model.id,
            title: model.title,
            content: model.content,
            category: model.category,
            slug: model.slug,
            image_path: model.image_path,
            pdf_path: model.pdf_path,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Input for creation. The image is mandatory; the PDF is not.
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub category: Category,
    pub image: StagedFile,
    pub pdf: Option<StagedFile>,
}

/// Input for update. Absent files mean "keep the current ones".
pub struct PostUpdate {
    pub title: String,
    pub content: String,
    pub category: Category,
    pub image: Option<StagedFile>,
    pub pdf: Option<StagedFile>,
}

/// Domain service trait for posts.
#[async_trait::async_trait]
pub trait PostService: Send + Sync {
    async fn list(&self, category: Option<Category>) -> Result<Vec<PostDto>, PostError>;

    async fn get(&self, slug: &str) -> Result<PostDto, PostError>;

    /// Creates a post. The slug is derived from the title; collisions get a
    /// numeric suffix.
    async fn create(&self, input: NewPost) -> Result<PostDto, PostError>;

    /// Updates a post. A title change recomputes the slug and relocates the
    /// post's files to the new directory.
    async fn update(&self, slug: &str, input: PostUpdate) -> Result<PostDto, PostError>;

    /// Deletes the post row and its on-disk directory tree.
    async fn delete(&self, slug: &str) -> Result<(), PostError>;
}
