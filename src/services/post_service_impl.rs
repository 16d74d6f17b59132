//! `SeaORM` implementation of the `PostService` trait.

use async_trait::async_trait;
use tracing::info;

use crate::db::{PostInput, Store};
use crate::services::post_service::{
    Category, NewPost, PostDto, PostError, PostService, PostUpdate,
};
use crate::services::slug::{slugify, with_suffix};
use crate::services::uploads::{FileKind, StagedFile, UploadStore};

pub struct SeaOrmPostService {
    store: Store,
    uploads: UploadStore,
}

impl SeaOrmPostService {
    #[must_use]
    pub const fn new(store: Store, uploads: UploadStore) -> Self {
        Self { store, uploads }
    }

    /// First free slug for a title: the bare slug, then `-1`, `-2`, ….
    /// `keep` exempts the post's own current slug during an update.
    async fn unique_slug(&self, title: &str, keep: Option<&str>) -> Result<String, PostError> {
        let base = slugify(title);
        if base.is_empty() {
            return Err(PostError::Validation("Titre invalide.".to_string()));
        }

        if Some(base.as_str()) == keep || !self.store.post_slug_exists(&base).await? {
            return Ok(base);
        }

        for n in 1.. {
            let candidate = with_suffix(&base, n);
            if Some(candidate.as_str()) == keep
                || !self.store.post_slug_exists(&candidate).await?
            {
                return Ok(candidate);
            }
        }
        unreachable!()
    }

    async fn discard_all(&self, files: Vec<StagedFile>) {
        for file in files {
            self.uploads.discard(file).await;
        }
    }
}

fn require_fields(title: &str, content: &str) -> Result<(), PostError> {
    if title.trim().is_empty() || content.trim().is_empty() {
        return Err(PostError::Validation(
            "Titre et contenu sont requis.".to_string(),
        ));
    }
    Ok(())
}

fn check_kind(file: &StagedFile, expected: FileKind, label: &str) -> Result<(), PostError> {
    if file.kind == expected {
        Ok(())
    } else {
        Err(PostError::Upload(format!("Type de fichier invalide pour {label}")))
    }
}

/// Rewrite the slug prefix of a stored relative path after a relocation.
fn reslug(relative: &str, new_slug: &str) -> String {
    relative
        .rsplit_once('/')
        .map_or_else(|| relative.to_string(), |(_, name)| format!("{new_slug}/{name}"))
}

#[async_trait]
impl PostService for SeaOrmPostService {
    async fn list(&self, category: Option<Category>) -> Result<Vec<PostDto>, PostError> {
        let rows = self
            .store
            .list_posts(category.map(Category::as_str))
            .await?;
        Ok(rows.into_iter().map(PostDto::from).collect())
    }

    async fn get(&self, slug: &str) -> Result<PostDto, PostError> {
        self.store
            .get_post_by_slug(slug)
            .await?
            .map(PostDto::from)
            .ok_or(PostError::NotFound)
    }

    async fn create(&self, input: NewPost) -> Result<PostDto, PostError> {
        if let Err(e) = require_fields(&input.title, &input.content)
            .and_then(|()| check_kind(&input.image, FileKind::Image, "l'image"))
            .and_then(|()| {
                input
                    .pdf
                    .as_ref()
                    .map_or(Ok(()), |pdf| check_kind(pdf, FileKind::Pdf, "le PDF"))
            })
        {
            let mut files = vec![input.image];
            files.extend(input.pdf);
            self.discard_all(files).await;
            return Err(e);
        }

        let slug = match self.unique_slug(&input.title, None).await {
            Ok(slug) => slug,
            Err(e) => {
                let mut files = vec![input.image];
                files.extend(input.pdf);
                self.discard_all(files).await;
                return Err(e);
            }
        };

        let image_path = self.uploads.publish(input.image, &slug).await?;
        let pdf_path = match input.pdf {
            Some(pdf) => Some(self.uploads.publish(pdf, &slug).await?),
            None => None,
        };

        let row = PostInput {
            title: input.title.trim().to_string(),
            content: input.content,
            category: input.category.as_str().to_string(),
            slug: slug.clone(),
            image_path: Some(image_path),
            pdf_path,
        };

        match self.store.create_post(&row).await {
            Ok(model) => {
                info!("Post created: slug={}", slug);
                Ok(PostDto::from(model))
            }
            Err(e) => {
                // The row never landed; do not leave orphaned public files.
                self.uploads.remove_slug(&slug).await.ok();
                Err(PostError::Internal(e.to_string()))
            }
        }
    }

    async fn update(&self, slug: &str, input: PostUpdate) -> Result<PostDto, PostError> {
        if let Err(e) = require_fields(&input.title, &input.content).and_then(|()| {
            input
                .image
                .as_ref()
                .map_or(Ok(()), |img| check_kind(img, FileKind::Image, "l'image"))
                .and_then(|()| {
                    input
                        .pdf
                        .as_ref()
                        .map_or(Ok(()), |pdf| check_kind(pdf, FileKind::Pdf, "le PDF"))
                })
        }) {
            let mut files = Vec::new();
            files.extend(input.image);
            files.extend(input.pdf);
            self.discard_all(files).await;
            return Err(e);
        }

        let Some(existing) = self.store.get_post_by_slug(slug).await? else {
            let mut files = Vec::new();
            files.extend(input.image);
            files.extend(input.pdf);
            self.discard_all(files).await;
            return Err(PostError::NotFound);
        };

        let new_slug = self.unique_slug(&input.title, Some(slug)).await?;

        let mut image_path = existing.image_path.clone();
        let mut pdf_path = existing.pdf_path.clone();

        if new_slug != slug {
            self.uploads.relocate(slug, &new_slug).await?;
            image_path = image_path.map(|p| reslug(&p, &new_slug));
            pdf_path = pdf_path.map(|p| reslug(&p, &new_slug));
        }

        if let Some(image) = input.image {
            if let Some(old) = image_path.take() {
                self.uploads.remove_relative(&old).await.ok();
            }
            image_path = Some(self.uploads.publish(image, &new_slug).await?);
        }

        if let Some(pdf) = input.pdf {
            if let Some(old) = pdf_path.take() {
                self.uploads.remove_relative(&old).await.ok();
            }
            pdf_path = Some(self.uploads.publish(pdf, &new_slug).await?);
        }

        let row = PostInput {
            title: input.title.trim().to_string(),
            content: input.content,
            category: input.category.as_str().to_string(),
            slug: new_slug.clone(),
            image_path,
            pdf_path,
        };

        let updated = self
            .store
            .update_post(existing.id, &row)
            .await?
            .ok_or(PostError::NotFound)?;

        info!("Post updated: slug={}", new_slug);
        Ok(PostDto::from(updated))
    }

    async fn delete(&self, slug: &str) -> Result<(), PostError> {
        let Some(existing) = self.store.get_post_by_slug(slug).await? else {
            return Err(PostError::NotFound);
        };

        self.store.delete_post(existing.id).await?;
        // Row removal is authoritative; file cleanup is best effort.
        self.uploads.remove_slug(slug).await.ok();

        info!("Post deleted: slug={}", slug);
        Ok(())
    }
}
