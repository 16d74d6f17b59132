//! Upload staging, validation and path confinement.
//!
//! Files arrive as multipart parts, are validated and written into a
//! staging directory first, and only move under the public upload root once
//! the whole request has passed validation. Every path we touch is built
//! from vetted components and checked to stay under the root.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
pub const MAX_PDF_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Type de fichier non autorisé")]
    UnsupportedType,

    #[error("Fichier trop volumineux")]
    TooLarge,

    #[error("Chemin de fichier invalide")]
    InvalidPath,

    #[error("Fichier introuvable")]
    NotFound,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Pdf,
}

/// A validated file sitting in the staging directory, not yet public.
#[derive(Debug)]
pub struct StagedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub kind: FileKind,
}

#[derive(Clone)]
pub struct UploadStore {
    root: PathBuf,
    staging: PathBuf,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>, staging: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        let staging = staging.into();
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(&staging)?;
        Ok(Self { root, staging })
    }

    /// Validate and write one uploaded part into the staging directory.
    /// The stored name is a fresh UUID with an extension derived from the
    /// declared content type, so client-supplied names never reach disk.
    pub async fn stage(
        &self,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<StagedFile, UploadError> {
        let (kind, ext) = classify(content_type).ok_or(UploadError::UnsupportedType)?;

        let limit = match kind {
            FileKind::Image => MAX_IMAGE_BYTES,
            FileKind::Pdf => MAX_PDF_BYTES,
        };
        if bytes.len() > limit {
            return Err(UploadError::TooLarge);
        }

        let file_name = format!("{}.{ext}", uuid::Uuid::new_v4());
        let path = self.staging.join(&file_name);
        tokio::fs::write(&path, bytes).await?;

        Ok(StagedFile {
            path,
            file_name,
            kind,
        })
    }

    /// Move a staged file into the public directory for a slug. Returns the
    /// path relative to the upload root, as stored in the database.
    pub async fn publish(&self, staged: StagedFile, slug: &str) -> Result<String, UploadError> {
        let dir = self.public_dir(slug)?;
        tokio::fs::create_dir_all(&dir).await?;

        let dest = dir.join(&staged.file_name);
        confine(&self.root, &dest)?;

        // rename does not cross filesystems; staging lives under the root.
        if tokio::fs::rename(&staged.path, &dest).await.is_err() {
            tokio::fs::copy(&staged.path, &dest).await?;
            discard_path(&staged.path).await;
        }

        Ok(format!("{slug}/{}", staged.file_name))
    }

    /// Resolve a public file for serving. 404-equivalent on anything that
    /// is missing or would escape the root.
    pub fn resolve(&self, slug: &str, file_name: &str) -> Result<PathBuf, UploadError> {
        let dir = self.public_dir(slug)?;
        let path = dir.join(vet_component(file_name)?);
        confine(&self.root, &path)?;

        if !path.is_file() {
            return Err(UploadError::NotFound);
        }

        Ok(path)
    }

    /// Move every file of a slug directory to a new slug, for title renames.
    pub async fn relocate(&self, old_slug: &str, new_slug: &str) -> Result<(), UploadError> {
        let old_dir = self.public_dir(old_slug)?;
        let new_dir = self.public_dir(new_slug)?;

        if !old_dir.is_dir() {
            return Ok(());
        }
        tokio::fs::create_dir_all(&new_dir).await?;

        let mut entries = tokio::fs::read_dir(&old_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let dest = new_dir.join(entry.file_name());
            confine(&self.root, &dest)?;
            if dest.exists() {
                // Same name already present at the destination, drop the
                // stale copy.
                discard_path(&entry.path()).await;
            } else {
                tokio::fs::rename(entry.path(), dest).await?;
            }
        }

        discard_dir(&old_dir).await;
        Ok(())
    }

    /// Remove the whole directory tree for a slug. Best effort.
    pub async fn remove_slug(&self, slug: &str) -> Result<(), UploadError> {
        let dir = self.public_dir(slug)?;
        if dir.is_dir() {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                warn!("Failed to remove upload directory {}: {}", dir.display(), e);
            }
        }
        Ok(())
    }

    /// Drop a staged file that will not be published. Best effort.
    pub async fn discard(&self, staged: StagedFile) {
        discard_path(&staged.path).await;
    }

    /// Remove a previously published file given its stored relative path.
    pub async fn remove_relative(&self, relative: &str) -> Result<(), UploadError> {
        let mut path = self.root.clone();
        for part in relative.split('/') {
            path = path.join(vet_component(part)?);
        }
        confine(&self.root, &path)?;
        discard_path(&path).await;
        Ok(())
    }

    fn public_dir(&self, slug: &str) -> Result<PathBuf, UploadError> {
        Ok(self.root.join(vet_component(slug)?))
    }
}

async fn discard_path(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove file {}: {}", path.display(), e);
        }
    }
}

async fn discard_dir(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove directory {}: {}", path.display(), e);
        }
    }
}

/// A single path component from the outside world: no separators, no
/// parent references, nothing hidden.
fn vet_component(part: &str) -> Result<&str, UploadError> {
    if part.is_empty()
        || part == "."
        || part == ".."
        || part.starts_with('.')
        || part.contains('/')
        || part.contains('\\')
        || part.contains('\0')
    {
        return Err(UploadError::InvalidPath);
    }
    Ok(part)
}

/// Reject any constructed path that lexically escapes the root.
fn confine(root: &Path, path: &Path) -> Result<(), UploadError> {
    use std::path::Component;

    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(UploadError::InvalidPath);
    }
    if !path.starts_with(root) {
        return Err(UploadError::InvalidPath);
    }
    Ok(())
}

fn classify(content_type: &str) -> Option<(FileKind, &'static str)> {
    match content_type {
        "image/jpeg" => Some((FileKind::Image, "jpg")),
        "image/png" => Some((FileKind::Image, "png")),
        "image/webp" => Some((FileKind::Image, "webp")),
        "application/pdf" => Some((FileKind::Pdf, "pdf")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> UploadStore {
        let base = std::env::temp_dir().join(format!("uploads-test-{}", uuid::Uuid::new_v4()));
        UploadStore::new(base.join("public"), base.join("staging")).unwrap()
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("image/png"), Some((FileKind::Image, "png")));
        assert_eq!(classify("application/pdf"), Some((FileKind::Pdf, "pdf")));
        assert_eq!(classify("image/gif"), None);
        assert_eq!(classify("text/html"), None);
    }

    #[test]
    fn test_vet_component_rejects_traversal() {
        assert!(vet_component("..").is_err());
        assert!(vet_component("a/b").is_err());
        assert!(vet_component("a\\b").is_err());
        assert!(vet_component(".hidden").is_err());
        assert!(vet_component("").is_err());
        assert!(vet_component("photo.jpg").is_ok());
    }

    #[tokio::test]
    async fn test_stage_rejects_oversized_image() {
        let store = store();
        let big = vec![0u8; MAX_IMAGE_BYTES + 1];
        assert!(matches!(
            store.stage("image/jpeg", &big).await,
            Err(UploadError::TooLarge)
        ));
    }

    #[tokio::test]
    async fn test_stage_and_publish() {
        let store = store();
        let staged = store.stage("image/png", b"not-really-a-png").await.unwrap();
        assert!(staged.path.is_file());

        let relative = store.publish(staged, "tournoi-d-ete").await.unwrap();
        assert!(relative.starts_with("tournoi-d-ete/"));

        let (slug, name) = relative.split_once('/').unwrap();
        let resolved = store.resolve(slug, name).unwrap();
        assert!(resolved.is_file());
    }

    #[tokio::test]
    async fn test_resolve_rejects_escape() {
        let store = store();
        assert!(matches!(
            store.resolve("..", "x"),
            Err(UploadError::InvalidPath)
        ));
        assert!(matches!(
            store.resolve("slug", "../secret"),
            Err(UploadError::InvalidPath)
        ));
        assert!(matches!(
            store.resolve("slug", "missing.png"),
            Err(UploadError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_relocate_moves_files() {
        let store = store();
        let staged = store.stage("image/webp", b"bytes").await.unwrap();
        let relative = store.publish(staged, "old-slug").await.unwrap();
        let name = relative.split_once('/').unwrap().1.to_string();

        store.relocate("old-slug", "new-slug").await.unwrap();
        assert!(store.resolve("new-slug", &name).is_ok());
        assert!(store.resolve("old-slug", &name).is_err());
    }
}
