use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::{ApiError, AppState};

/// GET /uploads/{slug}/{filename}
///
/// Serves a published file. Anything outside the upload root, including
/// traversal attempts, is a plain 404.
pub async fn serve_upload(
    State(state): State<Arc<AppState>>,
    Path((slug, filename)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let path = state.uploads().resolve(&slug, &filename)?;

    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::NotFound("Fichier introuvable".to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, mime.essence_str().to_string()),
            (
                header::CACHE_CONTROL,
                "public, max-age=86400".to_string(),
            ),
        ],
        bytes,
    )
        .into_response())
}
