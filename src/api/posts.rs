use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_sessions::Session;

use super::auth::session_user;
use super::{ApiError, ApiResponse, AppState, MessageResponse};
use crate::services::post_service::{Category, NewPost, PostDto, PostUpdate};
use crate::services::uploads::StagedFile;

#[derive(Deserialize)]
pub struct ListQuery {
    pub category: Option<String>,
}

/// Session must exist (401) and carry the Admin role (403).
async fn require_admin(session: &Session) -> Result<(), ApiError> {
    let user = session_user(session)
        .await?
        .ok_or_else(ApiError::unauthorized)?;

    if user.role.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden())
    }
}

fn parse_category(raw: &str) -> Result<Category, ApiError> {
    Category::parse(raw).ok_or_else(|| ApiError::validation("Catégorie inconnue."))
}

/// Parsed multipart body for post create/update.
struct PostForm {
    title: String,
    content: String,
    category: Category,
    image: Option<StagedFile>,
    pdf: Option<StagedFile>,
}

/// Read a post form, staging file parts as they arrive. Every staged file
/// is discarded again if a later part fails, so a rejected request leaves
/// nothing behind.
async fn read_post_form(state: &AppState, mut multipart: Multipart) -> Result<PostForm, ApiError> {
    let mut title = None;
    let mut content = None;
    let mut category = None;
    let mut image: Option<StagedFile> = None;
    let mut pdf: Option<StagedFile> = None;

    let result = async {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::validation(format!("Formulaire invalide: {e}")))?
        {
            match field.name().unwrap_or_default() {
                "title" => {
                    title = Some(field.text().await.map_err(bad_field)?);
                }
                "content" => {
                    content = Some(field.text().await.map_err(bad_field)?);
                }
                "category" => {
                    let raw = field.text().await.map_err(bad_field)?;
                    category = Some(parse_category(&raw)?);
                }
                "image" => {
                    let content_type = field.content_type().unwrap_or_default().to_string();
                    let bytes = field.bytes().await.map_err(bad_field)?;
                    let staged = state.uploads().stage(&content_type, &bytes).await?;
                    if let Some(previous) = image.replace(staged) {
                        state.uploads().discard(previous).await;
                    }
                }
                "pdf" => {
                    let content_type = field.content_type().unwrap_or_default().to_string();
                    let bytes = field.bytes().await.map_err(bad_field)?;
                    let staged = state.uploads().stage(&content_type, &bytes).await?;
                    if let Some(previous) = pdf.replace(staged) {
                        state.uploads().discard(previous).await;
                    }
                }
                _ => {}
            }
        }

        Ok::<(), ApiError>(())
    }
    .await;

    if let Err(e) = result {
        if let Some(staged) = image {
            state.uploads().discard(staged).await;
        }
        if let Some(staged) = pdf {
            state.uploads().discard(staged).await;
        }
        return Err(e);
    }

    let (Some(title), Some(content), Some(category)) = (title, content, category) else {
        if let Some(staged) = image {
            state.uploads().discard(staged).await;
        }
        if let Some(staged) = pdf {
            state.uploads().discard(staged).await;
        }
        return Err(ApiError::validation(
            "Titre, contenu et catégorie sont requis.",
        ));
    };

    Ok(PostForm {
        title,
        content,
        category,
        image,
        pdf,
    })
}

fn bad_field(e: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::validation(format!("Formulaire invalide: {e}"))
}

/// GET /api/posts
pub async fn list_posts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<PostDto>>>, ApiError> {
    let category = query
        .category
        .as_deref()
        .map(parse_category)
        .transpose()?;

    let posts = state.post_service().list(category).await?;
    Ok(Json(ApiResponse::success(posts)))
}

/// GET /api/posts/{slug}
pub async fn get_post(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<ApiResponse<PostDto>>, ApiError> {
    let post = state.post_service().get(&slug).await?;
    Ok(Json(ApiResponse::success(post)))
}

/// POST /api/posts (admin, multipart)
pub async fn create_post(
    State(state): State<Arc<AppState>>,
    session: Session,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<PostDto>>), ApiError> {
    require_admin(&session).await?;

    let form = read_post_form(&state, multipart).await?;

    let Some(image) = form.image else {
        if let Some(staged) = form.pdf {
            state.uploads().discard(staged).await;
        }
        return Err(ApiError::validation("Une image est requise."));
    };

    let post = state
        .post_service()
        .create(NewPost {
            title: form.title,
            content: form.content,
            category: form.category,
            image,
            pdf: form.pdf,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(post))))
}

/// PUT /api/posts/{slug} (admin, multipart)
pub async fn update_post(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(slug): Path<String>,
    multipart: Multipart,
) -> Result<Json<ApiResponse<PostDto>>, ApiError> {
    require_admin(&session).await?;

    let form = read_post_form(&state, multipart).await?;

    let post = state
        .post_service()
        .update(
            &slug,
            PostUpdate {
                title: form.title,
                content: form.content,
                category: form.category,
                image: form.image,
                pdf: form.pdf,
            },
        )
        .await?;

    Ok(Json(ApiResponse::success(post)))
}

/// DELETE /api/posts/{slug} (admin)
pub async fn delete_post(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(slug): Path<String>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    require_admin(&session).await?;

    state.post_service().delete(&slug).await?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Annonce supprimée.",
    ))))
}
