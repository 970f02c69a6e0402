//! Admin surfaces. Every handler passes through `AdminGate::require_admin`
//! first; the backend enforces the role again on each write.
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{AboutContent, Language, ManagedUser, Post, Tag};
use crate::routes::reader::RefreshQuery;
use crate::state::AppState;

#[derive(Serialize)]
pub struct PostsResponse {
    pub posts: Vec<Post>,
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct LinkTranslationRequest {
    pub post_id: Uuid,
}

#[derive(Serialize)]
pub struct LinkTranslationResponse {
    pub post: Post,
    pub translation: Post,
}

#[derive(Deserialize)]
pub struct TagLabels {
    pub en: Option<String>,
    pub he: Option<String>,
    pub ru: Option<String>,
}

#[derive(Deserialize)]
pub struct RenameTagRequest {
    pub new_name: String,
}

#[derive(Serialize)]
pub struct TagChangeResponse {
    pub posts_updated: usize,
}

#[derive(Deserialize)]
pub struct AboutUpdateRequest {
    pub language: Language,
    pub content: String,
}

/// GET /api/v1/admin/posts
pub async fn handle_list_posts(
    State(state): State<AppState>,
    Query(params): Query<RefreshQuery>,
) -> Result<Json<PostsResponse>, AppError> {
    state.admin.require_admin().await?;
    let loaded = state.posts.lists().all.load_settled(params.refresh).await;
    Ok(Json(PostsResponse {
        posts: loaded.data,
        error: loaded.error,
    }))
}

/// POST /api/v1/admin/posts
pub async fn handle_create_post(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Post>), AppError> {
    state.admin.require_admin().await?;
    let post = state.posts.create_draft().await?;
    Ok((StatusCode::CREATED, Json(post)))
}

/// GET /api/v1/admin/posts/:id
pub async fn handle_get_post(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Post>, AppError> {
    state.admin.require_admin().await?;
    Ok(Json(state.posts.get(id).await?))
}

/// PUT /api/v1/admin/posts/:id
pub async fn handle_save_post(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(mut post): Json<Post>,
) -> Result<Json<Post>, AppError> {
    state.admin.require_admin().await?;
    post.id = id;
    Ok(Json(state.posts.save(post).await?))
}

/// DELETE /api/v1/admin/posts/:id
pub async fn handle_delete_post(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.admin.require_admin().await?;
    state.posts.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/admin/posts/:id/publish
pub async fn handle_publish_post(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Post>, AppError> {
    state.admin.require_admin().await?;
    Ok(Json(state.posts.publish(id).await?))
}

/// POST /api/v1/admin/posts/:id/unpublish
pub async fn handle_unpublish_post(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Post>, AppError> {
    state.admin.require_admin().await?;
    Ok(Json(state.posts.unpublish(id).await?))
}

/// POST /api/v1/admin/posts/:id/translations
pub async fn handle_link_translation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<LinkTranslationRequest>,
) -> Result<Json<LinkTranslationResponse>, AppError> {
    state.admin.require_admin().await?;
    let (post, translation) = state.posts.link_translations(id, req.post_id).await?;
    Ok(Json(LinkTranslationResponse { post, translation }))
}

/// POST /api/v1/admin/tags
pub async fn handle_create_tag(
    State(state): State<AppState>,
    Json(tag): Json<Tag>,
) -> Result<(StatusCode, Json<Tag>), AppError> {
    state.admin.require_admin().await?;
    let tag = state.tags.upsert(tag).await?;
    Ok((StatusCode::CREATED, Json(tag)))
}

/// PUT /api/v1/admin/tags/:name
pub async fn handle_update_tag(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(labels): Json<TagLabels>,
) -> Result<Json<Tag>, AppError> {
    state.admin.require_admin().await?;
    let tag = Tag {
        name,
        en: labels.en,
        he: labels.he,
        ru: labels.ru,
    };
    Ok(Json(state.tags.upsert(tag).await?))
}

/// DELETE /api/v1/admin/tags/:name
pub async fn handle_delete_tag(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<TagChangeResponse>, AppError> {
    state.admin.require_admin().await?;
    let posts_updated = state.tags.delete(&name).await?;
    Ok(Json(TagChangeResponse { posts_updated }))
}

/// POST /api/v1/admin/tags/:name/rename
pub async fn handle_rename_tag(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<RenameTagRequest>,
) -> Result<Json<TagChangeResponse>, AppError> {
    state.admin.require_admin().await?;
    let posts_updated = state.tags.rename(&name, &req.new_name).await?;
    Ok(Json(TagChangeResponse { posts_updated }))
}

/// GET /api/v1/admin/users
pub async fn handle_list_users(
    State(state): State<AppState>,
) -> Result<Json<Vec<ManagedUser>>, AppError> {
    state.admin.require_admin().await?;
    Ok(Json(state.users.list().await?))
}

/// PUT /api/v1/admin/users/:id/admin
pub async fn handle_grant_admin(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.admin.require_admin().await?;
    state.users.grant_admin(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/admin/users/:id/admin
pub async fn handle_revoke_admin(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.admin.require_admin().await?;
    state.users.revoke_admin(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/admin/about
pub async fn handle_update_about(
    State(state): State<AppState>,
    Json(req): Json<AboutUpdateRequest>,
) -> Result<Json<AboutContent>, AppError> {
    state.admin.require_admin().await?;
    Ok(Json(state.about.update(req.language, req.content).await?))
}
