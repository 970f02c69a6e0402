use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::errors::AppError;
use crate::filters::ReaderFilters;
use crate::models::{AboutContent, Language, Post, Tag};
use crate::read_status::ReadStatus;
use crate::state::AppState;

#[derive(Deserialize, Default)]
pub struct RefreshQuery {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Deserialize)]
pub struct LanguageQuery {
    pub lang: Option<Language>,
}

#[derive(Serialize)]
pub struct StoriesResponse {
    pub stories: Vec<Post>,
    pub filters: ReaderFilters,
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct StoryResponse {
    pub story: Post,
    pub read_status: Option<ReadStatus>,
}

#[derive(Serialize)]
pub struct ReadStatusResponse {
    pub post_id: Uuid,
    pub read_status: ReadStatus,
}

#[derive(Serialize)]
pub struct TagsResponse {
    pub tags: Vec<Tag>,
    pub error: Option<String>,
}

/// GET /api/v1/stories
/// Published stories after the saved reader filters. A failed load still
/// returns the last loaded rows along with the error.
pub async fn handle_list_stories(
    State(state): State<AppState>,
    Query(params): Query<RefreshQuery>,
) -> Result<Json<StoriesResponse>, AppError> {
    let loaded = state
        .posts
        .lists()
        .published
        .load_settled(params.refresh)
        .await;
    let filters = state.filters.load();

    let mut error = loaded.error;
    if filters.show_unread_only && state.session.user_id().is_some() {
        let history = state.history.loader().load_settled(params.refresh).await;
        error = error.or(history.error);
    }
    let stories = filters.apply(&loaded.data, &state.history.read_post_ids());

    Ok(Json(StoriesResponse {
        stories,
        filters,
        error,
    }))
}

/// GET /api/v1/stories/:id
/// Signed-in readers get the story's read status, and an unread story is
/// marked read once per view.
pub async fn handle_get_story(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StoryResponse>, AppError> {
    let story = state.posts.get_published(id).await?;

    let read_status = match state.session.user_id() {
        Some(user_id) => {
            let sync = state.read_status.get(user_id, id);
            sync.begin_view();
            if matches!(sync.status(), ReadStatus::Unknown) {
                if let Err(e) = sync.check().await {
                    warn!("Could not check read status of {id}: {e}");
                }
            }
            if let Err(e) = sync.auto_mark_read().await {
                warn!("Could not mark {id} read: {e}");
            }
            Some(sync.status())
        }
        None => None,
    };

    Ok(Json(StoryResponse { story, read_status }))
}

/// POST /api/v1/stories/:id/read
/// Toggles the story between read and unread.
pub async fn handle_toggle_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReadStatusResponse>, AppError> {
    let user_id = state.session.user_id().ok_or(AppError::Unauthorized)?;
    let sync = state.read_status.get(user_id, id);
    if matches!(sync.status(), ReadStatus::Unknown) {
        sync.check().await?;
    }
    let read_status = sync.toggle().await?;
    Ok(Json(ReadStatusResponse {
        post_id: id,
        read_status,
    }))
}

/// GET /api/v1/filters
pub async fn handle_get_filters(State(state): State<AppState>) -> Json<ReaderFilters> {
    Json(state.filters.load())
}

/// PUT /api/v1/filters
pub async fn handle_put_filters(
    State(state): State<AppState>,
    Json(filters): Json<ReaderFilters>,
) -> Json<ReaderFilters> {
    state.filters.save(&filters);
    Json(filters)
}

/// GET /api/v1/tags
pub async fn handle_list_tags(
    State(state): State<AppState>,
    Query(params): Query<RefreshQuery>,
) -> Json<TagsResponse> {
    let loaded = state.tags.loader().load_settled(params.refresh).await;
    Json(TagsResponse {
        tags: loaded.data,
        error: loaded.error,
    })
}

/// GET /api/v1/about
pub async fn handle_get_about(
    State(state): State<AppState>,
    Query(params): Query<LanguageQuery>,
) -> Result<Json<AboutContent>, AppError> {
    let language = params.lang.unwrap_or_default();
    state
        .about
        .get(language)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No about page yet".to_string()))
}
