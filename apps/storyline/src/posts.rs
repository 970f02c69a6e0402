//! Posts: the story lists and the admin post operations.
//!
//! Every mutation keeps the loaded lists coherent: the admin list is edited
//! in place, the reader list is invalidated so its next load refetches.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::backend::{BackendError, DataApi, ErrorClass, PostScope};
use crate::errors::AppError;
use crate::loader::{LoadSource, Loader};
use crate::models::{Post, PostStatus};
use crate::optimistic;
use crate::resilient::Remote;

pub struct PostsSource {
    api: Arc<dyn DataApi>,
    scope: PostScope,
}

impl PostsSource {
    pub fn new(api: Arc<dyn DataApi>, scope: PostScope) -> Self {
        Self { api, scope }
    }
}

#[async_trait]
impl LoadSource<Post> for PostsSource {
    fn name(&self) -> &'static str {
        match self.scope {
            PostScope::Published => "posts",
            PostScope::All => "admin_posts",
        }
    }

    async fn fetch(&self, token: Option<String>) -> Result<Vec<Post>, BackendError> {
        self.api.list_posts(token.as_deref(), self.scope).await
    }
}

/// The reader list (published only) and the admin list (everything).
#[derive(Clone)]
pub struct PostLists {
    pub published: Arc<Loader<Post>>,
    pub all: Arc<Loader<Post>>,
}

impl PostLists {
    /// Puts `post` into the admin list and marks the reader list stale.
    pub fn upserted(&self, post: &Post) {
        self.all.update_data(|rows| match rows.iter_mut().find(|p| p.id == post.id) {
            Some(existing) => *existing = post.clone(),
            None => rows.insert(0, post.clone()),
        });
        self.published.invalidate();
    }

    pub fn removed(&self, id: Uuid) {
        self.all.update_data(|rows| rows.retain(|p| p.id != id));
        self.published.update_data(|rows| rows.retain(|p| p.id != id));
        self.published.invalidate();
    }

    fn set_local_status(&self, id: Uuid, status: PostStatus) {
        self.all.update_data(|rows| {
            if let Some(post) = rows.iter_mut().find(|p| p.id == id) {
                post.status = status;
            }
        });
    }
}

pub struct PostService {
    api: Arc<dyn DataApi>,
    remote: Remote,
    lists: PostLists,
}

impl PostService {
    pub fn new(api: Arc<dyn DataApi>, remote: Remote, lists: PostLists) -> Self {
        Self { api, remote, lists }
    }

    pub fn lists(&self) -> &PostLists {
        &self.lists
    }

    pub async fn get(&self, id: Uuid) -> Result<Post, AppError> {
        let api = &self.api;
        let post = self
            .remote
            .call("get_post", move |token| async move {
                api.get_post(token.as_deref(), id).await
            })
            .await?;
        Ok(post)
    }

    /// Reader view of one story: drafts are reported as missing.
    pub async fn get_published(&self, id: Uuid) -> Result<Post, AppError> {
        let post = self.get(id).await?;
        if post.is_published() {
            Ok(post)
        } else {
            Err(AppError::NotFound(format!("Story {id} not found")))
        }
    }

    /// Creates and stores an empty draft authored by the current user.
    pub async fn create_draft(&self) -> Result<Post, AppError> {
        let author = self.remote.session().user_id().ok_or(AppError::Unauthorized)?;
        let draft = Post::new_draft(Some(author), Utc::now().date_naive());
        let api = &self.api;
        let draft_ref = &draft;
        let saved = self
            .remote
            .call("create_post", move |token| async move {
                api.upsert_post(token.as_deref(), draft_ref).await
            })
            .await?;
        info!("Created draft {}", saved.id);
        self.lists.upserted(&saved);
        Ok(saved)
    }

    /// Upserts `post`. The status of an existing post is kept as stored;
    /// only `set_status` changes it.
    pub async fn save(&self, mut post: Post) -> Result<Post, AppError> {
        validate(&mut post)?;

        post.status = match self.get(post.id).await {
            Ok(existing) => existing.status,
            Err(AppError::Backend(e)) if e.class() == ErrorClass::NotFound => PostStatus::Draft,
            Err(AppError::NotFound(_)) => PostStatus::Draft,
            Err(e) => return Err(e),
        };
        if post.user_id.is_none() {
            post.user_id = self.remote.session().user_id();
        }

        let api = &self.api;
        let post_ref = &post;
        let saved = self
            .remote
            .call("save_post", move |token| async move {
                api.upsert_post(token.as_deref(), post_ref).await
            })
            .await?;
        info!("Saved post {}", saved.id);
        self.lists.upserted(&saved);
        Ok(saved)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        let api = &self.api;
        self.remote
            .call("delete_post", move |token| async move {
                api.delete_post(token.as_deref(), id).await
            })
            .await?;
        info!("Deleted post {id}");
        self.lists.removed(id);
        Ok(())
    }

    pub async fn publish(&self, id: Uuid) -> Result<Post, AppError> {
        self.set_status(id, PostStatus::Published).await
    }

    pub async fn unpublish(&self, id: Uuid) -> Result<Post, AppError> {
        self.set_status(id, PostStatus::Draft).await
    }

    /// Flips the status in the admin list right away and rolls it back if
    /// the backend rejects the change.
    async fn set_status(&self, id: Uuid, status: PostStatus) -> Result<Post, AppError> {
        let current = self.get(id).await?;
        if current.status == status {
            return Ok(current);
        }
        let prior = current.status;
        let updated = Post { status, ..current };

        let api = &self.api;
        let updated_ref = &updated;
        let saved = optimistic::commit(
            || self.lists.set_local_status(id, status),
            || self.lists.set_local_status(id, prior),
            self.remote.call("set_post_status", move |token| async move {
                api.upsert_post(token.as_deref(), updated_ref).await
            }),
        )
        .await?;
        info!("Post {id} is now {status:?}");
        self.lists.upserted(&saved);
        Ok(saved)
    }

    /// Records `a` and `b` as translations of each other.
    pub async fn link_translations(&self, a: Uuid, b: Uuid) -> Result<(Post, Post), AppError> {
        if a == b {
            return Err(AppError::Validation(
                "A post cannot be its own translation".to_string(),
            ));
        }
        let mut first = self.get(a).await?;
        let mut second = self.get(b).await?;
        if !first.translations.contains(&b) {
            first.translations.push(b);
        }
        if !second.translations.contains(&a) {
            second.translations.push(a);
        }

        let api = &self.api;
        let mut saved = Vec::with_capacity(2);
        for post in [&first, &second] {
            let post = self
                .remote
                .call("link_translation", move |token| async move {
                    api.upsert_post(token.as_deref(), post).await
                })
                .await?;
            self.lists.upserted(&post);
            saved.push(post);
        }
        let second = saved.pop().ok_or_else(|| anyhow::anyhow!("missing saved post"))?;
        let first = saved.pop().ok_or_else(|| anyhow::anyhow!("missing saved post"))?;
        Ok((first, second))
    }
}

fn validate(post: &mut Post) -> Result<(), AppError> {
    post.title = post.title.trim().to_string();
    if post.title.is_empty() {
        return Err(AppError::Validation("Title is required".to_string()));
    }
    if post.language.is_empty() {
        return Err(AppError::Validation(
            "Select at least one language".to_string(),
        ));
    }
    let mut tags: Vec<String> = Vec::with_capacity(post.tags.len());
    for tag in post.tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    post.tags = tags;
    post.excerpt = post
        .excerpt
        .take()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());
    Ok(())
}
