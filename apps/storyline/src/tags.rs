//! Tags: the tag list and the admin tag operations. Posts reference tags by
//! name, so renaming or deleting a tag rewrites every post that carries it
//! before the tag row itself changes.
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::backend::{BackendError, DataApi};
use crate::errors::AppError;
use crate::loader::{LoadSource, Loader};
use crate::models::{Post, Tag};
use crate::posts::PostLists;
use crate::resilient::Remote;

pub struct TagsSource {
    api: Arc<dyn DataApi>,
}

impl TagsSource {
    pub fn new(api: Arc<dyn DataApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl LoadSource<Tag> for TagsSource {
    fn name(&self) -> &'static str {
        "tags"
    }

    async fn fetch(&self, token: Option<String>) -> Result<Vec<Tag>, BackendError> {
        let mut tags = self.api.list_tags(token.as_deref()).await?;
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }
}

pub struct TagService {
    api: Arc<dyn DataApi>,
    remote: Remote,
    tags: Arc<Loader<Tag>>,
    posts: PostLists,
}

impl TagService {
    pub fn new(api: Arc<dyn DataApi>, remote: Remote, tags: Arc<Loader<Tag>>, posts: PostLists) -> Self {
        Self {
            api,
            remote,
            tags,
            posts,
        }
    }

    pub fn loader(&self) -> &Arc<Loader<Tag>> {
        &self.tags
    }

    /// Creates the tag or replaces its translations.
    pub async fn upsert(&self, mut tag: Tag) -> Result<Tag, AppError> {
        tag.name = clean_name(&tag.name)?;
        for label in [&mut tag.en, &mut tag.he, &mut tag.ru] {
            *label = label
                .take()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty());
        }

        let api = &self.api;
        let tag_ref = &tag;
        let saved = self
            .remote
            .call("upsert_tag", move |token| async move {
                api.upsert_tag(token.as_deref(), tag_ref).await
            })
            .await?;
        self.stored(&saved);
        Ok(saved)
    }

    /// Renames `old` to `new` on the tag row and on every post carrying it.
    /// Returns how many posts were rewritten.
    ///
    /// A failure part way leaves both tag rows in place, so no post ever
    /// references a missing tag.
    pub async fn rename(&self, old: &str, new: &str) -> Result<usize, AppError> {
        let new = clean_name(new)?;
        if new == old {
            return Err(AppError::Validation(
                "The new name must differ from the old one".to_string(),
            ));
        }

        let api = &self.api;
        let existing = self
            .remote
            .call("list_tags", move |token| async move {
                api.list_tags(token.as_deref()).await
            })
            .await?;
        if existing.iter().any(|t| t.name == new) {
            return Err(AppError::Conflict(format!("Tag '{new}' already exists")));
        }
        let current = existing
            .iter()
            .find(|t| t.name == old)
            .ok_or_else(|| AppError::NotFound(format!("Tag '{old}' not found")))?;

        let renamed = current.renamed(new.as_str());
        let renamed_ref = &renamed;
        let saved = self
            .remote
            .call("upsert_tag", move |token| async move {
                api.upsert_tag(token.as_deref(), renamed_ref).await
            })
            .await?;
        self.stored(&saved);

        let count = self
            .rewrite_posts(old, |post| post.rename_tag(old, &new))
            .await?;
        self.delete_row(old).await?;
        info!("Renamed tag '{old}' to '{new}' on {count} posts");
        Ok(count)
    }

    /// Strips `name` from every post, then deletes the tag row. Returns how
    /// many posts were rewritten.
    pub async fn delete(&self, name: &str) -> Result<usize, AppError> {
        let count = self.rewrite_posts(name, |post| post.remove_tag(name)).await?;
        self.delete_row(name).await?;
        info!("Deleted tag '{name}' from {count} posts");
        Ok(count)
    }

    async fn rewrite_posts(
        &self,
        tag: &str,
        mut edit: impl FnMut(&mut Post) -> bool,
    ) -> Result<usize, AppError> {
        let api = &self.api;
        let posts = self
            .remote
            .call("list_posts_with_tag", move |token| async move {
                api.list_posts_with_tag(token.as_deref(), tag).await
            })
            .await?;

        let mut count = 0;
        for mut post in posts {
            if !edit(&mut post) {
                continue;
            }
            let post_ref = &post;
            let saved = self
                .remote
                .call("upsert_post", move |token| async move {
                    api.upsert_post(token.as_deref(), post_ref).await
                })
                .await?;
            self.posts.upserted(&saved);
            count += 1;
        }
        Ok(count)
    }

    async fn delete_row(&self, name: &str) -> Result<(), AppError> {
        let api = &self.api;
        self.remote
            .call("delete_tag", move |token| async move {
                api.delete_tag(token.as_deref(), name).await
            })
            .await?;
        self.tags.update_data(|rows| rows.retain(|t| t.name != name));
        Ok(())
    }

    fn stored(&self, tag: &Tag) {
        self.tags.update_data(|rows| {
            match rows.iter_mut().find(|t| t.name == tag.name) {
                Some(existing) => *existing = tag.clone(),
                None => rows.push(tag.clone()),
            }
            rows.sort_by(|a, b| a.name.cmp(&b.name));
        });
    }
}

fn clean_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Tag name is required".to_string()));
    }
    Ok(name.to_string())
}
