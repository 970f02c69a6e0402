//! Reader filters: which tags and languages the story list shows and whether
//! read stories are hidden. Each setting is persisted under its own key.
use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::local_state::{
    LocalStore, SELECTED_LANGUAGES_KEY, SELECTED_TAGS_KEY, SHOW_UNREAD_ONLY_KEY,
};
use crate::models::{Language, Post};

/// Empty selections mean "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderFilters {
    #[serde(default)]
    pub selected_tags: Vec<String>,
    #[serde(default)]
    pub selected_languages: Vec<Language>,
    #[serde(default)]
    pub show_unread_only: bool,
}

impl ReaderFilters {
    /// Published stories matching any selected tag and any selected language,
    /// newest first. Unread-only drops the ids in `read`.
    pub fn apply(&self, posts: &[Post], read: &HashSet<Uuid>) -> Vec<Post> {
        let mut shown: Vec<Post> = posts
            .iter()
            .filter(|p| p.is_published())
            .filter(|p| {
                self.selected_tags.is_empty() || self.selected_tags.iter().any(|t| p.has_tag(t))
            })
            .filter(|p| {
                self.selected_languages.is_empty()
                    || p.language.iter().any(|l| self.selected_languages.contains(l))
            })
            .filter(|p| !self.show_unread_only || !read.contains(&p.id))
            .cloned()
            .collect();
        shown.sort_by(|a, b| b.date.cmp(&a.date));
        shown
    }
}

pub struct FilterStore {
    local: Arc<LocalStore>,
}

impl FilterStore {
    pub fn new(local: Arc<LocalStore>) -> Self {
        Self { local }
    }

    /// Malformed stored values fall back to their defaults.
    pub fn load(&self) -> ReaderFilters {
        ReaderFilters {
            selected_tags: self.local.get_json(SELECTED_TAGS_KEY).unwrap_or_default(),
            selected_languages: self
                .local
                .get_json(SELECTED_LANGUAGES_KEY)
                .unwrap_or_default(),
            show_unread_only: self
                .local
                .get_json(SHOW_UNREAD_ONLY_KEY)
                .unwrap_or_default(),
        }
    }

    pub fn save(&self, filters: &ReaderFilters) {
        self.local.set_json(SELECTED_TAGS_KEY, &filters.selected_tags);
        self.local
            .set_json(SELECTED_LANGUAGES_KEY, &filters.selected_languages);
        self.local
            .set_json(SHOW_UNREAD_ONLY_KEY, &filters.show_unread_only);
    }
}
