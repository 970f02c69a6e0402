use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Published,
}

/// A story row of the `entries` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub excerpt: Option<String>,
    pub date: NaiveDate,
    #[serde(default)]
    pub language: Vec<Language>,
    pub status: PostStatus,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub translations: Vec<Uuid>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    // Server-managed; stripped before upsert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Post {
    /// A fresh draft as created by the admin "new post" action.
    pub fn new_draft(author: Option<Uuid>, today: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: String::new(),
            content: String::new(),
            excerpt: None,
            date: today,
            language: vec![Language::En],
            status: PostStatus::Draft,
            image_url: None,
            tags: Vec::new(),
            translations: Vec::new(),
            user_id: author,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn is_published(&self) -> bool {
        self.status == PostStatus::Published
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t == name)
    }

    /// Replaces `old` with `new` in the tag list, keeping order and dropping duplicates.
    /// Returns whether anything changed.
    pub fn rename_tag(&mut self, old: &str, new: &str) -> bool {
        if !self.has_tag(old) {
            return false;
        }
        let mut renamed: Vec<String> = Vec::with_capacity(self.tags.len());
        for tag in self.tags.drain(..) {
            let tag = if tag == old { new.to_string() } else { tag };
            if !renamed.contains(&tag) {
                renamed.push(tag);
            }
        }
        self.tags = renamed;
        true
    }

    /// Removes `name` from the tag list. Returns whether anything changed.
    pub fn remove_tag(&mut self, name: &str) -> bool {
        let before = self.tags.len();
        self.tags.retain(|t| t != name);
        self.tags.len() != before
    }

    /// Copy without the server-managed timestamps, as sent on upsert.
    pub fn without_timestamps(&self) -> Post {
        Post {
            created_at: None,
            updated_at: None,
            ..self.clone()
        }
    }

    /// Equality on every field except the server-managed timestamps.
    pub fn same_content(&self, other: &Post) -> bool {
        self.without_timestamps() == other.without_timestamps()
    }

    /// Excerpt shown in the story list: the stored excerpt, or the first
    /// `max_chars` characters of the content.
    pub fn display_excerpt(&self, max_chars: usize) -> String {
        if let Some(excerpt) = self.excerpt.as_deref().filter(|e| !e.trim().is_empty()) {
            return excerpt.to_string();
        }
        let mut out: String = self.content.chars().take(max_chars).collect();
        if self.content.chars().count() > max_chars {
            out.push('…');
        }
        out
    }
}
