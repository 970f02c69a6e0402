use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Language;

/// A row of `about_content`, one per language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AboutContent {
    pub language: Language,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}
