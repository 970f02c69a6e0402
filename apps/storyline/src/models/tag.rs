use serde::{Deserialize, Serialize};

use crate::models::Language;

/// A row of the `tags` table. Posts reference tags by `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(default)]
    pub en: Option<String>,
    #[serde(default)]
    pub he: Option<String>,
    #[serde(default)]
    pub ru: Option<String>,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            en: None,
            he: None,
            ru: None,
        }
    }

    /// Label in `language`, falling back to English and then to the raw name.
    pub fn label(&self, language: Language) -> &str {
        let translated = match language {
            Language::En => self.en.as_deref(),
            Language::He => self.he.as_deref(),
            Language::Ru => self.ru.as_deref(),
        };
        translated
            .filter(|s| !s.is_empty())
            .or_else(|| self.en.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or(&self.name)
    }

    /// Same translations under a different name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_fallbacks() {
        let mut tag = Tag::new("folklore");
        assert_eq!(tag.label(Language::He), "folklore");
        tag.en = Some("Folklore".into());
        assert_eq!(tag.label(Language::Ru), "Folklore");
        tag.ru = Some("Фольклор".into());
        assert_eq!(tag.label(Language::Ru), "Фольклор");
    }
}
