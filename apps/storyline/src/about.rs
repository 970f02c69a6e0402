//! The "about" page, stored once per language.
use std::sync::Arc;

use tracing::info;

use crate::backend::DataApi;
use crate::errors::AppError;
use crate::models::{AboutContent, Language};
use crate::resilient::{Remote, RetryPolicy};

pub struct AboutService {
    api: Arc<dyn DataApi>,
    remote: Remote,
}

impl AboutService {
    pub fn new(api: Arc<dyn DataApi>, remote: Remote) -> Self {
        Self { api, remote }
    }

    /// Content in `language`, or the English page when that one is missing.
    pub async fn get(&self, language: Language) -> Result<Option<AboutContent>, AppError> {
        if let Some(about) = self.fetch(language).await? {
            return Ok(Some(about));
        }
        if language == Language::En {
            return Ok(None);
        }
        self.fetch(Language::En).await
    }

    pub async fn update(&self, language: Language, content: String) -> Result<AboutContent, AppError> {
        if content.trim().is_empty() {
            return Err(AppError::Validation("Content is required".to_string()));
        }
        let about = AboutContent {
            language,
            content,
            updated_at: None,
        };
        let api = &self.api;
        let about_ref = &about;
        let saved = self
            .remote
            .with_policy(RetryPolicy::no_retries())
            .call("upsert_about", move |token| async move {
                api.upsert_about(token.as_deref(), about_ref).await
            })
            .await?;
        info!("Updated about page ({language})");
        Ok(saved)
    }

    async fn fetch(&self, language: Language) -> Result<Option<AboutContent>, AppError> {
        let api = &self.api;
        let about = self
            .remote
            .call("get_about", move |token| async move {
                api.get_about(token.as_deref(), language).await
            })
            .await?;
        Ok(about.filter(|a| !a.content.trim().is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::events::EventBus;
    use crate::local_state::LocalStore;
    use crate::session::SessionStore;

    fn service() -> (Arc<FakeBackend>, AboutService) {
        let fake = Arc::new(FakeBackend::new());
        let events = EventBus::new();
        let session = SessionStore::new(fake.clone(), Arc::new(LocalStore::in_memory()), events.clone());
        let remote = Remote::new(session, events, RetryPolicy::default());
        (fake.clone(), AboutService::new(fake, remote))
    }

    #[tokio::test]
    async fn test_falls_back_to_english() {
        let (_fake, about) = service();
        assert_eq!(about.get(Language::Ru).await.unwrap(), None);

        about.update(Language::En, "Stories from old books.".into()).await.unwrap();
        let page = about.get(Language::Ru).await.unwrap().unwrap();
        assert_eq!(page.language, Language::En);

        about.update(Language::Ru, "Истории".into()).await.unwrap();
        assert_eq!(about.get(Language::Ru).await.unwrap().unwrap().content, "Истории");
    }

    #[tokio::test]
    async fn test_blank_content_is_rejected() {
        let (fake, about) = service();
        assert!(matches!(
            about.update(Language::He, "  ".into()).await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(fake.calls("upsert_about"), 0);
    }
}
