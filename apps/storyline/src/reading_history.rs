//! Reading history: which stories the signed-in user has read.
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::backend::{BackendError, DataApi};
use crate::errors::AppError;
use crate::loader::{LoadSource, Loader};
use crate::models::ReadingHistoryItem;
use crate::resilient::Remote;
use crate::session::SessionStore;

/// The current user's rows; signed out there is no history to load.
pub struct ReadingHistorySource {
    api: Arc<dyn DataApi>,
    session: Arc<SessionStore>,
}

impl ReadingHistorySource {
    pub fn new(api: Arc<dyn DataApi>, session: Arc<SessionStore>) -> Self {
        Self { api, session }
    }
}

#[async_trait]
impl LoadSource<ReadingHistoryItem> for ReadingHistorySource {
    fn name(&self) -> &'static str {
        "reading_history"
    }

    async fn fetch(&self, token: Option<String>) -> Result<Vec<ReadingHistoryItem>, BackendError> {
        match self.session.user_id() {
            Some(user_id) => {
                self.api
                    .list_reading_history(token.as_deref(), user_id)
                    .await
            }
            None => Ok(Vec::new()),
        }
    }
}

pub struct ReadingHistoryService {
    api: Arc<dyn DataApi>,
    remote: Remote,
    history: Arc<Loader<ReadingHistoryItem>>,
}

impl ReadingHistoryService {
    pub fn new(api: Arc<dyn DataApi>, remote: Remote, history: Arc<Loader<ReadingHistoryItem>>) -> Self {
        Self {
            api,
            remote,
            history,
        }
    }

    pub fn loader(&self) -> &Arc<Loader<ReadingHistoryItem>> {
        &self.history
    }

    /// Ids of the posts in the loaded history.
    pub fn read_post_ids(&self) -> HashSet<Uuid> {
        self.history.data().iter().map(|r| r.post_id).collect()
    }

    pub async fn is_read(&self, post_id: Uuid) -> Result<bool, AppError> {
        let user_id = self.user_id()?;
        let api = &self.api;
        let entry = self
            .remote
            .call("get_reading_entry", move |token| async move {
                api.get_reading_entry(token.as_deref(), user_id, post_id).await
            })
            .await?;
        Ok(entry.is_some())
    }

    /// Upserts on `(user_id, post_id)`, so repeating it only moves `read_at`.
    pub async fn mark_read(&self, post_id: Uuid) -> Result<(), AppError> {
        let item = ReadingHistoryItem {
            user_id: self.user_id()?,
            post_id,
            read_at: Utc::now(),
        };
        let api = &self.api;
        let item_ref = &item;
        self.remote
            .call("mark_read", move |token| async move {
                api.upsert_reading_entry(token.as_deref(), item_ref).await
            })
            .await?;
        debug!("Marked {post_id} read");
        self.history.update_data(|rows| {
            rows.retain(|r| r.post_id != post_id);
            rows.push(item);
        });
        Ok(())
    }

    pub async fn mark_unread(&self, post_id: Uuid) -> Result<(), AppError> {
        let user_id = self.user_id()?;
        let api = &self.api;
        self.remote
            .call("mark_unread", move |token| async move {
                api.delete_reading_entry(token.as_deref(), user_id, post_id).await
            })
            .await?;
        debug!("Marked {post_id} unread");
        self.history.update_data(|rows| rows.retain(|r| r.post_id != post_id));
        Ok(())
    }

    /// Drops the loaded rows, e.g. when the user signs out.
    pub fn reset(&self) {
        self.history.reset();
    }

    fn user_id(&self) -> Result<Uuid, AppError> {
        self.remote.session().user_id().ok_or(AppError::Unauthorized)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::events::EventBus;
    use crate::local_state::LocalStore;
    use crate::resilient::RetryPolicy;
    use std::time::Duration;

    pub(crate) async fn service() -> (Arc<FakeBackend>, Arc<SessionStore>, ReadingHistoryService) {
        let fake = Arc::new(FakeBackend::new());
        fake.add_account("reader@example.com", "pw");
        let events = EventBus::new();
        let session = SessionStore::new(fake.clone(), Arc::new(LocalStore::in_memory()), events.clone());
        session.sign_in_with_password("reader@example.com", "pw").await.unwrap();
        let loader: Arc<Loader<ReadingHistoryItem>> = Arc::new(Loader::new(
            Arc::new(ReadingHistorySource::new(fake.clone(), session.clone())),
            session.clone(),
            events.clone(),
            RetryPolicy::relaxed(),
            Some(Duration::from_secs(60)),
        ));
        let remote = Remote::new(session.clone(), events, RetryPolicy::no_retries());
        let service = ReadingHistoryService::new(fake.clone(), remote, loader);
        (fake, session, service)
    }

    #[tokio::test]
    async fn test_mark_read_twice_leaves_one_row() {
        let (fake, _session, history) = service().await;
        let post = Uuid::new_v4();

        history.mark_read(post).await.unwrap();
        history.mark_read(post).await.unwrap();

        assert_eq!(fake.reading_rows().len(), 1);
        assert_eq!(history.read_post_ids(), HashSet::from([post]));
        assert!(history.is_read(post).await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_unread_removes_row() {
        let (fake, _session, history) = service().await;
        let post = Uuid::new_v4();
        history.mark_read(post).await.unwrap();

        history.mark_unread(post).await.unwrap();

        assert!(fake.reading_rows().is_empty());
        assert!(!history.is_read(post).await.unwrap());
        assert!(history.read_post_ids().is_empty());
    }

    #[tokio::test]
    async fn test_signed_out_reader_cannot_mark() {
        let (fake, session, history) = service().await;
        session.sign_out().await;

        assert!(matches!(history.mark_read(Uuid::new_v4()).await, Err(AppError::Unauthorized)));
        assert_eq!(fake.calls("upsert_reading_entry"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_cached_for_a_minute() {
        let (fake, _session, history) = service().await;
        history.loader().load(false).await;
        history.loader().load(false).await;
        assert_eq!(fake.calls("list_reading_history"), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        history.loader().load(false).await;
        assert_eq!(fake.calls("list_reading_history"), 2);
    }
}
