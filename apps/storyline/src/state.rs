use std::sync::{Arc, Mutex};

use tracing::info;
use uuid::Uuid;

use crate::about::AboutService;
use crate::admin::{AdminGate, AdminStatusCache};
use crate::backend::{AuthProvider, DataApi, PostScope};
use crate::config::Config;
use crate::events::EventBus;
use crate::filters::FilterStore;
use crate::loader::Loader;
use crate::local_state::LocalStore;
use crate::models::{Post, ReadingHistoryItem, Tag};
use crate::posts::{PostLists, PostService, PostsSource};
use crate::read_status::ReadStatusRegistry;
use crate::reading_history::{ReadingHistoryService, ReadingHistorySource};
use crate::resilient::{Remote, RetryPolicy};
use crate::session::SessionStore;
use crate::tags::{TagService, TagsSource};
use crate::users::UserAdminService;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub session: Arc<SessionStore>,
    pub admin: Arc<AdminGate>,
    pub posts: Arc<PostService>,
    pub tags: Arc<TagService>,
    pub history: Arc<ReadingHistoryService>,
    pub read_status: Arc<ReadStatusRegistry>,
    pub users: Arc<UserAdminService>,
    pub about: Arc<AboutService>,
    pub filters: Arc<FilterStore>,
    /// User whose rows the per-user caches currently hold.
    owner: Arc<Mutex<Option<Uuid>>>,
}

impl AppState {
    /// Wires every service around one session store and one backend.
    pub fn build<B>(config: Config, backend: Arc<B>, local: Arc<LocalStore>) -> Self
    where
        B: AuthProvider + DataApi + 'static,
    {
        let api: Arc<dyn DataApi> = backend.clone();
        let events = EventBus::new();
        let session = SessionStore::new(backend, local.clone(), events.clone());

        let post_loader = |scope| -> Arc<Loader<Post>> {
            Arc::new(Loader::new(
                Arc::new(PostsSource::new(api.clone(), scope)),
                session.clone(),
                events.clone(),
                RetryPolicy::default(),
                config.posts_cache,
            ))
        };
        let lists = PostLists {
            published: post_loader(PostScope::Published),
            all: post_loader(PostScope::All),
        };
        let tag_loader: Arc<Loader<Tag>> = Arc::new(Loader::new(
            Arc::new(TagsSource::new(api.clone())),
            session.clone(),
            events.clone(),
            RetryPolicy::default(),
            config.posts_cache,
        ));
        let history_loader: Arc<Loader<ReadingHistoryItem>> = Arc::new(Loader::new(
            Arc::new(ReadingHistorySource::new(api.clone(), session.clone())),
            session.clone(),
            events.clone(),
            RetryPolicy::relaxed(),
            Some(config.reading_history_cache),
        ));

        let reads = Remote::new(session.clone(), events.clone(), RetryPolicy::default());
        let writes = reads.with_policy(RetryPolicy::no_retries());

        let history = Arc::new(ReadingHistoryService::new(
            api.clone(),
            writes.clone(),
            history_loader,
        ));

        Self {
            admin: Arc::new(AdminGate::new(
                AdminStatusCache::new(local.clone()),
                session.clone(),
                api.clone(),
                events.clone(),
            )),
            posts: Arc::new(PostService::new(api.clone(), writes.clone(), lists.clone())),
            tags: Arc::new(TagService::new(api.clone(), writes, tag_loader, lists)),
            read_status: Arc::new(ReadStatusRegistry::new(history.clone(), events.clone())),
            history,
            users: Arc::new(UserAdminService::new(api.clone(), reads.clone())),
            about: Arc::new(AboutService::new(api, reads)),
            filters: Arc::new(FilterStore::new(local)),
            config,
            session,
            owner: Arc::new(Mutex::new(None)),
        }
    }

    /// Signs out and drops everything cached for the previous user.
    pub async fn sign_out(&self) {
        self.session.sign_out().await;
        self.sync_user();
    }

    /// Drops the per-user caches when the signed-in user differs from the one
    /// they were filled for, including a session lost to a failed refresh.
    pub fn sync_user(&self) {
        let current = self.session.user_id();
        let mut owner = self.owner.lock().unwrap_or_else(|p| p.into_inner());
        if *owner == current {
            return;
        }
        info!("Signed-in user changed ({:?} -> {:?}), resetting user caches", *owner, current);
        if owner.is_some() {
            self.admin.clear();
        }
        self.read_status.clear();
        self.history.reset();
        self.posts.lists().all.reset();
        *owner = current;
    }

    /// Stops every loader; in-flight loads are aborted and publish nothing.
    pub fn shutdown(&self) {
        let lists = self.posts.lists();
        lists.published.unmount();
        lists.all.unmount();
        self.tags.loader().unmount();
        self.history.loader().unmount();
    }
}
