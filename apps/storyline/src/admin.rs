//! Admin status: a single-entry, TTL-bound memo of "is the current user an
//! admin", persisted under `ADMIN_CACHE_KEY`, and the gate that consults it.
//!
//! The gate only decides which admin surfaces the gateway serves; the backend
//! re-checks the role on every privileged call.
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::DataApi;
use crate::errors::AppError;
use crate::events::{EventBus, SyncEvent};
use crate::local_state::{LocalStore, ADMIN_CACHE_KEY};
use crate::models::{Role, Session};
use crate::session::SessionStore;

pub fn admin_cache_ttl() -> Duration {
    Duration::minutes(5)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminCacheEntry {
    pub user_id: Uuid,
    pub is_admin: bool,
    /// Epoch milliseconds of the role check.
    pub timestamp: i64,
}

impl AdminCacheEntry {
    pub fn is_valid_for(&self, user_id: Uuid, now: DateTime<Utc>) -> bool {
        self.user_id == user_id && now.timestamp_millis() - self.timestamp < admin_cache_ttl().num_milliseconds()
    }
}

pub struct AdminStatusCache {
    local: Arc<LocalStore>,
}

impl AdminStatusCache {
    pub fn new(local: Arc<LocalStore>) -> Self {
        Self { local }
    }

    /// The cached entry, only if it belongs to `user_id` and is younger than the TTL.
    pub fn get_cached(&self, user_id: Uuid, now: DateTime<Utc>) -> Option<AdminCacheEntry> {
        let entry: AdminCacheEntry = self.local.get_json(ADMIN_CACHE_KEY)?;
        entry.is_valid_for(user_id, now).then_some(entry)
    }

    pub fn set_cached(&self, user_id: Uuid, is_admin: bool, now: DateTime<Utc>) {
        self.local.set_json(
            ADMIN_CACHE_KEY,
            &AdminCacheEntry {
                user_id,
                is_admin,
                timestamp: now.timestamp_millis(),
            },
        );
    }

    pub fn clear(&self) {
        self.local.remove(ADMIN_CACHE_KEY);
    }
}

pub struct AdminGate {
    cache: AdminStatusCache,
    session: Arc<SessionStore>,
    api: Arc<dyn DataApi>,
    events: EventBus,
}

impl AdminGate {
    pub fn new(
        cache: AdminStatusCache,
        session: Arc<SessionStore>,
        api: Arc<dyn DataApi>,
        events: EventBus,
    ) -> Self {
        Self {
            cache,
            session,
            api,
            events,
        }
    }

    /// Whether the signed-in user is an admin, served from the cache when possible.
    pub async fn is_admin(&self) -> bool {
        let Some(session) = self.session.ensure_fresh().await else {
            return false;
        };
        let user_id = session.user.id;

        if let Some(entry) = self.cache.get_cached(user_id, Utc::now()) {
            self.events.emit(SyncEvent::AdminCacheHit {
                user_id,
                is_admin: entry.is_admin,
            });
            return entry.is_admin;
        }

        self.check(&session).await
    }

    /// Skips the cache and re-reads the user's roles.
    pub async fn force_check(&self) -> bool {
        match self.session.ensure_fresh().await {
            Some(session) => self.check(&session).await,
            None => false,
        }
    }

    /// The current session, if and only if it belongs to an admin.
    pub async fn require_admin(&self) -> Result<Session, AppError> {
        let session = self.session.current().ok_or(AppError::Unauthorized)?;
        if self.is_admin().await {
            // is_admin may have refreshed the session.
            Ok(self.session.current().unwrap_or(session))
        } else {
            Err(AppError::Forbidden)
        }
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    async fn check(&self, session: &Session) -> bool {
        let user_id = session.user.id;
        match self
            .api
            .list_user_roles(Some(&session.access_token), user_id)
            .await
        {
            Ok(roles) => {
                let is_admin = roles.iter().any(|r| r.role == Role::Admin);
                debug!("Role check for {user_id}: admin={is_admin}");
                self.cache.set_cached(user_id, is_admin, Utc::now());
                self.events.emit(SyncEvent::AdminChecked { user_id, is_admin });
                is_admin
            }
            Err(e) => {
                warn!("Role check for {user_id} failed: {e}");
                self.cache.clear();
                false
            }
        }
    }
}
