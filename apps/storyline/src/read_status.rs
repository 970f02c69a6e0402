//! Read-status synchronizer: the "mark as read" control of one story for one
//! user.
//!
//! `Unknown → Checking → {Read, Unread}`. A toggle flips the local status
//! first and rolls it back if the backend rejects the change. Only one update
//! runs at a time per story, and the automatic mark-as-read fires at most once
//! per page view.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{EventBus, SyncEvent};
use crate::optimistic::{self, Rollback};
use crate::reading_history::ReadingHistoryService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadStatus {
    Unknown,
    Checking,
    Read,
    Unread,
}

impl ReadStatus {
    fn flipped(self) -> Option<ReadStatus> {
        match self {
            ReadStatus::Read => Some(ReadStatus::Unread),
            ReadStatus::Unread => Some(ReadStatus::Read),
            ReadStatus::Unknown | ReadStatus::Checking => None,
        }
    }
}

/// Clears the in-progress flag when the update finishes, however it finishes.
struct Updating<'a>(&'a AtomicBool);

impl Drop for Updating<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ReadStatusSync {
    post_id: Uuid,
    history: Arc<ReadingHistoryService>,
    events: EventBus,
    status: Mutex<ReadStatus>,
    updating: AtomicBool,
    auto_marked: AtomicBool,
}

impl ReadStatusSync {
    pub fn new(post_id: Uuid, history: Arc<ReadingHistoryService>, events: EventBus) -> Self {
        Self {
            post_id,
            history,
            events,
            status: Mutex::new(ReadStatus::Unknown),
            updating: AtomicBool::new(false),
            auto_marked: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> ReadStatus {
        *self.status.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::SeqCst)
    }

    fn set(&self, status: ReadStatus) {
        *self.status.lock().unwrap_or_else(|p| p.into_inner()) = status;
    }

    /// A new page view of the story: allows one more automatic mark.
    pub fn begin_view(&self) {
        self.auto_marked.store(false, Ordering::SeqCst);
    }

    /// Asks the backend whether the story is read. On failure, or if the
    /// check is abandoned, the status returns to `Unknown`. While an update is
    /// running the local status is kept as is.
    pub async fn check(&self) -> Result<ReadStatus, AppError> {
        if self.is_updating() {
            return Ok(self.status());
        }
        self.set(ReadStatus::Checking);
        let unknown = Rollback::new(|| self.set(ReadStatus::Unknown));

        let read = self.history.is_read(self.post_id).await?;
        unknown.defuse();
        let status = if read { ReadStatus::Read } else { ReadStatus::Unread };
        self.set(status);
        Ok(status)
    }

    /// Flips Read/Unread. Rejected while another update is running or before
    /// the status is known.
    pub async fn toggle(&self) -> Result<ReadStatus, AppError> {
        if self.updating.swap(true, Ordering::SeqCst) {
            return Err(AppError::Conflict(
                "A read-status update is already in progress".to_string(),
            ));
        }
        let _updating = Updating(&self.updating);

        let prior = self.status();
        let next = prior.flipped().ok_or_else(|| {
            AppError::Conflict("Read status has not been checked yet".to_string())
        })?;

        let post_id = self.post_id;
        let remote = async {
            if next == ReadStatus::Read {
                self.history.mark_read(post_id).await
            } else {
                self.history.mark_unread(post_id).await
            }
        };

        match optimistic::commit(|| self.set(next), || self.set(prior), remote).await {
            Ok(()) => {
                self.events.emit(SyncEvent::ReadStatusChanged {
                    post_id,
                    read: next == ReadStatus::Read,
                });
                Ok(next)
            }
            Err(e) => {
                warn!("Read status of {post_id} rolled back: {e}");
                self.events.emit(SyncEvent::ReadStatusRolledBack {
                    post_id,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Marks the story read when it is known to be unread, nothing else is
    /// updating it and this view has not tried already. Returns whether a
    /// mark was attempted.
    pub async fn auto_mark_read(&self) -> Result<bool, AppError> {
        if self.status() != ReadStatus::Unread || self.is_updating() {
            return Ok(false);
        }
        if self.auto_marked.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        debug!("Auto-marking {} read", self.post_id);
        self.toggle().await.map(|_| true)
    }
}

/// One synchronizer per `(user, post)`, dropped on sign-out.
pub struct ReadStatusRegistry {
    history: Arc<ReadingHistoryService>,
    events: EventBus,
    entries: Mutex<HashMap<(Uuid, Uuid), Arc<ReadStatusSync>>>,
}

impl ReadStatusRegistry {
    pub fn new(history: Arc<ReadingHistoryService>, events: EventBus) -> Self {
        Self {
            history,
            events,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, user_id: Uuid, post_id: Uuid) -> Arc<ReadStatusSync> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry((user_id, post_id))
            .or_insert_with(|| {
                Arc::new(ReadStatusSync::new(
                    post_id,
                    self.history.clone(),
                    self.events.clone(),
                ))
            })
            .clone()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
