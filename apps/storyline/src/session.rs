//! Session Store: the single owner of the signed-in user's session.
//!
//! The session is persisted under `AUTH_TOKEN_KEY`, refreshed by a timer
//! `REFRESH_LEAD` before expiry, and refreshed opportunistically on
//! visibility/online signals. All refreshes go through one gate, so callers
//! that pile up behind an in-flight refresh reuse its result instead of
//! issuing their own round trip.
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{AuthProvider, BackendError, ErrorClass};
use crate::events::{EventBus, SyncEvent};
use crate::local_state::{LocalStore, AUTH_TOKEN_KEY};
use crate::models::Session;

/// How long before expiry the timer refreshes.
pub const REFRESH_LEAD: Duration = Duration::from_secs(5 * 60);
/// Minimum spacing between unforced refresh attempts.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Delay before the timer's single retry.
pub const REFRESH_RETRY_DELAY: Duration = Duration::from_secs(30);
/// Floor for the expiry timer; short-lived tokens would otherwise schedule
/// back-to-back refreshes.
pub const MIN_TIMER_DELAY: Duration = Duration::from_secs(30);
/// Sessions this close to expiry are refreshed before a fetch.
pub const FRESHNESS_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshOutcome {
    Refreshed,
    /// Another caller refreshed while we waited on the gate.
    Reused,
    Skipped,
    NoSession,
    Failed { kept_session: bool },
}

#[derive(Default)]
struct SessionSlot {
    session: Option<Session>,
    auth_error: Option<String>,
    /// Bumped on every adopt or clear.
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

pub struct SessionStore {
    auth: Arc<dyn AuthProvider>,
    local: Arc<LocalStore>,
    events: EventBus,
    slot: Mutex<SessionSlot>,
    /// Holds the time of the last refresh attempt.
    refresh_gate: tokio::sync::Mutex<Option<Instant>>,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl SessionStore {
    pub fn new(auth: Arc<dyn AuthProvider>, local: Arc<LocalStore>, events: EventBus) -> Arc<Self> {
        Arc::new(Self {
            auth,
            local,
            events,
            slot: Mutex::new(SessionSlot::default()),
            refresh_gate: tokio::sync::Mutex::new(None),
        })
    }

    /// Restores the persisted session. An expired one gets a single refresh
    /// attempt; anything unusable is discarded.
    pub async fn init(self: &Arc<Self>) -> Option<Session> {
        let session: Session = self.local.get_json(AUTH_TOKEN_KEY)?;

        if !session.is_expired_at(now()) {
            info!("Restored session for user {}", session.user.id);
            self.events.emit(SyncEvent::SessionAdopted {
                user_id: session.user.id,
            });
            self.adopt(session.clone());
            return Some(session);
        }

        info!("Persisted session expired, attempting refresh");
        {
            let mut slot = self.lock();
            slot.session = Some(session);
            slot.generation += 1;
        }
        self.try_refresh(true).await;
        self.current()
    }

    pub fn current(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.lock().session.as_ref().map(|s| s.user.id)
    }

    /// Set when a session was lost to a failed refresh; cleared on the next sign-in.
    pub fn auth_error(&self) -> Option<String> {
        self.lock().auth_error.clone()
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub async fn sign_in_with_password(
        self: &Arc<Self>,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError> {
        let session = self.auth.sign_in_with_password(email, password).await?;
        info!("Signed in user {}", session.user.id);
        self.events.emit(SyncEvent::SessionAdopted {
            user_id: session.user.id,
        });
        self.adopt(session.clone());
        Ok(session)
    }

    /// Completes an OAuth sign-in from the refresh token handed back on the callback.
    pub async fn sign_in_with_refresh_token(
        self: &Arc<Self>,
        refresh_token: &str,
    ) -> Result<Session, BackendError> {
        let session = self.auth.refresh(refresh_token).await?;
        info!("Signed in user {} via OAuth callback", session.user.id);
        self.events.emit(SyncEvent::SessionAdopted {
            user_id: session.user.id,
        });
        self.adopt(session.clone());
        Ok(session)
    }

    pub fn oauth_authorize_url(&self, provider: &str, redirect_to: &str) -> String {
        self.auth.oauth_authorize_url(provider, redirect_to)
    }

    /// Refreshes the session. Unforced calls are limited to one attempt per
    /// `MIN_REFRESH_INTERVAL`; a skipped attempt reports whether a session is
    /// still held. Never fails loudly: a lost session shows up in `auth_error`.
    pub async fn refresh_session(self: &Arc<Self>, force: bool) -> bool {
        match self.try_refresh(force).await {
            RefreshOutcome::Refreshed | RefreshOutcome::Reused => true,
            RefreshOutcome::Skipped => self.current().is_some(),
            RefreshOutcome::NoSession | RefreshOutcome::Failed { .. } => false,
        }
    }

    /// The session to use for the next request, refreshed first when it is
    /// about to expire.
    pub async fn ensure_fresh(self: &Arc<Self>) -> Option<Session> {
        let session = self.current()?;
        let now = now();
        if session.expires_within(now, FRESHNESS_MARGIN) {
            self.refresh_session(session.is_expired_at(now)).await;
        }
        self.current()
    }

    pub async fn on_visibility_change(self: &Arc<Self>, visible: bool) {
        if visible {
            self.refresh_if_due().await;
        }
    }

    pub async fn on_online(self: &Arc<Self>) {
        self.refresh_if_due().await;
    }

    /// Clears local state first; the remote sign-out is best effort.
    pub async fn sign_out(&self) {
        let session = {
            let mut slot = self.lock();
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
            slot.auth_error = None;
            slot.generation += 1;
            slot.session.take()
        };
        self.local.clear_auth_state();
        self.events.emit(SyncEvent::SignedOut);

        if let Some(session) = session {
            info!("Signed out user {}", session.user.id);
            if let Err(e) = self.auth.sign_out(&session.access_token).await {
                warn!("Remote sign-out failed, local session already cleared: {e}");
            }
        }
    }

    async fn refresh_if_due(self: &Arc<Self>) {
        let due = self
            .current()
            .map(|s| s.expires_within(now(), REFRESH_LEAD))
            .unwrap_or(false);
        if due {
            debug!("Session close to expiry, refreshing opportunistically");
            self.refresh_session(false).await;
        }
    }

    async fn try_refresh(self: &Arc<Self>, force: bool) -> RefreshOutcome {
        let seen = self.generation();
        let mut last_attempt = self.refresh_gate.lock().await;

        if self.generation() != seen {
            return if self.current().is_some() {
                RefreshOutcome::Reused
            } else {
                RefreshOutcome::NoSession
            };
        }

        let Some(session) = self.current() else {
            return RefreshOutcome::NoSession;
        };

        if !force {
            if let Some(at) = *last_attempt {
                if at.elapsed() < MIN_REFRESH_INTERVAL {
                    self.events.emit(SyncEvent::RefreshSkipped {
                        reason: "rate limited".to_string(),
                    });
                    return RefreshOutcome::Skipped;
                }
            }
        }
        *last_attempt = Some(Instant::now());

        match self.auth.refresh(&session.refresh_token).await {
            Ok(refreshed) => {
                info!("Session refreshed for user {}", refreshed.user.id);
                self.events.emit(SyncEvent::SessionRefreshed {
                    user_id: refreshed.user.id,
                    expires_at: refreshed.expires_at,
                });
                self.adopt(refreshed);
                RefreshOutcome::Refreshed
            }
            Err(e) => {
                warn!("Session refresh failed: {e}");
                self.events.emit(SyncEvent::RefreshFailed {
                    message: e.to_string(),
                });
                let keep = e.class() == ErrorClass::Transient && !session.is_expired_at(now());
                if !keep {
                    self.clear("refresh failed", e.user_message());
                }
                RefreshOutcome::Failed { kept_session: keep }
            }
        }
    }

    /// Timer path: one forced refresh, one retry after `REFRESH_RETRY_DELAY`.
    /// The retry is dropped if the session changed while it waited.
    async fn refresh_from_timer(self: &Arc<Self>) {
        if let RefreshOutcome::Failed { kept_session: true } = self.try_refresh(true).await {
            let seen = self.generation();
            tokio::time::sleep(REFRESH_RETRY_DELAY).await;
            if self.generation() != seen {
                debug!("Session changed during the refresh retry delay, skipping retry");
                return;
            }
            if let RefreshOutcome::Failed { kept_session: true } = self.try_refresh(true).await {
                if self.generation() != seen {
                    return;
                }
                self.clear(
                    "refresh retry failed",
                    "Your session could not be renewed. Please sign in again.".to_string(),
                );
            }
        }
    }

    fn adopt(self: &Arc<Self>, session: Session) {
        self.local.set_json(AUTH_TOKEN_KEY, &session);
        let delay = session
            .refresh_delay(now(), REFRESH_LEAD)
            .max(MIN_TIMER_DELAY);
        {
            let mut slot = self.lock();
            slot.session = Some(session);
            slot.auth_error = None;
            slot.generation += 1;
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
            slot.timer = Some(self.spawn_refresh_timer(delay));
        }
        debug!("Next session refresh in {}s", delay.as_secs());
    }

    fn spawn_refresh_timer(self: &Arc<Self>, delay: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(store) = store.upgrade() else {
                return;
            };
            // Detach our own handle so the adopt below does not abort us.
            drop(store.lock().timer.take());
            store.refresh_from_timer().await;
        })
    }

    fn clear(&self, reason: &str, auth_error: String) {
        {
            let mut slot = self.lock();
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
            slot.session = None;
            slot.auth_error = Some(auth_error);
            slot.generation += 1;
        }
        self.local.clear_auth_state();
        warn!("Session cleared: {reason}");
        self.events.emit(SyncEvent::SessionCleared {
            reason: reason.to_string(),
        });
    }

    fn lock(&self) -> MutexGuard<'_, SessionSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        if let Some(timer) = self.lock().timer.take() {
            timer.abort();
        }
    }
}
