//! Loader: one observable list of remote rows (posts, tags, reading
//! history) kept in sync through `resilient::fetch`.
//!
//! Invariants:
//! - at most one load in flight; an unforced `load` while one is running is a no-op
//! - a forced `load` cancels the in-flight one and starts over
//! - only the newest load publishes, and nothing publishes after `unmount`
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::backend::BackendError;
use crate::events::{EventBus, SyncEvent};
use crate::resilient::{self, RetryPolicy};
use crate::session::SessionStore;

/// Where a loader's rows come from.
#[async_trait]
pub trait LoadSource<T>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, token: Option<String>) -> Result<Vec<T>, BackendError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadState<T> {
    pub data: Vec<T>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> Default for LoadState<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            loading: false,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Fetched(usize),
    Cached,
    Deduplicated,
    /// Cancelled, superseded by a forced load, or unmounted.
    Aborted,
    Failed,
}

#[derive(Default)]
struct Control {
    in_flight: Option<CancellationToken>,
    loaded_at: Option<Instant>,
    generation: u64,
}

pub struct Loader<T> {
    source: Arc<dyn LoadSource<T>>,
    session: Arc<SessionStore>,
    events: EventBus,
    policy: RetryPolicy,
    cache_window: Option<Duration>,
    state: watch::Sender<LoadState<T>>,
    control: Mutex<Control>,
    mounted: CancellationToken,
}

impl<T> Loader<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(
        source: Arc<dyn LoadSource<T>>,
        session: Arc<SessionStore>,
        events: EventBus,
        policy: RetryPolicy,
        cache_window: Option<Duration>,
    ) -> Self {
        let (state, _) = watch::channel(LoadState::default());
        Self {
            source,
            session,
            events,
            policy,
            cache_window,
            state,
            control: Mutex::new(Control::default()),
            mounted: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.source.name()
    }

    pub fn state(&self) -> LoadState<T> {
        self.state.borrow().clone()
    }

    pub fn data(&self) -> Vec<T> {
        self.state.borrow().data.clone()
    }

    /// Receives every published state change.
    pub fn subscribe(&self) -> watch::Receiver<LoadState<T>> {
        self.state.subscribe()
    }

    pub async fn load(&self, force: bool) -> LoadOutcome {
        let name = self.name();

        let (cancel, generation) = {
            let mut control = self.lock();
            if self.mounted.is_cancelled() {
                return LoadOutcome::Aborted;
            }

            if let Some(in_flight) = &control.in_flight {
                if !force {
                    self.events.emit(SyncEvent::LoadSkipped {
                        loader: name,
                        reason: "in flight".to_string(),
                    });
                    return LoadOutcome::Deduplicated;
                }
                debug!("{name}: forced load cancels the in-flight one");
                in_flight.cancel();
            }

            if !force {
                if let (Some(window), Some(at)) = (self.cache_window, control.loaded_at) {
                    if at.elapsed() < window {
                        self.events.emit(SyncEvent::LoadSkipped {
                            loader: name,
                            reason: "cached".to_string(),
                        });
                        return LoadOutcome::Cached;
                    }
                }
            }

            let cancel = self.mounted.child_token();
            control.in_flight = Some(cancel.clone());
            control.generation += 1;
            self.state.send_modify(|s| {
                s.loading = true;
                s.error = None;
            });
            (cancel, control.generation)
        };
        let mut guard = InFlight {
            loader: self,
            generation,
            armed: true,
        };

        self.events.emit(SyncEvent::LoadStarted { loader: name });
        let source = self.source.clone();
        let result = resilient::fetch(
            name,
            &self.session,
            &self.policy,
            &self.events,
            &cancel,
            |token| {
                let source = source.clone();
                async move { source.fetch(token).await }
            },
        )
        .await;

        let mut control = self.lock();
        guard.armed = false;
        if self.mounted.is_cancelled() || control.generation != generation {
            debug!("{name}: dropping result of a superseded or unmounted load");
            return LoadOutcome::Aborted;
        }
        control.in_flight = None;

        match result {
            Ok(items) => {
                let count = items.len();
                control.loaded_at = Some(Instant::now());
                self.state.send_modify(|s| {
                    s.data = items;
                    s.loading = false;
                    s.error = None;
                });
                self.events.emit(SyncEvent::LoadSucceeded {
                    loader: name,
                    count,
                });
                LoadOutcome::Fetched(count)
            }
            Err(e) if e.is_aborted() => {
                self.state.send_modify(|s| s.loading = false);
                LoadOutcome::Aborted
            }
            Err(e) => {
                error!("{name}: load failed: {e}");
                let message = e.user_message();
                self.state.send_modify(|s| {
                    s.loading = false;
                    s.error = Some(message.clone());
                });
                self.events.emit(SyncEvent::LoadFailed {
                    loader: name,
                    message,
                });
                LoadOutcome::Failed
            }
        }
    }

    /// Loads unless a fresh copy is cached, and waits out any load already running.
    pub async fn load_settled(&self, force: bool) -> LoadState<T> {
        if self.load(force).await == LoadOutcome::Deduplicated {
            self.settled().await;
        }
        self.state()
    }

    /// Resolves once no load is in flight (or the loader is unmounted).
    pub async fn settled(&self) {
        let mut rx = self.state.subscribe();
        tokio::select! {
            _ = self.mounted.cancelled() => {}
            _ = async { rx.wait_for(|s| !s.loading).await.map(|_| ()) } => {}
        }
    }

    /// Forgets the loaded rows and cancels any load in flight, e.g. when the
    /// signed-in user changes.
    pub fn reset(&self) {
        let mut control = self.lock();
        if let Some(in_flight) = control.in_flight.take() {
            in_flight.cancel();
        }
        control.generation += 1;
        control.loaded_at = None;
        if !self.mounted.is_cancelled() {
            self.state.send_modify(|s| *s = LoadState::default());
        }
    }

    /// The next unforced load goes to the network.
    pub fn invalidate(&self) {
        self.lock().loaded_at = None;
    }

    /// Applies a local edit to the loaded rows, e.g. after a mutation.
    pub fn update_data(&self, f: impl FnOnce(&mut Vec<T>)) {
        let _control = self.lock();
        if !self.mounted.is_cancelled() {
            self.state.send_modify(|s| f(&mut s.data));
        }
    }

    /// Aborts the in-flight load; no state change is published afterwards.
    pub fn unmount(&self) {
        let _control = self.lock();
        self.mounted.cancel();
    }

    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Settles a load whose future was dropped before the fetch returned, so the
/// loader is not left "in flight" with nothing running.
struct InFlight<'a, T>
where
    T: Clone + Send + Sync + 'static,
{
    loader: &'a Loader<T>,
    generation: u64,
    armed: bool,
}

impl<T> Drop for InFlight<'_, T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut control = self.loader.lock();
        if control.generation != self.generation {
            return;
        }
        if let Some(in_flight) = control.in_flight.take() {
            in_flight.cancel();
        }
        if !self.loader.mounted.is_cancelled() {
            self.loader.state.send_modify(|s| s.loading = false);
        }
        debug!("{}: load dropped before it settled", self.loader.name());
    }
}
