//! Resilient fetch: the one retry loop every loader and service call goes
//! through.
//!
//! Failures are classified by `BackendError::class`:
//! - auth: one forced session refresh, then one retry
//! - transient: exponential backoff with jitter, up to `max_retries`
//! - permission / not-found / anything else: returned immediately
//!
//! Cancelling the token aborts the in-flight request and any pending backoff.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{BackendError, ErrorClass};
use crate::events::{EventBus, SyncEvent};
use crate::session::SessionStore;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Up to this fraction of the delay is added at random.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.5,
        }
    }
}

impl RetryPolicy {
    /// Single-shot writes: a transient failure is reported, not repeated.
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Reading history is less critical and can wait longer between tries.
    pub fn relaxed() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), capped and jittered.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter = if self.jitter_factor > 0.0 {
            rand::thread_rng().gen_range(0.0..=capped * self.jitter_factor)
        } else {
            0.0
        };
        Duration::from_secs_f64((capped + jitter).min(self.max_delay.as_secs_f64()))
    }
}

/// Runs `op` with the caller's freshest access token until it succeeds, the
/// policy gives up, or `cancel` fires (`BackendError::Aborted`).
pub async fn fetch<T, F, Fut>(
    name: &'static str,
    session: &Arc<SessionStore>,
    policy: &RetryPolicy,
    events: &EventBus,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, BackendError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut attempt: u32 = 0;
    let mut refreshed = false;

    loop {
        if cancel.is_cancelled() {
            return Err(BackendError::Aborted);
        }

        let token = session.ensure_fresh().await.map(|s| s.access_token);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BackendError::Aborted),
            result = op(token) => result,
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        match err.class() {
            ErrorClass::Auth if !refreshed => {
                refreshed = true;
                warn!("{name}: auth failure ({err}), refreshing session once");
                if !session.refresh_session(true).await {
                    return Err(err);
                }
            }
            ErrorClass::Transient if attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                attempt += 1;
                warn!(
                    "{name}: attempt {} failed ({err}), retrying after {}ms",
                    attempt,
                    delay.as_millis()
                );
                events.emit(SyncEvent::LoadRetryScheduled {
                    loader: name,
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                });
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(BackendError::Aborted),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            class => {
                debug!("{name}: giving up on {class:?} failure: {err}");
                return Err(err);
            }
        }
    }
}

/// Session, event bus and retry policy bundled for one-off service calls.
#[derive(Clone)]
pub struct Remote {
    session: Arc<SessionStore>,
    events: EventBus,
    policy: RetryPolicy,
}

impl Remote {
    pub fn new(session: Arc<SessionStore>, events: EventBus, policy: RetryPolicy) -> Self {
        Self {
            session,
            events,
            policy,
        }
    }

    pub fn with_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            policy,
            ..self.clone()
        }
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn call<T, F, Fut>(&self, name: &'static str, op: F) -> Result<T, BackendError>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        fetch(
            name,
            &self.session,
            &self.policy,
            &self.events,
            &CancellationToken::new(),
            op,
        )
        .await
    }
}
