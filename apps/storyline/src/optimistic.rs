//! Two-phase optimistic update: apply the local change, attempt the remote
//! one, and apply the inverse local change if the remote one fails or is
//! abandoned before it resolves.
use std::future::Future;

/// Runs `undo` when dropped, unless defused first.
pub struct Rollback<F: FnOnce()> {
    undo: Option<F>,
}

impl<F: FnOnce()> Rollback<F> {
    pub fn new(undo: F) -> Self {
        Self { undo: Some(undo) }
    }

    pub fn defuse(mut self) {
        self.undo = None;
    }
}

impl<F: FnOnce()> Drop for Rollback<F> {
    fn drop(&mut self) {
        if let Some(undo) = self.undo.take() {
            undo();
        }
    }
}

pub async fn commit<T, E, Fut>(
    apply: impl FnOnce(),
    rollback: impl FnOnce(),
    remote: Fut,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    apply();
    let rollback = Rollback::new(rollback);
    let result = remote.await;
    if result.is_ok() {
        rollback.defuse();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_failure_restores_prior_value() {
        let cell = Mutex::new(false);
        let result: Result<(), &str> = commit(
            || *cell.lock().unwrap() = true,
            || *cell.lock().unwrap() = false,
            async { Err("remote rejected") },
        )
        .await;

        assert_eq!(result, Err("remote rejected"));
        assert!(!*cell.lock().unwrap());
    }

    #[tokio::test]
    async fn test_success_keeps_local_change() {
        let cell = Mutex::new(1);
        let result: Result<u8, ()> = commit(
            || *cell.lock().unwrap() = 2,
            || *cell.lock().unwrap() = 1,
            async { Ok(7) },
        )
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(*cell.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_commit_restores_prior_value() {
        let cell = Mutex::new("unread");
        let pending = commit(
            || *cell.lock().unwrap() = "read",
            || *cell.lock().unwrap() = "unread",
            std::future::pending::<Result<(), ()>>(),
        );

        let outcome = tokio::time::timeout(Duration::from_millis(20), pending).await;
        assert!(outcome.is_err());
        assert_eq!(*cell.lock().unwrap(), "unread");
    }
}
