use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// An authenticated session as issued by the auth service.
/// `expires_at` is in epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub user: SessionUser,
}

impl Session {
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }

    /// True when the session expires within `margin` of `now` (or already has).
    pub fn expires_within(&self, now: i64, margin: Duration) -> bool {
        self.expires_at - now <= margin.as_secs() as i64
    }

    /// How long to wait from `now` until a refresh should fire, `lead` before expiry.
    pub fn refresh_delay(&self, now: i64, lead: Duration) -> Duration {
        let secs = self.expires_at - lead.as_secs() as i64 - now;
        Duration::from_secs(secs.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_at: i64) -> Session {
        Session {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expires_at,
            user: SessionUser {
                id: Uuid::nil(),
                email: None,
            },
        }
    }

    #[test]
    fn test_refresh_delay_is_lead_before_expiry() {
        let s = session(10_000);
        assert_eq!(
            s.refresh_delay(9_000, Duration::from_secs(300)),
            Duration::from_secs(700)
        );
    }

    #[test]
    fn test_refresh_delay_never_negative() {
        let s = session(1_000);
        assert_eq!(s.refresh_delay(2_000, Duration::from_secs(300)), Duration::ZERO);
    }

    #[test]
    fn test_expiry_checks() {
        let s = session(1_000);
        assert!(s.is_expired_at(1_000));
        assert!(!s.is_expired_at(999));
        assert!(s.expires_within(950, Duration::from_secs(60)));
        assert!(!s.expires_within(900, Duration::from_secs(60)));
    }
}
