use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A row of `reading_history`, unique on `(user_id, post_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingHistoryItem {
    pub user_id: Uuid,
    pub post_id: Uuid,
    pub read_at: DateTime<Utc>,
}
