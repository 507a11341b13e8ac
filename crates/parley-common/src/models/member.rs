//! Member model — a user's membership in a specific chat.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents a user's membership in a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMember {
    /// Membership id (what roles reference)
    pub id: Uuid,
    pub user_id: Uuid,
    pub chat_id: Uuid,

    /// Communication timeout (muted until this time)
    pub muted_until: Option<DateTime<Utc>>,

    /// Non-default role IDs assigned to this member. The default role is implicit.
    pub role_ids: Vec<Uuid>,

    /// When the user joined this chat
    pub joined_at: DateTime<Utc>,
}

impl ChatMember {
    /// Whether the member is muted at `now`.
    pub fn is_muted_at(&self, now: DateTime<Utc>) -> bool {
        self.muted_until.is_some_and(|until| until > now)
    }
}
