//! User model — the identity as seen by the authorization core.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A Parley user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID (UUID v7)
    pub id: Uuid,

    /// Unique username
    pub username: String,

    /// Users this account has blocked
    #[serde(default)]
    pub blocked_user_ids: Vec<Uuid>,
}

impl User {
    pub fn new(id: Uuid, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            blocked_user_ids: Vec::new(),
        }
    }

    pub fn has_blocked(&self, other: Uuid) -> bool {
        self.blocked_user_ids.contains(&other)
    }

    /// True if either side has blocked the other.
    pub fn is_blocked_with(&self, other: &User) -> bool {
        self.has_blocked(other.id) || other.has_blocked(self.id)
    }
}
