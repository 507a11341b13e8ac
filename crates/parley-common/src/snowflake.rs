//! Id generation.
//!
//! Chats, roles and memberships use UUID v7: unique without coordination and
//! time-sortable, which keeps "creation order" available as a tie-breaker.

use uuid::Uuid;

/// Generate a new time-sortable id.
pub fn generate_id() -> Uuid {
    Uuid::now_v7()
}
