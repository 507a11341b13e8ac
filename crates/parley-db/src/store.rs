//! Storage contract for the role ordinal store.
//!
//! A backend exposes plain single-role writes directly and everything that
//! touches levels or the per-chat counter through a [`RoleTransaction`]. Opening
//! a transaction locks the chat, so two reorders on the same chat can never
//! interleave. Dropping a transaction without committing rolls it back on
//! backends with atomic writes; on the others the writes made so far stay.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_common::error::ParleyError;
use parley_common::models::{Chat, ChatMember, Role, RoleRank, User};
use parley_common::permissions::Permissions;
use thiserror::Error;
use uuid::Uuid;

use crate::ordinal::{LevelAssignment, LevelSnapshot, ReorderError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid reorder: {0}")]
    InvalidReorder(#[from] ReorderError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A failed level write could not be undone. Levels may violate the dense-range
    /// invariant until `repair_levels` runs.
    #[error("rollback failed after `{cause}`: {rollback}")]
    RollbackFailed {
        cause: Box<StoreError>,
        #[source]
        rollback: Box<StoreError>,
    },
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for ParleyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(resource) => ParleyError::NotFound { resource },
            StoreError::Conflict(message) => ParleyError::Conflict { message },
            StoreError::InvalidReorder(e) => ParleyError::Validation {
                message: e.to_string(),
            },
            err @ StoreError::RollbackFailed { .. } => ParleyError::Inconsistent(err.into()),
            err => ParleyError::Storage(err.into()),
        }
    }
}

/// A role about to be inserted. The store decides `rank`.
#[derive(Debug, Clone)]
pub struct NewRole {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub name: String,
    pub rank: RoleRank,
    pub permissions: Permissions,
}

#[async_trait]
pub trait RoleStorage: Send + Sync {
    type Tx: RoleTransaction;

    /// Open a transaction scoped to `chat_id`, locking the chat's counter.
    async fn begin(&self, chat_id: Uuid) -> StoreResult<Self::Tx>;

    async fn list_roles(&self, chat_id: Uuid) -> StoreResult<Vec<Role>>;

    /// Replace the name and/or the whole permission set.
    async fn update_metadata(
        &self,
        role_id: Uuid,
        name: Option<&str>,
        permissions: Option<Permissions>,
    ) -> StoreResult<Role>;

    /// Replace the full member set.
    async fn set_members(&self, role_id: Uuid, member_ids: &[Uuid]) -> StoreResult<()>;

    /// Add one member; adding an existing member is a no-op.
    async fn add_member(&self, role_id: Uuid, member_id: Uuid) -> StoreResult<()>;

    async fn health_check(&self) -> StoreResult<()>;
    fn backend_name(&self) -> &'static str;

    /// Whether an uncommitted transaction leaves no trace. When false, a failed
    /// level write must be undone by hand before the transaction is released.
    fn atomic_writes(&self) -> bool;
}

/// Writes against one locked chat.
#[async_trait]
pub trait RoleTransaction: Send {
    /// All roles of the locked chat, the default role included.
    async fn roles(&mut self) -> StoreResult<Vec<Role>>;

    async fn role_count(&mut self) -> StoreResult<i32>;
    async fn set_role_count(&mut self, count: i32) -> StoreResult<()>;

    async fn insert_role(&mut self, role: NewRole) -> StoreResult<Role>;
    async fn delete_role(&mut self, role_id: Uuid) -> StoreResult<()>;

    /// Null out the level of each role.
    async fn clear_levels(&mut self, role_ids: &[Uuid]) -> StoreResult<()>;

    /// Write many levels at once, stamping `updated_at` with `at`.
    async fn assign_levels(&mut self, assignments: &[LevelAssignment], at: DateTime<Utc>) -> StoreResult<()>;

    /// Put levels and `updated_at` back exactly as captured.
    async fn restore_levels(&mut self, snapshot: &[LevelSnapshot]) -> StoreResult<()>;

    async fn commit(self) -> StoreResult<()>;
}

/// Read access the authorization facade needs to build a decision.
#[async_trait]
pub trait ChatDirectory: Send + Sync {
    async fn load_user(&self, user_id: Uuid) -> StoreResult<Option<User>>;

    /// A chat with its members and roles loaded.
    async fn load_chat(&self, chat_id: Uuid) -> StoreResult<Option<Chat>>;
}

/// Membership writes behind the member operations.
#[async_trait]
pub trait MembershipStore: ChatDirectory {
    async fn join_chat(&self, chat_id: Uuid, user_id: Uuid) -> StoreResult<ChatMember>;

    /// Remove a membership and the member's role assignments.
    async fn leave_chat(&self, chat_id: Uuid, user_id: Uuid) -> StoreResult<()>;

    async fn set_muted_until(&self, chat_id: Uuid, user_id: Uuid, until: Option<DateTime<Utc>>) -> StoreResult<()>;

    /// Record that `user_id` blocked `blocked_id`. Blocking twice is a no-op.
    async fn block_user(&self, user_id: Uuid, blocked_id: Uuid) -> StoreResult<()>;
}
