//! Role model — ranked roles and the per-chat default role.
//!
//! Every chat has exactly one default ("everyone") role that sits outside the
//! hierarchy, plus any number of ranked roles whose levels form the dense range
//! `[1, N]`. Level 1 is the most privileged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::permissions::Permissions;

/// Position of a role in its chat's hierarchy.
///
/// The default role has no level, so it can never take part in rank arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "level", rename_all = "snake_case")]
pub enum RoleRank {
    Default,
    Ranked(i32),
}

impl RoleRank {
    /// Map a nullable storage column onto a rank.
    pub fn from_level(level: Option<i32>) -> Self {
        match level {
            Some(level) => Self::Ranked(level),
            None => Self::Default,
        }
    }

    pub fn level(self) -> Option<i32> {
        match self {
            Self::Ranked(level) => Some(level),
            Self::Default => None,
        }
    }

    pub fn is_default(self) -> bool {
        matches!(self, Self::Default)
    }
}

/// A role within a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub chat_id: Uuid,

    /// Role name
    pub name: String,

    /// Default role or ranked level
    pub rank: RoleRank,

    /// Granted permissions
    pub permissions: Permissions,

    /// Chat-member ids holding this role (always empty for the default role,
    /// which every member holds implicitly)
    pub member_ids: Vec<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn is_default(&self) -> bool {
        self.rank.is_default()
    }

    pub fn level(&self) -> Option<i32> {
        self.rank.level()
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 100, message = "Role name must be 1-100 characters"))]
    pub name: String,

    pub permissions: Option<Permissions>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateRoleRequest {
    #[validate(length(min = 1, max = 100, message = "Role name must be 1-100 characters"))]
    pub name: Option<String>,

    /// Replaces the whole grant set when present.
    pub permissions: Option<Permissions>,
}

impl UpdateRoleRequest {
    pub fn renames(&self) -> bool {
        self.name.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.permissions.is_none()
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReorderRolesRequest {
    /// Desired relative order, most privileged first.
    #[validate(length(min = 1, message = "At least one role is required"))]
    pub role_ids: Vec<Uuid>,
}
