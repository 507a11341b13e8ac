//! Chat model — the container roles and members belong to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatMember, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Direct,
    Group,
}

impl ChatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

/// A chat with its members and roles already loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: Uuid,
    pub name: Option<String>,
    pub owner_id: Uuid,

    /// Private chats hide their existence from non-members
    pub is_private: bool,

    pub kind: ChatKind,
    pub members: Vec<ChatMember>,
    pub roles: Vec<Role>,

    /// Number of ranked roles; the next inserted role gets `role_count + 1`
    pub role_count: i32,

    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn is_owner(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }

    pub fn member(&self, user_id: Uuid) -> Option<&ChatMember> {
        self.members.iter().find(|m| m.user_id == user_id)
    }

    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.member(user_id).is_some()
    }

    pub fn role(&self, role_id: Uuid) -> Option<&Role> {
        self.roles.iter().find(|r| r.id == role_id)
    }

    pub fn default_role(&self) -> Option<&Role> {
        self.roles.iter().find(|r| r.is_default())
    }

    /// All roles a user holds here, the implicit default role included.
    /// Empty for non-members.
    pub fn roles_of(&self, user_id: Uuid) -> Vec<&Role> {
        let Some(member) = self.member(user_id) else {
            return Vec::new();
        };
        self.roles
            .iter()
            .filter(|role| {
                role.is_default()
                    || role.member_ids.contains(&member.id)
                    || member.role_ids.contains(&role.id)
            })
            .collect()
    }

    /// Ranked roles ordered from most to least privileged.
    pub fn ranked_roles(&self) -> Vec<&Role> {
        let mut ranked: Vec<&Role> = self.roles.iter().filter(|r| !r.is_default()).collect();
        ranked.sort_by_key(|r| r.level());
        ranked
    }
}
