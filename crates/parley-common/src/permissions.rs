//! Permission vocabulary and rank utilities.
//!
//! Permissions are a bitfield (one bit per capability). A role grants the union of
//! its bits; `ADMIN` implies every other bit. Rank is derived from role levels:
//! lower level means more privileged, and the default role never has a rank.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::models::{Role, RoleRank};

bitflags! {
    /// Chat-level permissions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Permissions: i64 {
        /// Everything, including acting on other admins' behalf
        const ADMIN          = 1 << 0;
        /// Edit chat profile (name, privacy)
        const MANAGE_CHAT    = 1 << 1;
        /// Create, edit, reorder and delete roles below your highest role
        const MANAGE_ROLE    = 1 << 2;
        /// Delete other members' messages
        const MANAGE_MESSAGE = 1 << 3;
        /// Remove members from the chat
        const KICK_MEMBER    = 1 << 4;
        /// Mute (and unmute) members
        const MUTE_MEMBER    = 1 << 5;
        /// Lift an existing mute, without being able to impose one
        const UNMUTE_MEMBER  = 1 << 6;
        /// Send messages in group chats
        const SEND_MESSAGE   = 1 << 7;
    }
}

/// Stable wire names, in declaration order.
const NAMES: &[(&str, Permissions)] = &[
    ("admin", Permissions::ADMIN),
    ("manage_chat", Permissions::MANAGE_CHAT),
    ("manage_role", Permissions::MANAGE_ROLE),
    ("manage_message", Permissions::MANAGE_MESSAGE),
    ("kick_member", Permissions::KICK_MEMBER),
    ("mute_member", Permissions::MUTE_MEMBER),
    ("unmute_member", Permissions::UNMUTE_MEMBER),
    ("send_message", Permissions::SEND_MESSAGE),
];

impl Permissions {
    /// Default grants for the "everyone" role of a new chat.
    pub fn default_everyone() -> Self {
        Self::SEND_MESSAGE
    }

    pub fn is_admin(&self) -> bool {
        self.contains(Self::ADMIN)
    }

    /// True if these grants satisfy *any* permission in `required`.
    /// Admin satisfies everything.
    pub fn grants_any(&self, required: Permissions) -> bool {
        self.is_admin() || self.intersects(required)
    }

    /// Look up a single permission by its snake_case name.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, flag)| *flag)
    }

    /// Parse a comma-separated list such as `"kick_member,mute_member"`.
    pub fn parse_list(list: &str) -> Result<Self, String> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .try_fold(Self::empty(), |acc, name| {
                Self::from_wire_name(name)
                    .map(|flag| acc | flag)
                    .ok_or_else(|| format!("unknown permission '{name}'"))
            })
    }

    /// snake_case names of every set bit.
    pub fn names(&self) -> Vec<&'static str> {
        NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect()
    }

    /// Human-readable "a or b" form used in denial reasons.
    pub fn describe(&self) -> String {
        self.names().join(" or ")
    }
}

/// A user's (or role's) position in a chat hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rank {
    /// Holder of a ranked role at this level.
    Level(i32),
    /// No ranked role at all; only the default role.
    Baseline,
}

impl Rank {
    /// Strict out-ranking: a lower level beats a higher one, any level beats
    /// baseline, and baseline beats nothing. Ties never out-rank.
    pub fn outranks(self, other: Rank) -> bool {
        match (self, other) {
            (Rank::Level(a), Rank::Level(b)) => a < b,
            (Rank::Level(_), Rank::Baseline) => true,
            (Rank::Baseline, _) => false,
        }
    }
}

impl From<RoleRank> for Rank {
    fn from(rank: RoleRank) -> Self {
        match rank {
            RoleRank::Ranked(level) => Rank::Level(level),
            RoleRank::Default => Rank::Baseline,
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rank::Level(level) => write!(f, "level {level}"),
            Rank::Baseline => f.write_str("baseline"),
        }
    }
}

/// Best (numerically lowest) level among `roles`. Default roles are skipped.
pub fn highest_role_level<'a>(roles: impl IntoIterator<Item = &'a Role>) -> Rank {
    roles
        .into_iter()
        .filter_map(Role::level)
        .min()
        .map_or(Rank::Baseline, Rank::Level)
}

/// The subset of `roles` that grant any permission in `required`.
pub fn roles_with_permission<'a>(roles: &[&'a Role], required: Permissions) -> Vec<&'a Role> {
    roles
        .iter()
        .copied()
        .filter(|role| role.permissions.grants_any(required))
        .collect()
}

/// Whether any of `roles` grants a permission in `required`.
pub fn has_permission(roles: &[&Role], required: Permissions) -> bool {
    roles
        .iter()
        .any(|role| role.permissions.grants_any(required))
}
