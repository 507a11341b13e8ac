//! Rule table for ranked actions.
//!
//! Each ranked action is described by the permission that can stand in for raw
//! rank and by the targets it may never touch. The ranked algorithm itself
//! lives in [`crate::engine`] and is shared by every entry here.

use parley_common::permissions::Permissions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    MuteMember,
    UnmuteMember,
    KickMember,
    UpdateRoleMetadata,
    UpdateRoleMembers,
    UpdateRoleLevels,
    DeleteRole,
}

#[derive(Debug)]
pub struct Rule {
    pub action: Action,
    /// Any one of these satisfies the permission stage.
    pub required: Permissions,
    /// Verb used in denial reasons ("mute", "reorder", ...).
    pub verb: &'static str,
    /// The chat owner can never be the target.
    pub protect_owner: bool,
    /// Holders of `admin` can never be the target of a non-owner. For role
    /// member edits this covers the members being removed.
    pub protect_admin: bool,
    /// The default role can never be the target.
    pub protect_default_role: bool,
}

static RULES: [Rule; 7] = [
    Rule {
        action: Action::MuteMember,
        required: Permissions::MUTE_MEMBER,
        verb: "mute",
        protect_owner: true,
        protect_admin: true,
        protect_default_role: false,
    },
    Rule {
        action: Action::UnmuteMember,
        required: Permissions::MUTE_MEMBER.union(Permissions::UNMUTE_MEMBER),
        verb: "unmute",
        protect_owner: true,
        protect_admin: true,
        protect_default_role: false,
    },
    Rule {
        action: Action::KickMember,
        required: Permissions::KICK_MEMBER,
        verb: "kick",
        protect_owner: true,
        protect_admin: true,
        protect_default_role: false,
    },
    Rule {
        action: Action::UpdateRoleMetadata,
        required: Permissions::MANAGE_ROLE,
        verb: "edit",
        protect_owner: false,
        protect_admin: false,
        protect_default_role: false,
    },
    Rule {
        action: Action::UpdateRoleMembers,
        required: Permissions::MANAGE_ROLE,
        verb: "change members of",
        protect_owner: false,
        protect_admin: true,
        protect_default_role: true,
    },
    Rule {
        action: Action::UpdateRoleLevels,
        required: Permissions::MANAGE_ROLE,
        verb: "reorder",
        protect_owner: false,
        protect_admin: false,
        protect_default_role: true,
    },
    Rule {
        action: Action::DeleteRole,
        required: Permissions::MANAGE_ROLE,
        verb: "delete",
        protect_owner: false,
        protect_admin: false,
        protect_default_role: true,
    },
];

/// Look up the rule for `action`.
pub fn rule_for(action: Action) -> &'static Rule {
    let idx = match action {
        Action::MuteMember => 0,
        Action::UnmuteMember => 1,
        Action::KickMember => 2,
        Action::UpdateRoleMetadata => 3,
        Action::UpdateRoleMembers => 4,
        Action::UpdateRoleLevels => 5,
        Action::DeleteRole => 6,
    };
    &RULES[idx]
}
