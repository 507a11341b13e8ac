//! Role policy: create, view, update metadata, update members, reorder, delete.

use parley_common::models::{Chat, Role, UpdateRoleRequest, User};
use parley_common::permissions::{Permissions, has_permission};
use parley_common::verdict::Verdict;

use uuid::Uuid;

use crate::engine::{Target, check_ranked, holds_admin, membership_gate};
use crate::rules::{Action, rule_for};

/// Creating a role has no target to compare against; the permission alone decides.
pub fn create(actor: &User, chat: &Chat) -> Verdict {
    if chat.is_owner(actor.id) {
        return Verdict::allow("Chat owner");
    }
    if let Some(denied) = membership_gate(actor, chat) {
        return denied;
    }
    if has_permission(&chat.roles_of(actor.id), Permissions::MANAGE_ROLE) {
        Verdict::allow("Holds manage_role")
    } else {
        Verdict::forbidden("Missing permission manage_role to create roles")
    }
}

pub fn view(actor: &User, chat: &Chat, role: &Role) -> Verdict {
    if role.chat_id != chat.id {
        return Verdict::not_found("Role not found");
    }
    if chat.is_owner(actor.id) {
        return Verdict::allow("Chat owner");
    }
    if let Some(denied) = membership_gate(actor, chat) {
        return denied;
    }
    let actor_roles = chat.roles_of(actor.id);
    if actor_roles.iter().any(|r| r.id == role.id) {
        return Verdict::allow("Holds this role");
    }
    if has_permission(&actor_roles, Permissions::MANAGE_ROLE) {
        Verdict::allow("Holds manage_role")
    } else {
        Verdict::forbidden("Missing permission manage_role to view this role")
    }
}

/// Name and permission edits.
///
/// The default role can never be renamed. Its permissions may change, but it has
/// no rank to out-rank, so that edit is gated on owner or `manage_role` alone.
pub fn update_metadata(actor: &User, chat: &Chat, role: &Role, patch: &UpdateRoleRequest) -> Verdict {
    if role.chat_id != chat.id {
        return Verdict::not_found("Role not found");
    }
    if !role.is_default() {
        return check_ranked(actor, chat, Action::UpdateRoleMetadata, &[Target::Role(role)]);
    }
    if patch.renames() {
        return Verdict::forbidden("Cannot rename the default role");
    }
    if chat.is_owner(actor.id) {
        return Verdict::allow("Chat owner");
    }
    if let Some(denied) = membership_gate(actor, chat) {
        return denied;
    }
    if has_permission(&chat.roles_of(actor.id), Permissions::MANAGE_ROLE) {
        Verdict::allow("Holds manage_role")
    } else {
        Verdict::forbidden("Missing permission manage_role to edit the default role")
    }
}

/// Member edits. `removed` holds the chat-member ids losing the role; a
/// non-owner may not take a role away from an `admin` holder.
pub fn update_members(actor: &User, chat: &Chat, role: &Role, removed: &[Uuid]) -> Verdict {
    let verdict = check_ranked(actor, chat, Action::UpdateRoleMembers, &[Target::Role(role)]);
    if !verdict.allowed || chat.is_owner(actor.id) || !rule_for(Action::UpdateRoleMembers).protect_admin {
        return verdict;
    }
    let demotes_admin = chat
        .members
        .iter()
        .filter(|m| removed.contains(&m.id))
        .any(|m| holds_admin(chat, m.user_id));
    if demotes_admin {
        return Verdict::forbidden(format!("Cannot remove an admin from role '{}'", role.name));
    }
    verdict
}

/// Reordering must out-rank every role it moves.
///
/// Callers pass every role whose level changes: the selected roles and any
/// unselected roles inside the selection's level span.
pub fn update_levels(actor: &User, chat: &Chat, roles: &[&Role]) -> Verdict {
    if roles.is_empty() {
        return Verdict::forbidden("No roles to reorder");
    }
    let targets: Vec<Target<'_>> = roles.iter().map(|&r| Target::Role(r)).collect();
    check_ranked(actor, chat, Action::UpdateRoleLevels, &targets)
}

pub fn delete(actor: &User, chat: &Chat, role: &Role) -> Verdict {
    check_ranked(actor, chat, Action::DeleteRole, &[Target::Role(role)])
}
