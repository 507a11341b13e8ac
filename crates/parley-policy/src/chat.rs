//! Chat-profile policy: view, update, delete, transfer ownership.

use parley_common::models::{Chat, ChatKind, User};
use parley_common::permissions::{Permissions, has_permission};
use parley_common::verdict::Verdict;
use uuid::Uuid;

use crate::engine::membership_gate;

pub fn view(actor: &User, chat: &Chat) -> Verdict {
    if chat.kind == ChatKind::Group && !chat.is_private {
        return Verdict::allow("Public chat");
    }
    membership_gate(actor, chat).unwrap_or_else(|| Verdict::allow("Member"))
}

/// Editing name or privacy: owner, or a holder of `manage_chat`. Direct chats have no profile.
pub fn update_profile(actor: &User, chat: &Chat) -> Verdict {
    if chat.kind == ChatKind::Direct {
        return Verdict::forbidden("Direct chats cannot be edited");
    }
    if chat.is_owner(actor.id) {
        return Verdict::allow("Chat owner");
    }
    if let Some(denied) = membership_gate(actor, chat) {
        return denied;
    }
    if has_permission(&chat.roles_of(actor.id), Permissions::MANAGE_CHAT) {
        Verdict::allow("Holds manage_chat")
    } else {
        Verdict::forbidden("Missing permission manage_chat to edit this chat")
    }
}

pub fn delete(actor: &User, chat: &Chat) -> Verdict {
    if chat.is_owner(actor.id) {
        return Verdict::allow("Chat owner");
    }
    membership_gate(actor, chat)
        .unwrap_or_else(|| Verdict::forbidden("Only the owner can delete this chat"))
}

pub fn transfer_ownership(actor: &User, chat: &Chat, new_owner_id: Uuid) -> Verdict {
    if !chat.is_owner(actor.id) {
        return membership_gate(actor, chat)
            .unwrap_or_else(|| Verdict::forbidden("Only the owner can transfer ownership"));
    }
    if new_owner_id == actor.id {
        return Verdict::conflict("You already own this chat");
    }
    if !chat.is_member(new_owner_id) {
        return Verdict::not_found("Member not found");
    }
    Verdict::allow("Chat owner")
}
