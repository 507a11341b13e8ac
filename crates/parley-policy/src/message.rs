//! Message policy: group send, direct send, delete.
//!
//! Messaging has no rank: sending is permission-only, and a live mute beats
//! every permission, `admin` included.

use chrono::{DateTime, Utc};
use parley_common::models::{Chat, ChatKind, User};
use parley_common::permissions::{Permissions, has_permission};
use parley_common::verdict::Verdict;
use uuid::Uuid;

use crate::engine::membership_gate;

pub fn send_group(actor: &User, chat: &Chat, now: DateTime<Utc>) -> Verdict {
    if chat.kind != ChatKind::Group {
        return Verdict::forbidden("Not a group chat");
    }
    if chat.is_owner(actor.id) {
        return Verdict::allow("Chat owner");
    }
    if let Some(denied) = membership_gate(actor, chat) {
        return denied;
    }
    if let Some(until) = chat
        .member(actor.id)
        .filter(|m| m.is_muted_at(now))
        .and_then(|m| m.muted_until)
    {
        return Verdict::forbidden(format!("You are muted until {}", until.to_rfc3339()));
    }
    if has_permission(&chat.roles_of(actor.id), Permissions::SEND_MESSAGE) {
        Verdict::allow("Holds send_message")
    } else {
        Verdict::forbidden("Missing permission send_message")
    }
}

pub fn send_direct(actor: &User, chat: &Chat, recipient: &User) -> Verdict {
    if chat.kind != ChatKind::Direct {
        return Verdict::forbidden("Not a direct chat");
    }
    if let Some(denied) = membership_gate(actor, chat) {
        return denied;
    }
    if !chat.is_member(recipient.id) {
        return Verdict::not_found("Recipient not found");
    }
    if actor.is_blocked_with(recipient) {
        return Verdict::forbidden("Messaging is blocked between these users");
    }
    Verdict::allow("Direct chat member")
}

/// Authors can delete their own messages; others need `manage_message`.
pub fn delete(actor: &User, chat: &Chat, author_id: Uuid) -> Verdict {
    if chat.is_owner(actor.id) {
        return Verdict::allow("Chat owner");
    }
    if let Some(denied) = membership_gate(actor, chat) {
        return denied;
    }
    if actor.id == author_id {
        return Verdict::allow("Author");
    }
    if has_permission(&chat.roles_of(actor.id), Permissions::MANAGE_MESSAGE) {
        Verdict::allow("Holds manage_message")
    } else {
        Verdict::forbidden("Missing permission manage_message to delete this message")
    }
}
