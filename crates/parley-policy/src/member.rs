//! Member policy: join, view, mute, unmute, kick, leave.

use parley_common::models::{Chat, ChatKind, User};
use parley_common::verdict::Verdict;
use uuid::Uuid;

use crate::engine::{Target, check_ranked, membership_gate};
use crate::rules::{Action, rule_for};

/// Self-join: public group chats only, and only once.
pub fn join(actor: &User, chat: &Chat) -> Verdict {
    if chat.kind == ChatKind::Direct {
        return Verdict::forbidden("Direct chats cannot be joined");
    }
    if chat.is_member(actor.id) {
        return Verdict::conflict("Already a member of this chat");
    }
    if chat.is_private {
        return Verdict::not_found("Chat not found");
    }
    Verdict::allow("Public group chat")
}

/// Listing members: anyone for public chats, members for private ones.
pub fn view(actor: &User, chat: &Chat) -> Verdict {
    if !chat.is_private {
        return Verdict::allow("Public chat");
    }
    membership_gate(actor, chat).unwrap_or_else(|| Verdict::allow("Member"))
}

pub fn mute(actor: &User, chat: &Chat, target_user_id: Uuid) -> Verdict {
    ranked_on_member(actor, chat, Action::MuteMember, target_user_id)
}

pub fn unmute(actor: &User, chat: &Chat, target_user_id: Uuid) -> Verdict {
    ranked_on_member(actor, chat, Action::UnmuteMember, target_user_id)
}

pub fn kick(actor: &User, chat: &Chat, target_user_id: Uuid) -> Verdict {
    ranked_on_member(actor, chat, Action::KickMember, target_user_id)
}

/// The owner has to hand the chat over before leaving.
pub fn leave(actor: &User, chat: &Chat) -> Verdict {
    if chat.is_owner(actor.id) {
        return Verdict::forbidden("The owner must transfer ownership before leaving");
    }
    membership_gate(actor, chat).unwrap_or_else(|| Verdict::allow("Member"))
}

fn ranked_on_member(actor: &User, chat: &Chat, action: Action, target_user_id: Uuid) -> Verdict {
    if actor.id == target_user_id && !chat.is_owner(actor.id) {
        return Verdict::forbidden(format!("Cannot {} yourself", rule_for(action).verb));
    }
    check_ranked(actor, chat, action, &[Target::Member(target_user_id)])
}
