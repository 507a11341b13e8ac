//! The ranked authorization algorithm.
//!
//! Order of checks:
//! 1. absolute protections (owner target, default-role target, foreign role), binding even on the owner
//! 2. owner short-circuit
//! 3. membership gate (`not_found` for private chats so existence does not leak)
//! 4. admin-holder protection
//! 5. raw rank: the actor's best level strictly out-ranks the target
//! 6. permission-gated rank: the best level among the actor's roles that carry
//!    the required permission strictly out-ranks the target
//!
//! Steps 5 and 6 run per target; every target must pass.

use parley_common::models::{Chat, Role, User};
use parley_common::permissions::{Permissions, Rank, has_permission, highest_role_level, roles_with_permission};
use parley_common::verdict::Verdict;
use uuid::Uuid;

use crate::rules::{Action, Rule, rule_for};

/// Something a ranked action is aimed at.
#[derive(Debug, Clone)]
pub enum Target<'a> {
    /// A chat member, identified by user id.
    Member(Uuid),
    Role(&'a Role),
}

impl Target<'_> {
    fn describe(&self) -> String {
        match self {
            Target::Member(user_id) => format!("member {user_id}"),
            Target::Role(role) => format!("role '{}'", role.name),
        }
    }
}

/// Deny non-members: `not_found` for private chats, `forbidden` otherwise.
pub fn membership_gate(actor: &User, chat: &Chat) -> Option<Verdict> {
    if chat.is_owner(actor.id) || chat.is_member(actor.id) {
        return None;
    }
    Some(if chat.is_private {
        Verdict::not_found("Chat not found")
    } else {
        Verdict::forbidden("You are not a member of this chat")
    })
}

/// Whether the user holds `admin` through any of their roles in `chat`.
pub fn holds_admin(chat: &Chat, user_id: Uuid) -> bool {
    has_permission(&chat.roles_of(user_id), Permissions::ADMIN)
}

/// Evaluate a ranked `action` by `actor` against every target.
pub fn check_ranked(actor: &User, chat: &Chat, action: Action, targets: &[Target<'_>]) -> Verdict {
    let rule = rule_for(action);

    for target in targets {
        if let Some(denied) = absolute_protection(rule, chat, target) {
            return denied;
        }
    }

    if chat.is_owner(actor.id) {
        return Verdict::allow("Chat owner");
    }

    if let Some(denied) = membership_gate(actor, chat) {
        return denied;
    }

    let actor_roles = chat.roles_of(actor.id);
    let actor_rank = highest_role_level(actor_roles.iter().copied());
    let granting = roles_with_permission(&actor_roles, rule.required);
    let granted_rank = highest_role_level(granting.iter().copied());

    for target in targets {
        let target_rank = match target_rank(chat, target) {
            Ok(rank) => rank,
            Err(denied) => return denied,
        };

        if rule.protect_admin {
            if let Target::Member(user_id) = target {
                if holds_admin(chat, *user_id) {
                    return Verdict::forbidden(format!("Cannot {} an admin", rule.verb));
                }
            }
        }

        if actor_rank.outranks(target_rank) || granted_rank.outranks(target_rank) {
            continue;
        }

        let reason = if granting.is_empty() {
            format!(
                "Missing permission {} to {} {}",
                rule.required.describe(),
                rule.verb,
                target.describe()
            )
        } else {
            format!(
                "Your roles with {} ({granted_rank}) do not out-rank {} ({target_rank})",
                rule.required.describe(),
                target.describe()
            )
        };
        return Verdict::forbidden(reason);
    }

    Verdict::allow("Out-ranks every target")
}

fn absolute_protection(rule: &Rule, chat: &Chat, target: &Target<'_>) -> Option<Verdict> {
    match target {
        Target::Role(role) if role.chat_id != chat.id => Some(Verdict::not_found("Role not found")),
        Target::Member(user_id) if rule.protect_owner && chat.is_owner(*user_id) => {
            Some(Verdict::forbidden(format!("Cannot {} the chat owner", rule.verb)))
        }
        Target::Role(role) if rule.protect_default_role && role.is_default() => Some(
            Verdict::forbidden(format!("Cannot {} the default role", rule.verb)),
        ),
        _ => None,
    }
}

fn target_rank(chat: &Chat, target: &Target<'_>) -> Result<Rank, Verdict> {
    match target {
        Target::Member(user_id) => {
            if !chat.is_member(*user_id) {
                return Err(Verdict::not_found("Member not found"));
            }
            Ok(highest_role_level(chat.roles_of(*user_id)))
        }
        Target::Role(role) => Ok(Rank::from(role.rank)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use parley_common::verdict::VerdictCode;

    #[test]
    fn test_raw_rank_needs_no_permission() {
        let mut fx = Fixture::group(false);
        let high = fx.add_role(1, Permissions::empty());
        let low = fx.add_role(2, Permissions::empty());
        let actor = fx.add_member("actor");
        let target = fx.add_member("target");
        fx.grant(&actor, high);
        fx.grant(&target, low);

        let v = check_ranked(&actor, &fx.chat, Action::KickMember, &[Target::Member(target.id)]);
        assert!(v.allowed, "{v}");
    }

    #[test]
    fn test_roles_do_not_combine_rank_and_permission() {
        let mut fx = Fixture::group(false);
        let target_role = fx.add_role(2, Permissions::empty());
        let unprivileged_equal = fx.add_role(3, Permissions::empty());
        let kicker_below = fx.add_role(4, Permissions::KICK_MEMBER);
        let actor = fx.add_member("actor");
        let target = fx.add_member("target");
        fx.grant(&target, target_role);
        fx.grant(&actor, unprivileged_equal);
        fx.grant(&actor, kicker_below);

        let v = check_ranked(&actor, &fx.chat, Action::KickMember, &[Target::Member(target.id)]);
        assert!(!v.allowed);
        assert_eq!(v.code, VerdictCode::Forbidden);
        assert!(v.reason.contains("kick_member"), "{}", v.reason);
    }

    #[test]
    fn test_equal_rank_is_not_enough() {
        let mut fx = Fixture::group(false);
        let shared = fx.add_role(1, Permissions::KICK_MEMBER);
        let actor = fx.add_member("actor");
        let target = fx.add_member("target");
        fx.grant(&actor, shared);
        fx.grant(&target, shared);

        let v = check_ranked(&actor, &fx.chat, Action::KickMember, &[Target::Member(target.id)]);
        assert!(!v.allowed);
    }

    #[test]
    fn test_private_chat_hides_itself_from_outsiders() {
        let mut fx = Fixture::group(true);
        let target = fx.add_member("target");
        let outsider = Fixture::outsider("outsider");

        let v = check_ranked(&outsider, &fx.chat, Action::KickMember, &[Target::Member(target.id)]);
        assert_eq!(v.code, VerdictCode::NotFound);

        fx.chat.is_private = false;
        let v = check_ranked(&outsider, &fx.chat, Action::KickMember, &[Target::Member(target.id)]);
        assert_eq!(v.code, VerdictCode::Forbidden);
    }

    #[test]
    fn test_every_target_must_be_outranked() {
        let mut fx = Fixture::group(false);
        let r1 = fx.add_role(1, Permissions::empty());
        let r2 = fx.add_role(2, Permissions::MANAGE_ROLE);
        let r3 = fx.add_role(3, Permissions::empty());
        let actor = fx.add_member("actor");
        fx.grant(&actor, r2);

        let (role1, role3) = (fx.role(r1), fx.role(r3));
        let v = check_ranked(
            &actor,
            &fx.chat,
            Action::UpdateRoleLevels,
            &[Target::Role(role3), Target::Role(role1)],
        );
        assert!(!v.allowed);

        let v = check_ranked(&actor, &fx.chat, Action::UpdateRoleLevels, &[Target::Role(role3)]);
        assert!(v.allowed);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn kick_is_decided_by_strict_rank(
                actor_level in 1i32..=12,
                target_level in 1i32..=12,
                bits in 0i64..256,
            ) {
                let mut fx = Fixture::group(false);
                let grants = Permissions::from_bits_truncate(bits);
                let ids: Vec<_> = (1..=12)
                    .map(|level| {
                        let perms = if level == actor_level { grants } else { Permissions::empty() };
                        fx.add_role(level, perms)
                    })
                    .collect();
                let actor = fx.add_member("actor");
                let target = fx.add_member("target");
                fx.grant(&actor, ids[(actor_level - 1) as usize]);
                fx.grant(&target, ids[(target_level - 1) as usize]);

                let v = check_ranked(&actor, &fx.chat, Action::KickMember, &[Target::Member(target.id)]);
                prop_assert_eq!(v.allowed, actor_level < target_level);
            }
        }
    }
}
