//! Member service: joining, leaving, moderation and blocks.

use chrono::{DateTime, Utc};
use parley_common::error::{ParleyError, ParleyResult};
use parley_common::models::ChatMember;
use parley_db::MembershipStore;
use parley_policy::member as member_policy;
use uuid::Uuid;

use crate::roles::{enforce, load};

pub struct MemberService<D> {
    directory: D,
}

impl<D: MembershipStore> MemberService<D> {
    pub fn new(directory: D) -> Self {
        Self { directory }
    }

    pub async fn join(&self, user_id: Uuid, chat_id: Uuid) -> ParleyResult<ChatMember> {
        let (user, chat) = load(&self.directory, user_id, chat_id).await?;
        enforce(member_policy::join(&user, &chat), "join", &user, &chat)?;

        let member = self.directory.join_chat(chat_id, user_id).await?;
        tracing::info!(%chat_id, %user_id, "Member joined");
        Ok(member)
    }

    pub async fn leave(&self, user_id: Uuid, chat_id: Uuid) -> ParleyResult<()> {
        let (user, chat) = load(&self.directory, user_id, chat_id).await?;
        enforce(member_policy::leave(&user, &chat), "leave", &user, &chat)?;

        self.directory.leave_chat(chat_id, user_id).await?;
        tracing::info!(%chat_id, %user_id, "Member left");
        Ok(())
    }

    /// Mute `target_id` until `until`, which must lie in the future.
    pub async fn mute(
        &self,
        actor_id: Uuid,
        chat_id: Uuid,
        target_id: Uuid,
        until: DateTime<Utc>,
    ) -> ParleyResult<()> {
        if until <= Utc::now() {
            return Err(ParleyError::Validation {
                message: "A mute must end in the future".into(),
            });
        }
        let (actor, chat) = load(&self.directory, actor_id, chat_id).await?;
        enforce(member_policy::mute(&actor, &chat, target_id), "mute", &actor, &chat)?;

        self.directory
            .set_muted_until(chat_id, target_id, Some(until))
            .await?;
        tracing::info!(%chat_id, %actor_id, %target_id, %until, "Member muted");
        Ok(())
    }

    pub async fn unmute(&self, actor_id: Uuid, chat_id: Uuid, target_id: Uuid) -> ParleyResult<()> {
        let (actor, chat) = load(&self.directory, actor_id, chat_id).await?;
        enforce(member_policy::unmute(&actor, &chat, target_id), "unmute", &actor, &chat)?;

        self.directory.set_muted_until(chat_id, target_id, None).await?;
        tracing::info!(%chat_id, %actor_id, %target_id, "Member unmuted");
        Ok(())
    }

    pub async fn kick(&self, actor_id: Uuid, chat_id: Uuid, target_id: Uuid) -> ParleyResult<()> {
        let (actor, chat) = load(&self.directory, actor_id, chat_id).await?;
        enforce(member_policy::kick(&actor, &chat, target_id), "kick", &actor, &chat)?;

        self.directory.leave_chat(chat_id, target_id).await?;
        tracing::info!(%chat_id, %actor_id, %target_id, "Member kicked");
        Ok(())
    }

    /// Blocks are personal and need no chat; they only have to name a real user.
    pub async fn block(&self, user_id: Uuid, blocked_id: Uuid) -> ParleyResult<()> {
        if user_id == blocked_id {
            return Err(ParleyError::Validation {
                message: "Cannot block yourself".into(),
            });
        }
        for id in [user_id, blocked_id] {
            if self.directory.load_user(id).await?.is_none() {
                return Err(ParleyError::not_found("User"));
            }
        }
        self.directory.block_user(user_id, blocked_id).await?;
        tracing::info!(%user_id, %blocked_id, "User blocked");
        Ok(())
    }
}
