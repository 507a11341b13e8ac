//! In-memory role storage.
//!
//! All state sits behind one `tokio::sync::Mutex`. A transaction holds the lock
//! for its whole life, which serializes writers per store the same way the
//! Postgres backend serializes them per chat.
//!
//! Two commit modes:
//! - **transactional** (default): writes go to a staged copy of the chat and are
//!   published on commit; dropping the transaction discards them.
//! - **autocommit**: writes land immediately and survive a dropped transaction.
//!   This models a backend without atomic multi-row writes and is what the
//!   compensating restore in [`crate::role_store`] exists for.
//!
//! Faults can be injected to exercise those failure paths.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_common::models::{Chat, ChatKind, ChatMember, Role, RoleRank, User};
use parley_common::permissions::Permissions;
use parley_common::snowflake;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::ordinal::{LevelAssignment, LevelSnapshot};
use crate::store::{
    ChatDirectory, MembershipStore, NewRole, RoleStorage, RoleTransaction, StoreError, StoreResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitMode {
    Transactional,
    Autocommit,
}

#[derive(Debug, Default)]
struct Faults {
    /// Level writes allowed before the next one fails. Fires once.
    level_writes_left: Option<usize>,
    failing_restores: u32,
    fail_next_commit: bool,
}

impl Faults {
    fn level_write(&mut self) -> StoreResult<()> {
        match self.level_writes_left {
            Some(0) => {
                self.level_writes_left = None;
                Err(injected("level write"))
            }
            Some(ref mut left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn restore(&mut self) -> StoreResult<()> {
        if self.failing_restores > 0 {
            self.failing_restores -= 1;
            return Err(injected("restore"));
        }
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<()> {
        if std::mem::take(&mut self.fail_next_commit) {
            return Err(injected("commit"));
        }
        Ok(())
    }
}

fn injected(what: &str) -> StoreError {
    StoreError::Unexpected(anyhow::anyhow!("injected {what} failure"))
}

#[derive(Debug, Default)]
struct State {
    chats: HashMap<Uuid, Chat>,
    users: HashMap<Uuid, User>,
    faults: Faults,
}

impl State {
    fn chat(&self, chat_id: Uuid) -> StoreResult<&Chat> {
        self.chats
            .get(&chat_id)
            .ok_or_else(|| StoreError::NotFound("Chat".into()))
    }

    fn chat_mut(&mut self, chat_id: Uuid) -> StoreResult<&mut Chat> {
        self.chats
            .get_mut(&chat_id)
            .ok_or_else(|| StoreError::NotFound("Chat".into()))
    }

    fn chat_of_role(&mut self, role_id: Uuid) -> StoreResult<&mut Chat> {
        self.chats
            .values_mut()
            .find(|chat| chat.role(role_id).is_some())
            .ok_or_else(|| StoreError::NotFound("Role".into()))
    }
}

/// Cloning shares the underlying state.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    mode: CommitMode,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            mode: CommitMode::Transactional,
        }
    }

    /// A store whose writes are visible as soon as they are made.
    pub fn autocommit() -> Self {
        Self {
            mode: CommitMode::Autocommit,
            ..Self::new()
        }
    }

    /// Let `writes` level writes succeed, then fail the next one.
    pub async fn fail_level_write_after(&self, writes: usize) {
        self.state.lock().await.faults.level_writes_left = Some(writes);
    }

    /// Fail the next `count` level restores.
    pub async fn fail_next_restores(&self, count: u32) {
        self.state.lock().await.faults.failing_restores = count;
    }

    pub async fn fail_next_commit(&self) {
        self.state.lock().await.faults.fail_next_commit = true;
    }

    pub async fn insert_user(&self, user: User) {
        self.state.lock().await.users.insert(user.id, user);
    }

    /// Create a chat owned by `owner`, with its default role and the owner as first member.
    pub async fn create_chat(
        &self,
        owner_id: Uuid,
        name: Option<&str>,
        kind: ChatKind,
        is_private: bool,
    ) -> StoreResult<Chat> {
        let now = Utc::now();
        let chat_id = snowflake::generate_id();
        let chat = Chat {
            id: chat_id,
            name: name.map(str::to_string),
            owner_id,
            is_private,
            kind,
            members: vec![new_member(chat_id, owner_id, now)],
            roles: vec![Role {
                id: snowflake::generate_id(),
                chat_id,
                name: "everyone".into(),
                rank: RoleRank::Default,
                permissions: Permissions::default_everyone(),
                member_ids: Vec::new(),
                created_at: now,
                updated_at: now,
            }],
            role_count: 0,
            created_at: now,
        };
        self.state.lock().await.chats.insert(chat_id, chat.clone());
        Ok(chat)
    }

    /// Overwrite a role's rank without touching the counter. Test hook for
    /// building inconsistent states.
    pub async fn force_rank(&self, role_id: Uuid, rank: RoleRank) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let chat = state.chat_of_role(role_id)?;
        let role = role_mut(chat, role_id)?;
        role.rank = rank;
        Ok(())
    }
}

fn new_member(chat_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> ChatMember {
    ChatMember {
        id: snowflake::generate_id(),
        user_id,
        chat_id,
        muted_until: None,
        role_ids: Vec::new(),
        joined_at: now,
    }
}

fn role_mut(chat: &mut Chat, role_id: Uuid) -> StoreResult<&mut Role> {
    chat.roles
        .iter_mut()
        .find(|r| r.id == role_id)
        .ok_or_else(|| StoreError::NotFound("Role".into()))
}

#[async_trait]
impl RoleStorage for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self, chat_id: Uuid) -> StoreResult<MemoryTx> {
        let guard = self.state.clone().lock_owned().await;
        let staged = match self.mode {
            CommitMode::Transactional => Some(guard.chat(chat_id)?.clone()),
            CommitMode::Autocommit => {
                guard.chat(chat_id)?;
                None
            }
        };
        Ok(MemoryTx {
            guard,
            chat_id,
            staged,
        })
    }

    async fn list_roles(&self, chat_id: Uuid) -> StoreResult<Vec<Role>> {
        let state = self.state.lock().await;
        let mut roles = state.chat(chat_id)?.roles.clone();
        roles.sort_by_key(|r| (r.level().is_none(), r.level()));
        Ok(roles)
    }

    async fn update_metadata(
        &self,
        role_id: Uuid,
        name: Option<&str>,
        permissions: Option<Permissions>,
    ) -> StoreResult<Role> {
        let mut state = self.state.lock().await;
        let role = role_mut(state.chat_of_role(role_id)?, role_id)?;
        if let Some(name) = name {
            role.name = name.to_string();
        }
        if let Some(permissions) = permissions {
            role.permissions = permissions;
        }
        role.updated_at = Utc::now();
        Ok(role.clone())
    }

    async fn set_members(&self, role_id: Uuid, member_ids: &[Uuid]) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let chat = state.chat_of_role(role_id)?;
        check_members(chat, role_id, member_ids)?;

        for member in &mut chat.members {
            member.role_ids.retain(|id| *id != role_id);
        }
        let role = role_mut(chat, role_id)?;
        role.member_ids = member_ids.to_vec();
        role.updated_at = Utc::now();
        Ok(())
    }

    async fn add_member(&self, role_id: Uuid, member_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let chat = state.chat_of_role(role_id)?;
        check_members(chat, role_id, &[member_id])?;

        let role = role_mut(chat, role_id)?;
        if !role.member_ids.contains(&member_id) {
            role.member_ids.push(member_id);
            role.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn atomic_writes(&self) -> bool {
        self.mode == CommitMode::Transactional
    }
}

fn check_members(chat: &Chat, role_id: Uuid, member_ids: &[Uuid]) -> StoreResult<()> {
    if chat.role(role_id).is_some_and(Role::is_default) {
        return Err(StoreError::Conflict(
            "every member holds the default role implicitly".into(),
        ));
    }
    match member_ids
        .iter()
        .find(|id| !chat.members.iter().any(|m| m.id == **id))
    {
        Some(_) => Err(StoreError::NotFound("Member".into())),
        None => Ok(()),
    }
}

/// Holds the store lock until committed or dropped.
pub struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    chat_id: Uuid,
    staged: Option<Chat>,
}

impl MemoryTx {
    fn chat(&self) -> StoreResult<&Chat> {
        match &self.staged {
            Some(chat) => Ok(chat),
            None => self.guard.chat(self.chat_id),
        }
    }

    fn chat_mut(&mut self) -> StoreResult<&mut Chat> {
        match &mut self.staged {
            Some(chat) => Ok(chat),
            None => self.guard.chat_mut(self.chat_id),
        }
    }
}

#[async_trait]
impl RoleTransaction for MemoryTx {
    async fn roles(&mut self) -> StoreResult<Vec<Role>> {
        Ok(self.chat()?.roles.clone())
    }

    async fn role_count(&mut self) -> StoreResult<i32> {
        Ok(self.chat()?.role_count)
    }

    async fn set_role_count(&mut self, count: i32) -> StoreResult<()> {
        self.chat_mut()?.role_count = count;
        Ok(())
    }

    async fn insert_role(&mut self, new: NewRole) -> StoreResult<Role> {
        let chat = self.chat_mut()?;
        if new.chat_id != chat.id {
            return Err(StoreError::Conflict("role belongs to another chat".into()));
        }
        let now = Utc::now();
        let role = Role {
            id: new.id,
            chat_id: new.chat_id,
            name: new.name,
            rank: new.rank,
            permissions: new.permissions,
            member_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        chat.roles.push(role.clone());
        Ok(role)
    }

    async fn delete_role(&mut self, role_id: Uuid) -> StoreResult<()> {
        let chat = self.chat_mut()?;
        let before = chat.roles.len();
        chat.roles.retain(|r| r.id != role_id);
        if chat.roles.len() == before {
            return Err(StoreError::NotFound("Role".into()));
        }
        for member in &mut chat.members {
            member.role_ids.retain(|id| *id != role_id);
        }
        Ok(())
    }

    async fn clear_levels(&mut self, role_ids: &[Uuid]) -> StoreResult<()> {
        // No unique index to dodge here; only check the roles exist.
        let chat = self.chat()?;
        match role_ids.iter().find(|id| chat.role(**id).is_none()) {
            Some(_) => Err(StoreError::NotFound("Role".into())),
            None => Ok(()),
        }
    }

    async fn assign_levels(&mut self, assignments: &[LevelAssignment], at: DateTime<Utc>) -> StoreResult<()> {
        for a in assignments {
            self.guard.faults.level_write()?;
            let role = role_mut(self.chat_mut()?, a.role_id)?;
            role.rank = RoleRank::Ranked(a.level);
            role.updated_at = at;
        }
        Ok(())
    }

    async fn restore_levels(&mut self, snapshot: &[LevelSnapshot]) -> StoreResult<()> {
        self.guard.faults.restore()?;
        let chat = self.chat_mut()?;
        for s in snapshot {
            let role = role_mut(chat, s.role_id)?;
            role.rank = RoleRank::Ranked(s.level);
            role.updated_at = s.updated_at;
        }
        Ok(())
    }

    async fn commit(mut self) -> StoreResult<()> {
        self.guard.faults.commit()?;
        if let Some(chat) = self.staged.take() {
            self.guard.chats.insert(chat.id, chat);
        }
        Ok(())
    }
}

#[async_trait]
impl ChatDirectory for MemoryStore {
    async fn load_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn load_chat(&self, chat_id: Uuid) -> StoreResult<Option<Chat>> {
        Ok(self.state.lock().await.chats.get(&chat_id).cloned())
    }
}

#[async_trait]
impl MembershipStore for MemoryStore {
    async fn join_chat(&self, chat_id: Uuid, user_id: Uuid) -> StoreResult<ChatMember> {
        let mut state = self.state.lock().await;
        let chat = state.chat_mut(chat_id)?;
        if chat.is_member(user_id) {
            return Err(StoreError::Conflict("already a member".into()));
        }
        let member = new_member(chat_id, user_id, Utc::now());
        chat.members.push(member.clone());
        Ok(member)
    }

    async fn leave_chat(&self, chat_id: Uuid, user_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let chat = state.chat_mut(chat_id)?;
        let member_id = chat
            .member(user_id)
            .map(|m| m.id)
            .ok_or_else(|| StoreError::NotFound("Member".into()))?;
        chat.members.retain(|m| m.id != member_id);
        for role in &mut chat.roles {
            role.member_ids.retain(|id| *id != member_id);
        }
        Ok(())
    }

    async fn set_muted_until(&self, chat_id: Uuid, user_id: Uuid, until: Option<DateTime<Utc>>) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let member = state
            .chat_mut(chat_id)?
            .members
            .iter_mut()
            .find(|m| m.user_id == user_id)
            .ok_or_else(|| StoreError::NotFound("Member".into()))?;
        member.muted_until = until;
        Ok(())
    }

    async fn block_user(&self, user_id: Uuid, blocked_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound("User".into()))?;
        if !user.has_blocked(blocked_id) {
            user.blocked_user_ids.push(blocked_id);
        }
        Ok(())
    }
}
