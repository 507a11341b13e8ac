//! In-memory chat fixtures for policy tests.

use chrono::{DateTime, Utc};
use parley_common::models::{Chat, ChatKind, ChatMember, Role, RoleRank, User};
use parley_common::permissions::Permissions;
use uuid::Uuid;

pub struct Fixture {
    pub chat: Chat,
    pub owner: User,
}

impl Fixture {
    /// Group chat with an owner member and a default role granting `send_message`.
    pub fn group(is_private: bool) -> Self {
        Self::new(ChatKind::Group, is_private)
    }

    pub fn direct() -> Self {
        Self::new(ChatKind::Direct, true)
    }

    fn new(kind: ChatKind, is_private: bool) -> Self {
        let owner = User::new(Uuid::now_v7(), "owner");
        let chat_id = Uuid::now_v7();
        let now = Utc::now();
        let everyone = Role {
            id: Uuid::now_v7(),
            chat_id,
            name: "everyone".into(),
            rank: RoleRank::Default,
            permissions: Permissions::default_everyone(),
            member_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let mut fx = Self {
            chat: Chat {
                id: chat_id,
                name: Some("test".into()),
                owner_id: owner.id,
                is_private,
                kind,
                members: Vec::new(),
                roles: vec![everyone],
                role_count: 0,
                created_at: now,
            },
            owner: owner.clone(),
        };
        fx.join(&owner);
        fx
    }

    pub fn outsider(name: &str) -> User {
        User::new(Uuid::now_v7(), name)
    }

    pub fn add_member(&mut self, name: &str) -> User {
        let user = User::new(Uuid::now_v7(), name);
        self.join(&user);
        user
    }

    pub fn join(&mut self, user: &User) {
        self.chat.members.push(ChatMember {
            id: Uuid::now_v7(),
            user_id: user.id,
            chat_id: self.chat.id,
            muted_until: None,
            role_ids: Vec::new(),
            joined_at: Utc::now(),
        });
    }

    /// Add a ranked role at `level`; callers keep levels dense themselves.
    pub fn add_role(&mut self, level: i32, permissions: Permissions) -> Uuid {
        let now = Utc::now();
        let role = Role {
            id: Uuid::now_v7(),
            chat_id: self.chat.id,
            name: format!("level-{level}"),
            rank: RoleRank::Ranked(level),
            permissions,
            member_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let id = role.id;
        self.chat.roles.push(role);
        self.chat.role_count += 1;
        id
    }

    pub fn grant(&mut self, user: &User, role_id: Uuid) {
        let member_id = self
            .chat
            .member(user.id)
            .map(|m| m.id)
            .expect("user must be a member");
        let role = self
            .chat
            .roles
            .iter_mut()
            .find(|r| r.id == role_id)
            .expect("role must exist");
        role.member_ids.push(member_id);
    }

    pub fn set_default_permissions(&mut self, permissions: Permissions) {
        if let Some(role) = self.chat.roles.iter_mut().find(|r| r.is_default()) {
            role.permissions = permissions;
        }
    }

    pub fn mute(&mut self, user: &User, until: DateTime<Utc>) {
        if let Some(member) = self.chat.members.iter_mut().find(|m| m.user_id == user.id) {
            member.muted_until = Some(until);
        }
    }

    pub fn role(&self, role_id: Uuid) -> &Role {
        self.chat.role(role_id).expect("role must exist")
    }

    pub fn default_role(&self) -> &Role {
        self.chat.default_role().expect("default role exists")
    }
}
