//! Chat, member and user repository.
//!
//! Loads the fully populated [`Chat`] the policy engine decides over, and
//! creates the rows the ordinal store works on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_common::models::{Chat, ChatKind, ChatMember, User};
use parley_common::permissions::Permissions;
use parley_common::snowflake;
use sqlx::PgPool;
use uuid::Uuid;

use crate::repository::roles;
use crate::store::{ChatDirectory, MembershipStore, StoreError, StoreResult};

#[derive(Debug, sqlx::FromRow)]
struct ChatRow {
    id: Uuid,
    name: Option<String>,
    owner_id: Uuid,
    is_private: bool,
    kind: String,
    role_count: i32,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct MemberRow {
    id: Uuid,
    user_id: Uuid,
    chat_id: Uuid,
    muted_until: Option<DateTime<Utc>>,
    role_ids: Vec<Uuid>,
    joined_at: DateTime<Utc>,
}

impl From<MemberRow> for ChatMember {
    fn from(row: MemberRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            chat_id: row.chat_id,
            muted_until: row.muted_until,
            role_ids: row.role_ids,
            joined_at: row.joined_at,
        }
    }
}

/// Create a user.
pub async fn create_user(pool: &PgPool, username: &str) -> StoreResult<User> {
    let id = snowflake::generate_id();
    sqlx::query("INSERT INTO users (id, username, created_at) VALUES ($1, $2, NOW())")
        .bind(id)
        .bind(username)
        .execute(pool)
        .await?;
    Ok(User::new(id, username))
}

/// Record that `user_id` blocked `blocked_id`. Blocking twice is a no-op.
pub async fn block_user(pool: &PgPool, user_id: Uuid, blocked_id: Uuid) -> StoreResult<()> {
    sqlx::query("INSERT INTO user_blocks (user_id, blocked_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
        .bind(user_id)
        .bind(blocked_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Create a chat, its default role and the owner's membership in one transaction.
pub async fn create_chat(
    pool: &PgPool,
    owner_id: Uuid,
    name: Option<&str>,
    kind: ChatKind,
    is_private: bool,
) -> StoreResult<Chat> {
    let chat_id = snowflake::generate_id();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO chats (id, name, owner_id, is_private, kind, role_count, created_at)
        VALUES ($1, $2, $3, $4, $5, 0, NOW())
        "#,
    )
    .bind(chat_id)
    .bind(name)
    .bind(owner_id)
    .bind(is_private)
    .bind(kind.as_str())
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO roles (id, chat_id, name, role_level, is_default, permissions, created_at, updated_at)
        VALUES ($1, $2, 'everyone', NULL, true, $3, NOW(), NOW())
        "#,
    )
    .bind(snowflake::generate_id())
    .bind(chat_id)
    .bind(Permissions::default_everyone().bits())
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO chat_members (id, chat_id, user_id, joined_at) VALUES ($1, $2, $3, NOW())")
        .bind(snowflake::generate_id())
        .bind(chat_id)
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    tracing::info!(%chat_id, %owner_id, kind = kind.as_str(), "Chat created");

    load_chat(pool, chat_id)
        .await?
        .ok_or_else(|| StoreError::NotFound("Chat".into()))
}

/// Add a user to a chat.
pub async fn add_member(pool: &PgPool, chat_id: Uuid, user_id: Uuid) -> StoreResult<ChatMember> {
    let row = sqlx::query_as::<_, MemberRow>(
        r#"
        INSERT INTO chat_members (id, chat_id, user_id, joined_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (chat_id, user_id) DO NOTHING
        RETURNING id, user_id, chat_id, muted_until, ARRAY[]::uuid[] AS role_ids, joined_at
        "#,
    )
    .bind(snowflake::generate_id())
    .bind(chat_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    row.map(ChatMember::from)
        .ok_or_else(|| StoreError::Conflict("already a member".into()))
}

/// Remove a user from a chat. Their role assignments go with the membership row.
pub async fn remove_member(pool: &PgPool, chat_id: Uuid, user_id: Uuid) -> StoreResult<()> {
    let removed = sqlx::query("DELETE FROM chat_members WHERE chat_id = $1 AND user_id = $2")
        .bind(chat_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    if removed.rows_affected() == 0 {
        return Err(StoreError::NotFound("Member".into()));
    }
    Ok(())
}

pub async fn set_muted_until(
    pool: &PgPool,
    chat_id: Uuid,
    user_id: Uuid,
    until: Option<DateTime<Utc>>,
) -> StoreResult<()> {
    let updated = sqlx::query("UPDATE chat_members SET muted_until = $3 WHERE chat_id = $1 AND user_id = $2")
        .bind(chat_id)
        .bind(user_id)
        .bind(until)
        .execute(pool)
        .await?;
    if updated.rows_affected() == 0 {
        return Err(StoreError::NotFound("Member".into()));
    }
    Ok(())
}

pub async fn load_user(pool: &PgPool, user_id: Uuid) -> StoreResult<Option<User>> {
    let row: Option<(Uuid, String)> = sqlx::query_as("SELECT id, username FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    let Some((id, username)) = row else {
        return Ok(None);
    };

    let blocked_user_ids = sqlx::query_scalar("SELECT blocked_id FROM user_blocks WHERE user_id = $1")
        .bind(user_id)
        .fetch_all(pool)
        .await?;
    Ok(Some(User {
        id,
        username,
        blocked_user_ids,
    }))
}

pub async fn load_chat(pool: &PgPool, chat_id: Uuid) -> StoreResult<Option<Chat>> {
    let row = sqlx::query_as::<_, ChatRow>(
        "SELECT id, name, owner_id, is_private, kind, role_count, created_at FROM chats WHERE id = $1",
    )
    .bind(chat_id)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };

    let kind = ChatKind::parse(&row.kind)
        .ok_or_else(|| StoreError::Unexpected(anyhow::anyhow!("unknown chat kind '{}'", row.kind)))?;

    let members = sqlx::query_as::<_, MemberRow>(
        r#"
        SELECT m.id, m.user_id, m.chat_id, m.muted_until, m.joined_at,
               COALESCE(ARRAY_AGG(rm.role_id) FILTER (WHERE rm.role_id IS NOT NULL), '{}') AS role_ids
        FROM chat_members m
        LEFT JOIN role_members rm ON rm.member_id = m.id
        WHERE m.chat_id = $1
        GROUP BY m.id
        ORDER BY m.joined_at
        "#,
    )
    .bind(chat_id)
    .fetch_all(pool)
    .await?;

    let roles = roles::chat_roles(pool, chat_id).await?;

    Ok(Some(Chat {
        id: row.id,
        name: row.name,
        owner_id: row.owner_id,
        is_private: row.is_private,
        kind,
        members: members.into_iter().map(ChatMember::from).collect(),
        roles,
        role_count: row.role_count,
        created_at: row.created_at,
    }))
}

#[derive(Clone)]
pub struct PgChatDirectory {
    pool: PgPool,
}

impl PgChatDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatDirectory for PgChatDirectory {
    async fn load_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        load_user(&self.pool, user_id).await
    }

    async fn load_chat(&self, chat_id: Uuid) -> StoreResult<Option<Chat>> {
        load_chat(&self.pool, chat_id).await
    }
}

#[async_trait]
impl MembershipStore for PgChatDirectory {
    async fn join_chat(&self, chat_id: Uuid, user_id: Uuid) -> StoreResult<ChatMember> {
        add_member(&self.pool, chat_id, user_id).await
    }

    async fn leave_chat(&self, chat_id: Uuid, user_id: Uuid) -> StoreResult<()> {
        remove_member(&self.pool, chat_id, user_id).await
    }

    async fn set_muted_until(&self, chat_id: Uuid, user_id: Uuid, until: Option<DateTime<Utc>>) -> StoreResult<()> {
        set_muted_until(&self.pool, chat_id, user_id, until).await
    }

    async fn block_user(&self, user_id: Uuid, blocked_id: Uuid) -> StoreResult<()> {
        block_user(&self.pool, user_id, blocked_id).await
    }
}
