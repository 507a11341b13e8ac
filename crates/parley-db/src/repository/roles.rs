//! Role repository — PostgreSQL backend for the ordinal store.
//!
//! Levels live in `roles.role_level` under a partial unique index on
//! `(chat_id, role_level)`. Postgres checks that index row by row, so every
//! level write first nulls out the levels it is about to reassign.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_common::models::{Role, RoleRank};
use parley_common::permissions::Permissions;
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::ordinal::{LevelAssignment, LevelSnapshot};
use crate::postgres;
use crate::store::{NewRole, RoleStorage, RoleTransaction, StoreError, StoreResult};

/// Flat row; `member_ids` is aggregated from `role_members`.
#[derive(Debug, sqlx::FromRow)]
pub struct RoleRow {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub name: String,
    pub role_level: Option<i32>,
    pub is_default: bool,
    pub permissions: i64,
    pub member_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<RoleRow> for Role {
    type Error = StoreError;

    fn try_from(row: RoleRow) -> Result<Self, Self::Error> {
        let rank = RoleRank::from_level(row.role_level);
        if rank.is_default() != row.is_default {
            return Err(StoreError::Unexpected(anyhow::anyhow!(
                "role {} has is_default = {} but level {:?}",
                row.id,
                row.is_default,
                row.role_level
            )));
        }
        Ok(Role {
            id: row.id,
            chat_id: row.chat_id,
            name: row.name,
            rank,
            permissions: Permissions::from_bits_truncate(row.permissions),
            member_ids: row.member_ids,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_ROLES: &str = r#"
    SELECT r.id, r.chat_id, r.name, r.role_level, r.is_default, r.permissions,
           r.created_at, r.updated_at,
           COALESCE(ARRAY_AGG(rm.member_id) FILTER (WHERE rm.member_id IS NOT NULL), '{}') AS member_ids
    FROM roles r
    LEFT JOIN role_members rm ON rm.role_id = r.id
"#;

/// All roles of a chat, ranked first by level, the default role last.
pub async fn chat_roles<'e, E: PgExecutor<'e>>(executor: E, chat_id: Uuid) -> StoreResult<Vec<Role>> {
    let rows = sqlx::query_as::<_, RoleRow>(&format!(
        "{SELECT_ROLES} WHERE r.chat_id = $1 GROUP BY r.id ORDER BY r.is_default, r.role_level"
    ))
    .bind(chat_id)
    .fetch_all(executor)
    .await?;
    rows.into_iter().map(Role::try_from).collect()
}

pub async fn find_by_id<'e, E: PgExecutor<'e>>(executor: E, role_id: Uuid) -> StoreResult<Option<Role>> {
    sqlx::query_as::<_, RoleRow>(&format!("{SELECT_ROLES} WHERE r.id = $1 GROUP BY r.id"))
        .bind(role_id)
        .fetch_optional(executor)
        .await?
        .map(Role::try_from)
        .transpose()
}

#[derive(Clone)]
pub struct PgRoleStorage {
    pool: PgPool,
}

impl PgRoleStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleStorage for PgRoleStorage {
    type Tx = PgRoleTx;

    async fn begin(&self, chat_id: Uuid) -> StoreResult<PgRoleTx> {
        let mut tx = self.pool.begin().await?;
        let locked: Option<i32> = sqlx::query_scalar("SELECT role_count FROM chats WHERE id = $1 FOR UPDATE")
            .bind(chat_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(StoreError::NotFound("Chat".into()));
        }
        Ok(PgRoleTx { tx, chat_id })
    }

    async fn list_roles(&self, chat_id: Uuid) -> StoreResult<Vec<Role>> {
        chat_roles(&self.pool, chat_id).await
    }

    async fn update_metadata(
        &self,
        role_id: Uuid,
        name: Option<&str>,
        permissions: Option<Permissions>,
    ) -> StoreResult<Role> {
        let updated: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE roles SET
                name = COALESCE($2, name),
                permissions = COALESCE($3, permissions),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id
            "#,
        )
        .bind(role_id)
        .bind(name)
        .bind(permissions.map(|p| p.bits()))
        .fetch_optional(&self.pool)
        .await?;
        if updated.is_none() {
            return Err(StoreError::NotFound("Role".into()));
        }
        find_by_id(&self.pool, role_id)
            .await?
            .ok_or_else(|| StoreError::NotFound("Role".into()))
    }

    async fn set_members(&self, role_id: Uuid, member_ids: &[Uuid]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        check_members(&mut tx, role_id, member_ids).await?;

        sqlx::query("DELETE FROM role_members WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO role_members (role_id, member_id) SELECT $1, UNNEST($2::uuid[]) ON CONFLICT DO NOTHING",
        )
        .bind(role_id)
        .bind(member_ids)
        .execute(&mut *tx)
        .await?;
        touch(&mut tx, role_id).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn add_member(&self, role_id: Uuid, member_id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        check_members(&mut tx, role_id, &[member_id]).await?;

        let inserted = sqlx::query("INSERT INTO role_members (role_id, member_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(role_id)
            .bind(member_id)
            .execute(&mut *tx)
            .await?;
        if inserted.rows_affected() > 0 {
            touch(&mut tx, role_id).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        postgres::health_check(&self.pool).await
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    fn atomic_writes(&self) -> bool {
        true
    }
}

async fn check_members(
    tx: &mut Transaction<'static, Postgres>,
    role_id: Uuid,
    member_ids: &[Uuid],
) -> StoreResult<()> {
    let role: Option<(Uuid, bool)> = sqlx::query_as("SELECT chat_id, is_default FROM roles WHERE id = $1")
        .bind(role_id)
        .fetch_optional(&mut **tx)
        .await?;
    let Some((chat_id, is_default)) = role else {
        return Err(StoreError::NotFound("Role".into()));
    };
    if is_default {
        return Err(StoreError::Conflict(
            "every member holds the default role implicitly".into(),
        ));
    }

    let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_members WHERE chat_id = $1 AND id = ANY($2)")
        .bind(chat_id)
        .bind(member_ids)
        .fetch_one(&mut **tx)
        .await?;
    let mut distinct = member_ids.to_vec();
    distinct.sort_unstable();
    distinct.dedup();
    if known != distinct.len() as i64 {
        return Err(StoreError::NotFound("Member".into()));
    }
    Ok(())
}

async fn touch(tx: &mut Transaction<'static, Postgres>, role_id: Uuid) -> StoreResult<()> {
    sqlx::query("UPDATE roles SET updated_at = NOW() WHERE id = $1")
        .bind(role_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// A transaction holding `FOR UPDATE` on one chat row.
pub struct PgRoleTx {
    tx: Transaction<'static, Postgres>,
    chat_id: Uuid,
}

#[async_trait]
impl RoleTransaction for PgRoleTx {
    async fn roles(&mut self) -> StoreResult<Vec<Role>> {
        chat_roles(&mut *self.tx, self.chat_id).await
    }

    async fn role_count(&mut self) -> StoreResult<i32> {
        let count = sqlx::query_scalar("SELECT role_count FROM chats WHERE id = $1")
            .bind(self.chat_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count)
    }

    async fn set_role_count(&mut self, count: i32) -> StoreResult<()> {
        sqlx::query("UPDATE chats SET role_count = $2 WHERE id = $1")
            .bind(self.chat_id)
            .bind(count)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_role(&mut self, role: NewRole) -> StoreResult<Role> {
        let row = sqlx::query_as::<_, RoleRow>(
            r#"
            INSERT INTO roles (id, chat_id, name, role_level, is_default, permissions, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            RETURNING id, chat_id, name, role_level, is_default, permissions,
                      ARRAY[]::uuid[] AS member_ids, created_at, updated_at
            "#,
        )
        .bind(role.id)
        .bind(role.chat_id)
        .bind(&role.name)
        .bind(role.rank.level())
        .bind(role.rank.is_default())
        .bind(role.permissions.bits())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(unique_as_conflict)?;
        Role::try_from(row)
    }

    async fn delete_role(&mut self, role_id: Uuid) -> StoreResult<()> {
        let deleted = sqlx::query("DELETE FROM roles WHERE id = $1 AND chat_id = $2")
            .bind(role_id)
            .bind(self.chat_id)
            .execute(&mut *self.tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(StoreError::NotFound("Role".into()));
        }
        Ok(())
    }

    async fn clear_levels(&mut self, role_ids: &[Uuid]) -> StoreResult<()> {
        sqlx::query("UPDATE roles SET role_level = NULL WHERE chat_id = $1 AND id = ANY($2) AND NOT is_default")
            .bind(self.chat_id)
            .bind(role_ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn assign_levels(&mut self, assignments: &[LevelAssignment], at: DateTime<Utc>) -> StoreResult<()> {
        let ids: Vec<Uuid> = assignments.iter().map(|a| a.role_id).collect();
        let levels: Vec<i32> = assignments.iter().map(|a| a.level).collect();
        sqlx::query(
            r#"
            UPDATE roles r SET role_level = v.level, updated_at = $4
            FROM UNNEST($2::uuid[], $3::int4[]) AS v(id, level)
            WHERE r.id = v.id AND r.chat_id = $1
            "#,
        )
        .bind(self.chat_id)
        .bind(&ids)
        .bind(&levels)
        .bind(at)
        .execute(&mut *self.tx)
        .await
        .map_err(unique_as_conflict)?;
        Ok(())
    }

    async fn restore_levels(&mut self, snapshot: &[LevelSnapshot]) -> StoreResult<()> {
        let ids: Vec<Uuid> = snapshot.iter().map(|s| s.role_id).collect();
        let levels: Vec<i32> = snapshot.iter().map(|s| s.level).collect();
        let stamps: Vec<DateTime<Utc>> = snapshot.iter().map(|s| s.updated_at).collect();
        sqlx::query(
            r#"
            UPDATE roles r SET role_level = v.level, updated_at = v.updated_at
            FROM UNNEST($2::uuid[], $3::int4[], $4::timestamptz[]) AS v(id, level, updated_at)
            WHERE r.id = v.id AND r.chat_id = $1
            "#,
        )
        .bind(self.chat_id)
        .bind(&ids)
        .bind(&levels)
        .bind(&stamps)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// Unique violations (`23505`) become conflicts; everything else stays a database error.
fn unique_as_conflict(err: sqlx::Error) -> StoreError {
    let is_unique = err
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505");
    if is_unique {
        StoreError::Conflict(err.to_string())
    } else {
        StoreError::Database(err)
    }
}
