//! Role ordinal store.
//!
//! Keeps every chat's ranked roles on the dense range `[1, N]` (level 1 is the
//! most privileged) and the chat's role counter equal to `N`. Reorder, insert,
//! delete and repair each run inside one storage transaction. On backends
//! without atomic writes a failed reorder is additionally compensated while the
//! chat is still locked: the levels captured before the first write are put
//! back, and a compensation that keeps failing is reported as
//! [`StoreError::RollbackFailed`] rather than swallowed.
//!
//! The store performs no authorization; callers run the policy first.

use chrono::Utc;
use parley_common::config::StoreConfig;
use parley_common::models::{Role, RoleRank};
use parley_common::permissions::Permissions;
use parley_common::snowflake;
use uuid::Uuid;

use crate::ordinal::{self, LevelAssignment, LevelReport, LevelSnapshot, ReorderPlan};
use crate::store::{NewRole, RoleStorage, RoleTransaction, StoreError, StoreResult};

/// Partial metadata update. `permissions` replaces the whole set.
#[derive(Debug, Clone, Default)]
pub struct RolePatch {
    pub name: Option<String>,
    pub permissions: Option<Permissions>,
}

pub struct RoleOrdinalStore<S> {
    storage: S,
    rollback_attempts: u32,
}

impl<S: RoleStorage> RoleOrdinalStore<S> {
    pub fn new(storage: S, config: &StoreConfig) -> Self {
        Self {
            storage,
            rollback_attempts: config.rollback_attempts.max(1),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Create a role. Ranked roles go to the bottom of the hierarchy
    /// (`N + 1`); a default role gets no level and must be the chat's only one.
    pub async fn insert(
        &self,
        chat_id: Uuid,
        name: &str,
        is_default_role: bool,
        permissions: Permissions,
    ) -> StoreResult<Role> {
        let mut tx = self.storage.begin(chat_id).await?;
        let roles = tx.roles().await?;

        let rank = if is_default_role {
            if roles.iter().any(Role::is_default) {
                return Err(StoreError::Conflict("chat already has a default role".into()));
            }
            RoleRank::Default
        } else {
            let ranked = ranked_count(&roles);
            let counter = tx.role_count().await?;
            if counter != ranked {
                tracing::warn!(%chat_id, counter, ranked, "Role counter drifted; resyncing");
            }
            RoleRank::Ranked(ranked + 1)
        };

        let role = tx
            .insert_role(NewRole {
                id: snowflake::generate_id(),
                chat_id,
                name: name.to_string(),
                rank,
                permissions,
            })
            .await?;
        if let RoleRank::Ranked(level) = rank {
            tx.set_role_count(level).await?;
        }
        tx.commit().await?;

        tracing::info!(%chat_id, role_id = %role.id, rank = ?role.rank, "Role created");
        Ok(role)
    }

    pub async fn update_metadata(&self, role_id: Uuid, patch: &RolePatch) -> StoreResult<Role> {
        let role = self
            .storage
            .update_metadata(role_id, patch.name.as_deref(), patch.permissions)
            .await?;
        tracing::info!(%role_id, chat_id = %role.chat_id, "Role metadata updated");
        Ok(role)
    }

    pub async fn update_members(&self, role_id: Uuid, member_ids: &[Uuid]) -> StoreResult<()> {
        self.storage.set_members(role_id, member_ids).await?;
        tracing::info!(%role_id, members = member_ids.len(), "Role members replaced");
        Ok(())
    }

    pub async fn update_member(&self, role_id: Uuid, member_id: Uuid) -> StoreResult<()> {
        self.storage.add_member(role_id, member_id).await?;
        tracing::info!(%role_id, %member_id, "Role member added");
        Ok(())
    }

    /// Move `ordered_role_ids` to the top of the level span they occupy, in the
    /// given order; unselected roles inside that span slide down behind them.
    /// Returns the levels written.
    pub async fn reorder(&self, chat_id: Uuid, ordered_role_ids: &[Uuid]) -> StoreResult<Vec<LevelAssignment>> {
        self.reorder_within(chat_id, ordered_role_ids, None).await
    }

    /// Like [`reorder`](Self::reorder), but refuses with a conflict when the span,
    /// as seen under the chat lock, holds a role outside `authorized`. Callers
    /// pass the roles they checked the actor against.
    pub async fn reorder_authorized(
        &self,
        chat_id: Uuid,
        ordered_role_ids: &[Uuid],
        authorized: &[Uuid],
    ) -> StoreResult<Vec<LevelAssignment>> {
        self.reorder_within(chat_id, ordered_role_ids, Some(authorized)).await
    }

    async fn reorder_within(
        &self,
        chat_id: Uuid,
        ordered_role_ids: &[Uuid],
        authorized: Option<&[Uuid]>,
    ) -> StoreResult<Vec<LevelAssignment>> {
        let mut tx = self.storage.begin(chat_id).await?;
        let roles = tx.roles().await?;

        if let Some(role) = roles
            .iter()
            .find(|r| r.is_default() && ordered_role_ids.contains(&r.id))
        {
            return Err(StoreError::Conflict(format!(
                "default role {} has no level",
                role.id
            )));
        }

        let snapshot = ordinal::snapshot(&roles);
        let plan = ordinal::plan_reorder(&snapshot, ordered_role_ids)?;
        if let Some(authorized) = authorized {
            if let Some(role_id) = plan.in_span.iter().find(|id| !authorized.contains(*id)) {
                tracing::warn!(%chat_id, %role_id, "Reorder span changed after authorization");
                return Err(StoreError::Conflict(
                    "roles were reordered concurrently; reload and retry".into(),
                ));
            }
        }
        if plan.is_noop(&snapshot) {
            tracing::debug!(%chat_id, "Reorder leaves every level unchanged");
            return Ok(Vec::new());
        }

        if let Err(cause) = apply_plan(&mut tx, &plan, snapshot.len()).await {
            if self.storage.atomic_writes() {
                tracing::warn!(%chat_id, error = %cause, "Reorder failed; transaction rolled back");
                return Err(cause);
            }
            // Still under the chat lock: nobody else has seen the partial writes.
            tracing::warn!(%chat_id, error = %cause, "Reorder failed; restoring levels");
            let restored = match self.restore(chat_id, &mut tx, &snapshot).await {
                Ok(()) => tx.commit().await,
                Err(err) => Err(err),
            };
            return Err(compensated(chat_id, cause, restored));
        }

        if let Err(cause) = tx.commit().await {
            if self.storage.atomic_writes() {
                tracing::warn!(%chat_id, error = %cause, "Reorder commit failed");
                return Err(cause);
            }
            tracing::warn!(%chat_id, error = %cause, "Reorder commit failed after levels were written");
            let restored = self.restore_if_unchanged(chat_id, &snapshot, &plan).await;
            return Err(compensated(chat_id, cause, restored));
        }

        tracing::info!(
            %chat_id,
            span_start = plan.span.0,
            span_end = plan.span.1,
            moved = plan.assignments.len(),
            "Roles reordered"
        );
        Ok(plan.assignments)
    }

    /// Delete a ranked role and close the gap it leaves.
    pub async fn delete(&self, role_id: Uuid, chat_id: Uuid) -> StoreResult<()> {
        let mut tx = self.storage.begin(chat_id).await?;
        let roles = tx.roles().await?;

        let role = roles
            .iter()
            .find(|r| r.id == role_id)
            .ok_or_else(|| StoreError::NotFound("Role".into()))?;
        if role.is_default() {
            return Err(StoreError::Conflict("the default role cannot be deleted".into()));
        }

        tx.delete_role(role_id).await?;

        let remaining: Vec<LevelSnapshot> = ordinal::snapshot(&roles)
            .into_iter()
            .filter(|s| s.role_id != role_id)
            .collect();
        let moves = ordinal::compact(&remaining);
        write_levels(&mut tx, &moves).await?;
        tx.set_role_count(remaining.len() as i32).await?;
        tx.commit().await?;

        tracing::info!(%chat_id, %role_id, shifted = moves.len(), "Role deleted");
        Ok(())
    }

    /// Compare stored levels and counter with the dense-range invariant.
    pub async fn verify_levels(&self, chat_id: Uuid) -> StoreResult<LevelReport> {
        let mut tx = self.storage.begin(chat_id).await?;
        let roles = tx.roles().await?;
        let counter = tx.role_count().await?;
        Ok(ordinal::inspect(chat_id, &ordinal::snapshot(&roles), counter))
    }

    /// Re-densify levels in their current order and resync the counter.
    /// Returns how many roles moved.
    pub async fn repair_levels(&self, chat_id: Uuid) -> StoreResult<usize> {
        let mut tx = self.storage.begin(chat_id).await?;
        let roles = tx.roles().await?;
        let snapshot = ordinal::snapshot(&roles);
        let moves = ordinal::compact(&snapshot);

        write_levels(&mut tx, &moves).await?;
        tx.set_role_count(snapshot.len() as i32).await?;
        tx.commit().await?;

        if !moves.is_empty() {
            tracing::warn!(%chat_id, moved = moves.len(), "Role levels repaired");
        }
        Ok(moves.len())
    }

    /// Put `snapshot` back through `tx`, retrying up to `rollback_attempts` times.
    async fn restore(&self, chat_id: Uuid, tx: &mut S::Tx, snapshot: &[LevelSnapshot]) -> StoreResult<()> {
        let mut attempt = 1;
        loop {
            match write_snapshot(&mut *tx, snapshot).await {
                Ok(()) => {
                    tracing::info!(%chat_id, attempt, "Role levels restored");
                    return Ok(());
                }
                Err(err) if attempt < self.rollback_attempts => {
                    tracing::warn!(%chat_id, attempt, error = %err, "Restore attempt failed");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Undo a reorder whose writes outlived a failed commit. The lock was released
    /// in between, so the restore only runs if the chat still holds exactly the
    /// levels the plan wrote.
    async fn restore_if_unchanged(
        &self,
        chat_id: Uuid,
        snapshot: &[LevelSnapshot],
        plan: &ReorderPlan,
    ) -> StoreResult<()> {
        let mut tx = self.storage.begin(chat_id).await?;
        let current = ordinal::snapshot(&tx.roles().await?);
        if !matches_plan(&current, snapshot, plan) {
            return Err(StoreError::Conflict(
                "role levels changed before the failed reorder could be undone".into(),
            ));
        }
        self.restore(chat_id, &mut tx, snapshot).await?;
        tx.commit().await
    }
}

fn compensated(chat_id: Uuid, cause: StoreError, restored: StoreResult<()>) -> StoreError {
    match restored {
        Ok(()) => cause,
        Err(rollback) => {
            tracing::error!(%chat_id, error = %rollback, "Could not restore role levels; run repair");
            StoreError::RollbackFailed {
                cause: Box::new(cause),
                rollback: Box::new(rollback),
            }
        }
    }
}

/// True when `current` is `before` with the plan's assignments applied.
fn matches_plan(current: &[LevelSnapshot], before: &[LevelSnapshot], plan: &ReorderPlan) -> bool {
    if current.len() != before.len() {
        return false;
    }
    before.iter().all(|b| {
        let expected = plan
            .assignments
            .iter()
            .find(|a| a.role_id == b.role_id)
            .map_or(b.level, |a| a.level);
        current
            .iter()
            .any(|c| c.role_id == b.role_id && c.level == expected)
    })
}

fn ranked_count(roles: &[Role]) -> i32 {
    roles.iter().filter(|r| !r.is_default()).count() as i32
}

async fn apply_plan<T: RoleTransaction>(tx: &mut T, plan: &ReorderPlan, ranked: usize) -> StoreResult<()> {
    tx.clear_levels(&plan.in_span).await?;
    tx.assign_levels(&plan.assignments, Utc::now()).await?;
    tx.set_role_count(ranked as i32).await
}

async fn write_snapshot<T: RoleTransaction>(tx: &mut T, snapshot: &[LevelSnapshot]) -> StoreResult<()> {
    let ids: Vec<Uuid> = snapshot.iter().map(|s| s.role_id).collect();
    tx.clear_levels(&ids).await?;
    tx.restore_levels(snapshot).await?;
    tx.set_role_count(snapshot.len() as i32).await
}

async fn write_levels<T: RoleTransaction>(tx: &mut T, moves: &[LevelAssignment]) -> StoreResult<()> {
    if moves.is_empty() {
        return Ok(());
    }
    let ids: Vec<Uuid> = moves.iter().map(|m| m.role_id).collect();
    tx.clear_levels(&ids).await?;
    tx.assign_levels(moves, Utc::now()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::memory::MemoryStore;
    use crate::ordinal::ReorderError;
    use parley_common::models::{ChatKind, User};

    fn config(rollback_attempts: u32) -> StoreConfig {
        StoreConfig { rollback_attempts }
    }

    /// A group chat with `ranked` roles named `r1..rN` at levels `1..N`.
    async fn chat_with_roles(memory: &MemoryStore, ranked: usize) -> (Uuid, Vec<Uuid>) {
        let owner = User::new(snowflake::generate_id(), "owner");
        memory.insert_user(owner.clone()).await;
        let chat = memory
            .create_chat(owner.id, Some("general"), ChatKind::Group, false)
            .await
            .unwrap();

        let store = RoleOrdinalStore::new(memory.clone(), &config(1));
        let mut ids = Vec::with_capacity(ranked);
        for i in 1..=ranked {
            let role = store
                .insert(chat.id, &format!("r{i}"), false, Permissions::empty())
                .await
                .unwrap();
            ids.push(role.id);
        }
        (chat.id, ids)
    }

    async fn levels(memory: &MemoryStore, chat_id: Uuid) -> Vec<LevelSnapshot> {
        ordinal::snapshot(&memory.list_roles(chat_id).await.unwrap())
    }

    fn order(snapshot: &[LevelSnapshot]) -> Vec<Uuid> {
        snapshot.iter().map(|s| s.role_id).collect()
    }

    #[tokio::test]
    async fn test_insert_appends_to_bottom() {
        let memory = MemoryStore::new();
        let (chat_id, ids) = chat_with_roles(&memory, 3).await;

        let current = levels(&memory, chat_id).await;
        assert_eq!(order(&current), ids);
        assert_eq!(current.iter().map(|s| s.level).collect::<Vec<_>>(), vec![1, 2, 3]);

        let store = RoleOrdinalStore::new(memory.clone(), &config(3));
        let report = store.verify_levels(chat_id).await.unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.counter, 3);
    }

    #[tokio::test]
    async fn test_second_default_role_conflicts() {
        let memory = MemoryStore::new();
        let (chat_id, _) = chat_with_roles(&memory, 1).await;
        let store = RoleOrdinalStore::new(memory, &config(3));

        let err = store
            .insert(chat_id, "everyone-2", true, Permissions::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_reorder_hundred_roles() {
        let memory = MemoryStore::new();
        let (chat_id, ids) = chat_with_roles(&memory, 100).await;
        let store = RoleOrdinalStore::new(memory.clone(), &config(3));

        let written = store.reorder(chat_id, &[ids[99], ids[0]]).await.unwrap();
        assert_eq!(written.len(), 100);

        let after = order(&levels(&memory, chat_id).await);
        let mut expected = vec![ids[99], ids[0]];
        expected.extend_from_slice(&ids[1..99]);
        assert_eq!(after, expected);
        assert!(store.verify_levels(chat_id).await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_reorder_rejects_default_and_unknown_roles() {
        let memory = MemoryStore::new();
        let (chat_id, ids) = chat_with_roles(&memory, 3).await;
        let store = RoleOrdinalStore::new(memory.clone(), &config(3));
        let everyone = memory
            .list_roles(chat_id)
            .await
            .unwrap()
            .into_iter()
            .find(Role::is_default)
            .unwrap();

        let err = store.reorder(chat_id, &[ids[1], everyone.id]).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let err = store.reorder(chat_id, &[Uuid::now_v7()]).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidReorder(_)));

        let err = store.reorder(chat_id, &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidReorder(ReorderError::Empty)));
    }

    #[tokio::test]
    async fn test_reorder_in_current_order_writes_nothing() {
        let memory = MemoryStore::new();
        let (chat_id, ids) = chat_with_roles(&memory, 4).await;
        let store = RoleOrdinalStore::new(memory.clone(), &config(3));
        let before = levels(&memory, chat_id).await;

        assert!(store.reorder(chat_id, &ids[1..3]).await.unwrap().is_empty());
        assert_eq!(levels(&memory, chat_id).await, before);
    }

    #[tokio::test]
    async fn test_delete_closes_gap() {
        let memory = MemoryStore::new();
        let (chat_id, ids) = chat_with_roles(&memory, 5).await;
        let store = RoleOrdinalStore::new(memory.clone(), &config(3));

        store.delete(ids[1], chat_id).await.unwrap();

        let after = levels(&memory, chat_id).await;
        assert_eq!(order(&after), vec![ids[0], ids[2], ids[3], ids[4]]);
        assert_eq!(after.iter().map(|s| s.level).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(store.verify_levels(chat_id).await.unwrap().counter, 4);

        let next = store.insert(chat_id, "r6", false, Permissions::empty()).await.unwrap();
        assert_eq!(next.level(), Some(5));
    }

    #[tokio::test]
    async fn test_delete_refuses_default_and_unknown() {
        let memory = MemoryStore::new();
        let (chat_id, _) = chat_with_roles(&memory, 2).await;
        let store = RoleOrdinalStore::new(memory.clone(), &config(3));
        let everyone = memory
            .list_roles(chat_id)
            .await
            .unwrap()
            .into_iter()
            .find(Role::is_default)
            .unwrap();

        let err = store.delete(everyone.id, chat_id).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let err = store.delete(Uuid::now_v7(), chat_id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_failed_reorder_restores_levels_exactly() {
        let memory = MemoryStore::autocommit();
        let (chat_id, ids) = chat_with_roles(&memory, 6).await;
        let store = RoleOrdinalStore::new(memory.clone(), &config(3));
        let before = levels(&memory, chat_id).await;

        memory.fail_level_write_after(2).await;
        let err = store.reorder(chat_id, &[ids[5], ids[0]]).await.unwrap_err();
        assert!(matches!(err, StoreError::Unexpected(_)), "{err}");

        assert_eq!(levels(&memory, chat_id).await, before);
        assert!(store.verify_levels(chat_id).await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_restore_is_retried() {
        let memory = MemoryStore::autocommit();
        let (chat_id, ids) = chat_with_roles(&memory, 4).await;
        let store = RoleOrdinalStore::new(memory.clone(), &config(3));
        let before = levels(&memory, chat_id).await;

        memory.fail_level_write_after(1).await;
        memory.fail_next_restores(2).await;
        let err = store.reorder(chat_id, &[ids[3], ids[0]]).await.unwrap_err();
        assert!(!matches!(err, StoreError::RollbackFailed { .. }));
        assert_eq!(levels(&memory, chat_id).await, before);
    }

    #[tokio::test]
    async fn test_exhausted_restore_reports_rollback_failure_then_repairs() {
        let memory = MemoryStore::autocommit();
        let (chat_id, ids) = chat_with_roles(&memory, 3).await;
        let store = RoleOrdinalStore::new(memory.clone(), &config(2));

        memory.fail_level_write_after(1).await;
        memory.fail_next_restores(2).await;
        let err = store.reorder(chat_id, &[ids[2], ids[0]]).await.unwrap_err();
        assert!(matches!(err, StoreError::RollbackFailed { .. }), "{err}");

        let report = store.verify_levels(chat_id).await.unwrap();
        assert!(!report.is_consistent());

        assert!(store.repair_levels(chat_id).await.unwrap() > 0);
        assert!(store.verify_levels(chat_id).await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_levels_untouched() {
        let memory = MemoryStore::new();
        let (chat_id, ids) = chat_with_roles(&memory, 3).await;
        let store = RoleOrdinalStore::new(memory.clone(), &config(3));
        let before = levels(&memory, chat_id).await;

        memory.fail_next_commit().await;
        assert!(store.reorder(chat_id, &[ids[2], ids[0]]).await.is_err());
        assert_eq!(levels(&memory, chat_id).await, before);
    }

    #[tokio::test]
    async fn test_repair_keeps_order_and_resyncs_counter() {
        let memory = MemoryStore::new();
        let (chat_id, ids) = chat_with_roles(&memory, 3).await;
        let store = RoleOrdinalStore::new(memory.clone(), &config(3));

        memory.force_rank(ids[0], RoleRank::Ranked(4)).await.unwrap();
        memory.force_rank(ids[2], RoleRank::Ranked(9)).await.unwrap();
        let report = store.verify_levels(chat_id).await.unwrap();
        assert_eq!(report.gaps, vec![1, 3]);

        assert_eq!(store.repair_levels(chat_id).await.unwrap(), 3);
        let after = levels(&memory, chat_id).await;
        assert_eq!(order(&after), vec![ids[1], ids[0], ids[2]]);
        assert_eq!(store.repair_levels(chat_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_reorder_on_atomic_store_needs_no_restore() {
        let memory = MemoryStore::new();
        let (chat_id, ids) = chat_with_roles(&memory, 4).await;
        let store = RoleOrdinalStore::new(memory.clone(), &config(1));
        let before = levels(&memory, chat_id).await;

        memory.fail_level_write_after(1).await;
        memory.fail_next_restores(1).await;
        let err = store.reorder(chat_id, &[ids[3], ids[0]]).await.unwrap_err();
        assert!(matches!(err, StoreError::Unexpected(_)), "{err}");
        assert_eq!(levels(&memory, chat_id).await, before);
    }

    #[tokio::test]
    async fn test_reorder_refuses_span_outside_authorized_roles() {
        let memory = MemoryStore::new();
        let (chat_id, ids) = chat_with_roles(&memory, 4).await;
        let store = RoleOrdinalStore::new(memory.clone(), &config(3));
        let before = levels(&memory, chat_id).await;

        let err = store
            .reorder_authorized(chat_id, &[ids[3], ids[1]], &[ids[1], ids[3]])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "{err}");
        assert_eq!(levels(&memory, chat_id).await, before);

        let written = store
            .reorder_authorized(chat_id, &[ids[3], ids[1]], &ids[1..])
            .await
            .unwrap();
        assert_eq!(written.len(), 3);
    }

    /// Let spawned tasks run until they block on the chat lock.
    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_failed_reorder_keeps_queued_reorder() {
        for memory in [MemoryStore::new(), MemoryStore::autocommit()] {
            let (chat_id, ids) = chat_with_roles(&memory, 3).await;
            let store = Arc::new(RoleOrdinalStore::new(memory.clone(), &config(3)));
            memory.fail_level_write_after(1).await;

            let lock = memory.begin(chat_id).await.unwrap();
            let failing = tokio::spawn({
                let (store, picks) = (store.clone(), vec![ids[2], ids[0]]);
                async move { store.reorder(chat_id, &picks).await }
            });
            settle().await;
            let queued = tokio::spawn({
                let (store, picks) = (store.clone(), vec![ids[1], ids[0]]);
                async move { store.reorder(chat_id, &picks).await }
            });
            settle().await;
            drop(lock);

            let err = failing.await.unwrap().unwrap_err();
            assert!(matches!(err, StoreError::Unexpected(_)), "{err}");
            assert_eq!(queued.await.unwrap().unwrap().len(), 2);
            assert_eq!(order(&levels(&memory, chat_id).await), vec![ids[1], ids[0], ids[2]]);
            assert!(store.verify_levels(chat_id).await.unwrap().is_consistent());
        }
    }

    #[tokio::test]
    async fn test_failed_reorder_keeps_queued_insert() {
        for memory in [MemoryStore::new(), MemoryStore::autocommit()] {
            let (chat_id, ids) = chat_with_roles(&memory, 3).await;
            let store = Arc::new(RoleOrdinalStore::new(memory.clone(), &config(3)));
            memory.fail_level_write_after(1).await;

            let lock = memory.begin(chat_id).await.unwrap();
            let failing = tokio::spawn({
                let (store, picks) = (store.clone(), vec![ids[2], ids[0]]);
                async move { store.reorder(chat_id, &picks).await }
            });
            settle().await;
            let queued = tokio::spawn({
                let store = store.clone();
                async move { store.insert(chat_id, "r4", false, Permissions::empty()).await }
            });
            settle().await;
            drop(lock);

            assert!(failing.await.unwrap().is_err());
            assert_eq!(queued.await.unwrap().unwrap().level(), Some(4));
            let report = store.verify_levels(chat_id).await.unwrap();
            assert!(report.is_consistent(), "{report:?}");
            assert_eq!(report.counter, 4);
        }
    }

    #[tokio::test]
    async fn test_failed_commit_is_undone_when_nothing_intervened() {
        let memory = MemoryStore::autocommit();
        let (chat_id, ids) = chat_with_roles(&memory, 3).await;
        let store = RoleOrdinalStore::new(memory.clone(), &config(3));
        let before = levels(&memory, chat_id).await;

        memory.fail_next_commit().await;
        let err = store.reorder(chat_id, &[ids[2], ids[0]]).await.unwrap_err();
        assert!(matches!(err, StoreError::Unexpected(_)), "{err}");
        assert_eq!(levels(&memory, chat_id).await, before);
    }

    #[tokio::test]
    async fn test_failed_commit_does_not_overwrite_later_reorder() {
        let memory = MemoryStore::autocommit();
        let (chat_id, ids) = chat_with_roles(&memory, 3).await;
        let store = Arc::new(RoleOrdinalStore::new(memory.clone(), &config(3)));
        memory.fail_next_commit().await;

        let lock = memory.begin(chat_id).await.unwrap();
        let failing = tokio::spawn({
            let (store, picks) = (store.clone(), vec![ids[2], ids[0]]);
            async move { store.reorder(chat_id, &picks).await }
        });
        settle().await;
        let queued = tokio::spawn({
            let (store, picks) = (store.clone(), vec![ids[1], ids[0]]);
            async move { store.reorder(chat_id, &picks).await }
        });
        settle().await;
        drop(lock);

        let err = failing.await.unwrap().unwrap_err();
        assert!(matches!(err, StoreError::RollbackFailed { .. }), "{err}");
        queued.await.unwrap().unwrap();

        // The failed reorder's writes stayed and the queued one ran on top of them.
        assert_eq!(order(&levels(&memory, chat_id).await), vec![ids[2], ids[1], ids[0]]);
        assert!(store.verify_levels(chat_id).await.unwrap().is_consistent());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_keep_levels_dense() {
        let memory = MemoryStore::new();
        let (chat_id, base) = chat_with_roles(&memory, 5).await;
        let store = Arc::new(RoleOrdinalStore::new(memory.clone(), &config(3)));

        let mut tasks = Vec::new();
        for worker in 0..8usize {
            let (store, base) = (store.clone(), base.clone());
            tasks.push(tokio::spawn(async move {
                let mut own = Vec::new();
                for step in 0..12usize {
                    match (worker + step) % 3 {
                        0 => {
                            let role = store
                                .insert(chat_id, "worker", false, Permissions::empty())
                                .await
                                .unwrap();
                            own.push(role.id);
                        }
                        1 => {
                            // Only roles nobody deletes, so every id stays valid.
                            let picks = [base[(worker + step) % 5], base[step % 5]];
                            let picks = if picks[0] == picks[1] { &picks[..1] } else { &picks[..] };
                            store.reorder(chat_id, picks).await.unwrap();
                        }
                        _ => {
                            if let Some(role_id) = own.pop() {
                                store.delete(role_id, chat_id).await.unwrap();
                            }
                        }
                    }
                }
                own.len()
            }));
        }

        let mut kept = 0;
        for task in tasks {
            kept += task.await.unwrap();
        }
        let report = store.verify_levels(chat_id).await.unwrap();
        assert!(report.is_consistent(), "{report:?}");
        assert_eq!(report.counter as usize, 5 + kept);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Insert,
            Delete(usize),
            Reorder(Vec<usize>),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                Just(Op::Insert),
                any::<usize>().prop_map(Op::Delete),
                proptest::collection::vec(any::<usize>(), 1..5).prop_map(Op::Reorder),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn levels_stay_dense(ops in proptest::collection::vec(op(), 1..40)) {
                let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
                rt.block_on(async {
                    let memory = MemoryStore::new();
                    let (chat_id, _) = chat_with_roles(&memory, 3).await;
                    let store = RoleOrdinalStore::new(memory.clone(), &config(3));

                    for op in ops {
                        let ranked = order(&levels(&memory, chat_id).await);
                        match op {
                            Op::Insert => {
                                store.insert(chat_id, "r", false, Permissions::empty()).await.unwrap();
                            }
                            Op::Delete(i) if !ranked.is_empty() => {
                                store.delete(ranked[i % ranked.len()], chat_id).await.unwrap();
                            }
                            Op::Reorder(picks) if !ranked.is_empty() => {
                                let mut chosen: Vec<Uuid> = Vec::new();
                                for i in picks {
                                    let id = ranked[i % ranked.len()];
                                    if !chosen.contains(&id) {
                                        chosen.push(id);
                                    }
                                }
                                store.reorder(chat_id, &chosen).await.unwrap();
                            }
                            _ => {}
                        }
                        let report = store.verify_levels(chat_id).await.unwrap();
                        assert!(report.is_consistent(), "{report:?}");
                    }
                });
            }
        }
    }
}
