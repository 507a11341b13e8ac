//! Role service — authorized role management.

use parley_common::config::{AppConfig, LimitsConfig};
use parley_common::error::{ParleyError, ParleyResult};
use parley_common::models::{
    Chat, CreateRoleRequest, ReorderRolesRequest, Role, UpdateRoleRequest, User,
};
use parley_common::permissions::Permissions;
use parley_common::validation::{validate_request, validate_role_name, validate_unique_ids};
use parley_common::verdict::Verdict;
use parley_db::ordinal::{self, LevelAssignment};
use parley_db::{ChatDirectory, RoleOrdinalStore, RolePatch, RoleStorage, StoreError};
use parley_policy::{chat as chat_policy, role as role_policy};
use uuid::Uuid;

pub struct RoleService<S, D> {
    store: RoleOrdinalStore<S>,
    directory: D,
    limits: LimitsConfig,
}

impl<S: RoleStorage, D: ChatDirectory> RoleService<S, D> {
    pub fn new(storage: S, directory: D, config: &AppConfig) -> Self {
        Self {
            store: RoleOrdinalStore::new(storage, &config.store),
            directory,
            limits: config.limits.clone(),
        }
    }

    /// The underlying store, for operator tasks that bypass authorization.
    pub fn store(&self) -> &RoleOrdinalStore<S> {
        &self.store
    }

    /// Roles of a chat, most privileged first, the default role last.
    pub async fn list_roles(&self, actor_id: Uuid, chat_id: Uuid) -> ParleyResult<Vec<Role>> {
        let (actor, chat) = self.load(actor_id, chat_id).await?;
        enforce(chat_policy::view(&actor, &chat), "list_roles", &actor, &chat)?;
        Ok(self.store.storage().list_roles(chat_id).await?)
    }

    /// Create a ranked role at the bottom of the hierarchy.
    pub async fn create_role(
        &self,
        actor_id: Uuid,
        chat_id: Uuid,
        body: CreateRoleRequest,
    ) -> ParleyResult<Role> {
        validate_request(&body)?;
        validate_role_name(&body.name, self.limits.max_role_name_length)?;

        let (actor, chat) = self.load(actor_id, chat_id).await?;
        enforce(role_policy::create(&actor, &chat), "create_role", &actor, &chat)?;

        let ranked = chat.roles.iter().filter(|r| !r.is_default()).count();
        if ranked >= self.limits.max_roles_per_chat as usize {
            return Err(ParleyError::LimitReached {
                message: format!(
                    "A chat can have at most {} roles",
                    self.limits.max_roles_per_chat
                ),
            });
        }

        let permissions = body.permissions.unwrap_or_else(Permissions::empty);
        Ok(self
            .store
            .insert(chat_id, &body.name, false, permissions)
            .await?)
    }

    /// Rename a role and/or replace its permission set.
    pub async fn update_role(
        &self,
        actor_id: Uuid,
        chat_id: Uuid,
        role_id: Uuid,
        body: UpdateRoleRequest,
    ) -> ParleyResult<Role> {
        validate_request(&body)?;
        if body.is_empty() {
            return Err(ParleyError::Validation {
                message: "Nothing to update".into(),
            });
        }
        if let Some(name) = &body.name {
            validate_role_name(name, self.limits.max_role_name_length)?;
        }

        let (actor, chat) = self.load(actor_id, chat_id).await?;
        let role = find_role(&chat, role_id)?;
        enforce(
            role_policy::update_metadata(&actor, &chat, role, &body),
            "update_role",
            &actor,
            &chat,
        )?;

        let patch = RolePatch {
            name: body.name,
            permissions: body.permissions,
        };
        Ok(self.store.update_metadata(role_id, &patch).await?)
    }

    /// Replace the full member set of a role. Ids are chat-member ids.
    pub async fn set_role_members(
        &self,
        actor_id: Uuid,
        chat_id: Uuid,
        role_id: Uuid,
        member_ids: &[Uuid],
    ) -> ParleyResult<()> {
        validate_unique_ids(member_ids)?;
        let (actor, chat) = self.load(actor_id, chat_id).await?;
        let role = find_role(&chat, role_id)?;
        let removed: Vec<Uuid> = role
            .member_ids
            .iter()
            .filter(|id| !member_ids.contains(id))
            .copied()
            .collect();
        enforce(
            role_policy::update_members(&actor, &chat, role, &removed),
            "set_role_members",
            &actor,
            &chat,
        )?;
        Ok(self.store.update_members(role_id, member_ids).await?)
    }

    pub async fn add_role_member(
        &self,
        actor_id: Uuid,
        chat_id: Uuid,
        role_id: Uuid,
        member_id: Uuid,
    ) -> ParleyResult<()> {
        let (actor, chat) = self.load(actor_id, chat_id).await?;
        let role = find_role(&chat, role_id)?;
        enforce(
            role_policy::update_members(&actor, &chat, role, &[]),
            "add_role_member",
            &actor,
            &chat,
        )?;
        Ok(self.store.update_member(role_id, member_id).await?)
    }

    /// Move the given roles to the top of the span they occupy.
    ///
    /// Every role whose level changes counts as a target, including unselected
    /// roles inside the span that slide down, so the actor must out-rank all of
    /// them. The store re-plans under the chat lock and refuses with a conflict
    /// if the span picked up a role that was not checked here.
    pub async fn reorder_roles(
        &self,
        actor_id: Uuid,
        chat_id: Uuid,
        body: ReorderRolesRequest,
    ) -> ParleyResult<Vec<LevelAssignment>> {
        validate_request(&body)?;
        validate_unique_ids(&body.role_ids)?;

        let (actor, chat) = self.load(actor_id, chat_id).await?;
        let requested = body
            .role_ids
            .iter()
            .map(|id| find_role(&chat, *id))
            .collect::<ParleyResult<Vec<&Role>>>()?;

        let affected = if requested.iter().any(|r| r.is_default()) {
            requested
        } else {
            let plan = ordinal::plan_reorder(&ordinal::snapshot(&chat.roles), &body.role_ids)
                .map_err(StoreError::from)?;
            plan.in_span
                .iter()
                .map(|id| find_role(&chat, *id))
                .collect::<ParleyResult<Vec<&Role>>>()?
        };
        enforce(
            role_policy::update_levels(&actor, &chat, &affected),
            "reorder_roles",
            &actor,
            &chat,
        )?;

        let authorized: Vec<Uuid> = affected.iter().map(|r| r.id).collect();
        Ok(self
            .store
            .reorder_authorized(chat_id, &body.role_ids, &authorized)
            .await?)
    }

    pub async fn delete_role(&self, actor_id: Uuid, chat_id: Uuid, role_id: Uuid) -> ParleyResult<()> {
        let (actor, chat) = self.load(actor_id, chat_id).await?;
        let role = find_role(&chat, role_id)?;
        enforce(role_policy::delete(&actor, &chat, role), "delete_role", &actor, &chat)?;
        Ok(self.store.delete(role_id, chat_id).await?)
    }

    async fn load(&self, actor_id: Uuid, chat_id: Uuid) -> ParleyResult<(User, Chat)> {
        load(&self.directory, actor_id, chat_id).await
    }
}

pub(crate) async fn load<D: ChatDirectory>(
    directory: &D,
    actor_id: Uuid,
    chat_id: Uuid,
) -> ParleyResult<(User, Chat)> {
    let actor = directory
        .load_user(actor_id)
        .await?
        .ok_or_else(|| ParleyError::not_found("User"))?;
    let chat = directory
        .load_chat(chat_id)
        .await?
        .ok_or_else(|| ParleyError::not_found("Chat"))?;
    Ok((actor, chat))
}

fn find_role(chat: &Chat, role_id: Uuid) -> ParleyResult<&Role> {
    chat.role(role_id).ok_or_else(|| ParleyError::not_found("Role"))
}

pub(crate) fn enforce(verdict: Verdict, action: &'static str, actor: &User, chat: &Chat) -> ParleyResult<()> {
    if verdict.is_allowed() {
        return Ok(());
    }
    tracing::debug!(
        actor_id = %actor.id,
        chat_id = %chat.id,
        action,
        code = verdict.code.as_str(),
        reason = %verdict.reason,
        "Denied"
    );
    Err(ParleyError::Denied(verdict))
}
