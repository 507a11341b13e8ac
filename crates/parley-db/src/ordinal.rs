//! Pure level arithmetic for ranked roles.
//!
//! Nothing in here touches storage. The store captures a [`LevelSnapshot`] of a
//! chat's ranked roles, asks this module what to write, and applies the result
//! inside one transaction.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parley_common::models::Role;
use serde::Serialize;
use uuid::Uuid;

/// One ranked role's level as it was before a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelSnapshot {
    pub role_id: Uuid,
    pub level: i32,
    pub updated_at: DateTime<Utc>,
}

/// A level to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelAssignment {
    pub role_id: Uuid,
    pub level: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReorderError {
    #[error("no roles given")]
    Empty,
    #[error("role {0} is listed more than once")]
    Duplicate(Uuid),
    #[error("role {0} is not a ranked role of this chat")]
    NotRanked(Uuid),
}

/// Snapshot of every ranked role in `roles`, ordered by level.
pub fn snapshot(roles: &[Role]) -> Vec<LevelSnapshot> {
    let mut levels: Vec<LevelSnapshot> = roles
        .iter()
        .filter_map(|role| {
            role.level().map(|level| LevelSnapshot {
                role_id: role.id,
                level,
                updated_at: role.updated_at,
            })
        })
        .collect();
    levels.sort_by_key(|s| (s.level, s.role_id));
    levels
}

/// What a reorder writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorderPlan {
    /// Lowest and highest level occupied by the selected roles.
    pub span: (i32, i32),
    /// Every role whose level lies in the span, in its current order. All of
    /// them are cleared before reassignment.
    pub in_span: Vec<Uuid>,
    /// New levels, selected roles first (caller order) then the rest of the span.
    pub assignments: Vec<LevelAssignment>,
}

impl ReorderPlan {
    /// True when every assignment equals the role's current level.
    pub fn is_noop(&self, current: &[LevelSnapshot]) -> bool {
        let levels: HashMap<Uuid, i32> = current.iter().map(|s| (s.role_id, s.level)).collect();
        self.assignments
            .iter()
            .all(|a| levels.get(&a.role_id) == Some(&a.level))
    }
}

/// Plan a reorder of `ordered` within `current`.
///
/// The selected roles take consecutive levels starting at the lowest level any
/// of them holds, in the order given. Unselected roles that sit between the
/// selection's lowest and highest level keep their relative order and follow
/// immediately after. Roles outside that span are not touched.
pub fn plan_reorder(current: &[LevelSnapshot], ordered: &[Uuid]) -> Result<ReorderPlan, ReorderError> {
    if ordered.is_empty() {
        return Err(ReorderError::Empty);
    }

    let levels: HashMap<Uuid, i32> = current.iter().map(|s| (s.role_id, s.level)).collect();
    let mut selected = HashSet::with_capacity(ordered.len());
    let mut min = i32::MAX;
    let mut max = i32::MIN;
    for id in ordered {
        if !selected.insert(*id) {
            return Err(ReorderError::Duplicate(*id));
        }
        let level = *levels.get(id).ok_or(ReorderError::NotRanked(*id))?;
        min = min.min(level);
        max = max.max(level);
    }

    let mut in_span: Vec<&LevelSnapshot> = current
        .iter()
        .filter(|s| (min..=max).contains(&s.level))
        .collect();
    in_span.sort_by_key(|s| (s.level, s.role_id));

    let bystanders = in_span
        .iter()
        .map(|s| s.role_id)
        .filter(|id| !selected.contains(id));

    let assignments = ordered
        .iter()
        .copied()
        .chain(bystanders)
        .zip(min..)
        .map(|(role_id, level)| LevelAssignment { role_id, level })
        .collect();

    Ok(ReorderPlan {
        span: (min, max),
        in_span: in_span.iter().map(|s| s.role_id).collect(),
        assignments,
    })
}

/// Re-densify `current` to `[1, N]` keeping relative order. Only roles whose
/// level changes are returned.
pub fn compact(current: &[LevelSnapshot]) -> Vec<LevelAssignment> {
    let mut ordered: Vec<&LevelSnapshot> = current.iter().collect();
    ordered.sort_by_key(|s| (s.level, s.role_id));
    ordered
        .into_iter()
        .zip(1..)
        .filter(|(s, level)| s.level != *level)
        .map(|(s, level)| LevelAssignment {
            role_id: s.role_id,
            level,
        })
        .collect()
}

/// Health of a chat's level sequence and counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelReport {
    pub chat_id: Uuid,
    pub ranked_roles: usize,
    pub counter: i32,
    /// Levels in `[1, N]` nobody holds.
    pub gaps: Vec<i32>,
    /// Levels held by more than one role, or outside `[1, N]`.
    pub misplaced: Vec<i32>,
}

impl LevelReport {
    pub fn is_consistent(&self) -> bool {
        self.gaps.is_empty()
            && self.misplaced.is_empty()
            && usize::try_from(self.counter).is_ok_and(|c| c == self.ranked_roles)
    }
}

/// Check `current` against the dense-range invariant and the stored counter.
pub fn inspect(chat_id: Uuid, current: &[LevelSnapshot], counter: i32) -> LevelReport {
    let n = current.len() as i32;
    let mut seen: HashMap<i32, usize> = HashMap::new();
    for s in current {
        *seen.entry(s.level).or_default() += 1;
    }

    let gaps = (1..=n).filter(|level| !seen.contains_key(level)).collect();
    let mut misplaced: Vec<i32> = seen
        .iter()
        .filter(|(level, count)| **count > 1 || !(1..=n).contains(*level))
        .map(|(level, _)| *level)
        .collect();
    misplaced.sort_unstable();

    LevelReport {
        chat_id,
        ranked_roles: current.len(),
        counter,
        gaps,
        misplaced,
    }
}
