//! Diff of desired vs. current executables for one scope into an ordered action plan.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use indexmap::IndexMap;
use inbound_id::ExecutableId;
use inbound_types::{
    Declaration, DeduplicationScopes, InvalidDeclaration, ProcessScope, RawElement,
    ValidDeclaration, group_elements,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::registered::RegisteredExecutable;
use crate::store::ExecutableStateStore;

/// Declarations computed fresh from the latest elements of one scope.
#[derive(Debug, Clone, Default)]
pub struct TargetState {
    declarations: IndexMap<ExecutableId, Declaration>,
}

impl TargetState {
    pub fn new(declarations: impl IntoIterator<Item = Declaration>) -> Self {
        Self {
            declarations: declarations.into_iter().map(|d| (d.id(), d)).collect(),
        }
    }

    pub fn valid(&self) -> impl Iterator<Item = (&ExecutableId, &ValidDeclaration)> {
        self.declarations.iter().filter_map(|(id, d)| match d {
            Declaration::Valid(valid) => Some((id, valid)),
            Declaration::Invalid(_) => None,
        })
    }

    pub fn invalid(&self) -> impl Iterator<Item = (&ExecutableId, &InvalidDeclaration)> {
        self.declarations.iter().filter_map(|(id, d)| match d {
            Declaration::Invalid(invalid) => Some((id, invalid)),
            Declaration::Valid(_) => None,
        })
    }

    /// Every id, in grouping order.
    pub fn all_ids(&self) -> impl Iterator<Item = &ExecutableId> {
        self.declarations.keys()
    }

    pub fn get(&self, id: &ExecutableId) -> Option<&Declaration> {
        self.declarations.get(id)
    }

    pub fn contains(&self, id: &ExecutableId) -> bool {
        self.declarations.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}

/// Snapshot of the store entries owned by one scope.
#[derive(Debug, Clone, Default)]
pub struct CurrentState {
    executables: HashMap<ExecutableId, RegisteredExecutable>,
}

impl CurrentState {
    pub fn new(executables: HashMap<ExecutableId, RegisteredExecutable>) -> Self {
        Self { executables }
    }

    pub fn contains(&self, id: &ExecutableId) -> bool {
        self.executables.contains_key(id)
    }

    pub fn get(&self, id: &ExecutableId) -> Option<&RegisteredExecutable> {
        self.executables.get(id)
    }

    /// Ids in a stable order.
    pub fn ids(&self) -> Vec<ExecutableId> {
        let mut ids: Vec<_> = self.executables.keys().copied().collect();
        ids.sort();
        ids
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    NoAction,
    Activate,
    Deactivate,
    /// Same trigger, different set of bound elements: rebind without teardown.
    HotSwap,
    /// Shared identity now conflicts with an incompatible declaration.
    ReplaceWithInvalid,
    /// Bad current state or identity-relevant change: tear down and activate again.
    Restart,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ActionType::NoAction => "NO_ACTION",
            ActionType::Activate => "ACTIVATE",
            ActionType::Deactivate => "DEACTIVATE",
            ActionType::HotSwap => "HOT_SWAP",
            ActionType::ReplaceWithInvalid => "REPLACE_WITH_INVALID",
            ActionType::Restart => "RESTART",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub id: ExecutableId,
    pub action: ActionType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateTransitionPlan {
    pub actions: Vec<PlannedAction>,
}

impl StateTransitionPlan {
    pub fn ids_for(&self, action: ActionType) -> Vec<ExecutableId> {
        self.actions
            .iter()
            .filter(|planned| planned.action == action)
            .map(|planned| planned.id)
            .collect()
    }

    pub fn action_for(&self, id: &ExecutableId) -> Option<ActionType> {
        self.actions
            .iter()
            .find(|planned| &planned.id == id)
            .map(|planned| planned.action)
    }

    /// True when nothing needs to change.
    pub fn is_noop(&self) -> bool {
        self.actions
            .iter()
            .all(|planned| planned.action == ActionType::NoAction)
    }

    fn summary(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for planned in &self.actions {
            *counts.entry(planned.action.to_string()).or_default() += 1;
        }
        counts
    }
}

pub fn compute_target_state(elements: &[RawElement], scopes: &DeduplicationScopes) -> TargetState {
    TargetState::new(group_elements(elements, scopes))
}

pub fn compute_current_state(store: &ExecutableStateStore, scope: &ProcessScope) -> CurrentState {
    CurrentState::new(store.scope_snapshot(scope))
}

/// Order: ACTIVATE in target order, then DEACTIVATE, then one update action
/// (including NO_ACTION) per id present on both sides.
pub fn determine_actions(
    target: &TargetState,
    current: &CurrentState,
    scopes: &DeduplicationScopes,
) -> StateTransitionPlan {
    let mut actions = Vec::new();

    for id in target.all_ids().filter(|id| !current.contains(id)) {
        actions.push(PlannedAction {
            id: *id,
            action: ActionType::Activate,
        });
    }
    for id in current.ids().into_iter().filter(|id| !target.contains(id)) {
        actions.push(PlannedAction {
            id,
            action: ActionType::Deactivate,
        });
    }
    for (id, declaration) in target
        .declarations
        .iter()
        .filter(|(id, _)| current.contains(id))
    {
        let action = match current.get(id) {
            Some(existing) => categorize_update(id, declaration, existing, scopes),
            None => ActionType::Activate,
        };
        actions.push(PlannedAction { id: *id, action });
    }

    let plan = StateTransitionPlan { actions };
    debug!(actions = ?plan.summary(), "transition plan computed");
    plan
}

fn categorize_update(
    id: &ExecutableId,
    target: &Declaration,
    existing: &RegisteredExecutable,
    scopes: &DeduplicationScopes,
) -> ActionType {
    let RegisteredExecutable::Activated(activated) = existing else {
        return ActionType::Restart;
    };

    let target = match target {
        Declaration::Invalid(invalid) => {
            warn!(
                executable_id = %id.short(),
                "cross-version deduplication conflict: {}. Replacing with invalid executable; \
                 deploy a new version to fix",
                invalid.error
            );
            return ActionType::ReplaceWithInvalid;
        }
        Declaration::Valid(valid) => valid,
    };

    let bound = activated.context.declaration();
    let Some(existing) = reconstruct_declaration(&bound.elements, scopes) else {
        debug!(executable_id = %id.short(), "restart: existing declaration could not be rebuilt");
        return ActionType::Restart;
    };

    if existing.fingerprint() != target.fingerprint() {
        debug!(executable_id = %id.short(), "restart: identity-relevant properties changed");
        return ActionType::Restart;
    }

    if existing.elements.len() == target.elements.len()
        && existing.process_definition_keys() == target.process_definition_keys()
    {
        ActionType::NoAction
    } else {
        ActionType::HotSwap
    }
}

/// Regroup the elements bound to a live executable; `None` unless they still form one valid group.
fn reconstruct_declaration(
    elements: &[RawElement],
    scopes: &DeduplicationScopes,
) -> Option<ValidDeclaration> {
    let first = elements.first()?;
    let scoped = first
        .trigger_type()
        .map(|ty| scopes.for_type(ty))
        .unwrap_or(&[]);
    let dedup_id = match first.deduplication_id(scoped) {
        Ok(dedup_id) => dedup_id,
        Err(err) => {
            warn!("failed to extract declaration from existing context: {err}");
            return None;
        }
    };
    match Declaration::of(dedup_id, elements.to_vec()) {
        Declaration::Valid(valid) => Some(valid),
        Declaration::Invalid(_) => None,
    }
}
