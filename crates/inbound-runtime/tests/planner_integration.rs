//! Transition planning against a populated state store.

use std::sync::Arc;

use inbound_runtime::{
    ActionType, ActivatedExecutable, ActivityLog, ContextKind, ContextServices,
    ExecutableStateStore, InboundContext, RegisteredExecutable, compute_current_state,
    compute_target_state, determine_actions,
};
use inbound_testkit::{ElementBuilder, MockExecutable, MockRecorder, scope_of};
use inbound_types::{Declaration, DeduplicationScopes, RawElement};

fn auto_webhook(element_id: &str, version: i32, def_key: i64) -> RawElement {
    ElementBuilder::new("webhook")
        .auto_dedup()
        .property("path", "/orders")
        .element_id(element_id)
        .version(version, def_key)
        .build()
}

/// Store the group formed by `elements` as a live executable.
fn store_activated(store: &ExecutableStateStore, elements: Vec<RawElement>) {
    let target = compute_target_state(&elements, &DeduplicationScopes::new());
    let (id, valid) = target.valid().next().expect("one valid declaration");
    let context = InboundContext::new(
        valid.clone(),
        ContextKind::Standard,
        ContextServices::default(),
        Arc::new(ActivityLog::new(10)),
        Arc::new(|_| {}),
    )
    .expect("context");
    store.put(
        *id,
        RegisteredExecutable::Activated(ActivatedExecutable {
            executable: Arc::new(MockExecutable::new(MockRecorder::new())),
            context: Arc::new(context),
            implementation: "mock".into(),
        }),
    );
}

#[test]
fn identical_auto_elements_plan_one_activation() {
    let elements = vec![auto_webhook("a", 1, 1), auto_webhook("b", 1, 1)];
    let scope = scope_of(&elements[0]);
    let store = ExecutableStateStore::new();
    let scopes = DeduplicationScopes::new();

    let target = compute_target_state(&elements, &scopes);
    let plan = determine_actions(&target, &compute_current_state(&store, &scope), &scopes);

    assert_eq!(target.len(), 1);
    assert_eq!(plan.actions.len(), 1);
    assert_eq!(plan.actions[0].action, ActionType::Activate);
}

#[test]
fn unchanged_elements_plan_no_action() {
    let elements = vec![auto_webhook("a", 1, 1), auto_webhook("b", 1, 1)];
    let scope = scope_of(&elements[0]);
    let store = ExecutableStateStore::new();
    store_activated(&store, elements.clone());
    let scopes = DeduplicationScopes::new();

    let target = compute_target_state(&elements, &scopes);
    let plan = determine_actions(&target, &compute_current_state(&store, &scope), &scopes);

    assert_eq!(plan.ids_for(ActionType::NoAction).len(), 1);
    assert!(plan.is_noop());
}

#[test]
fn membership_change_plans_hot_swap() {
    let store = ExecutableStateStore::new();
    store_activated(&store, vec![auto_webhook("a", 1, 1), auto_webhook("b", 1, 1)]);
    let scopes = DeduplicationScopes::new();

    // Version 2 drops element "b"; "a" is redeployed under a new definition key.
    let next = vec![auto_webhook("a", 2, 2)];
    let target = compute_target_state(&next, &scopes);
    let current = compute_current_state(&store, &scope_of(&next[0]));
    let plan = determine_actions(&target, &current, &scopes);

    assert_eq!(plan.actions.len(), 1);
    assert_eq!(plan.actions[0].action, ActionType::HotSwap);
}

#[test]
fn same_count_different_definition_keys_is_hot_swap() {
    let store = ExecutableStateStore::new();
    store_activated(&store, vec![auto_webhook("a", 1, 1)]);
    let scopes = DeduplicationScopes::new();

    let next = vec![auto_webhook("a", 2, 2)];
    let target = compute_target_state(&next, &scopes);
    let current = compute_current_state(&store, &scope_of(&next[0]));
    let plan = determine_actions(&target, &current, &scopes);

    let id = target.all_ids().next().copied().unwrap();
    assert_eq!(plan.action_for(&id), Some(ActionType::HotSwap));
}

#[test]
fn property_change_under_manual_id_plans_restart() {
    let manual = |path: &str| {
        ElementBuilder::new("webhook")
            .manual_dedup("orders")
            .property("path", path)
            .build()
    };
    let store = ExecutableStateStore::new();
    store_activated(&store, vec![manual("/orders")]);
    let scopes = DeduplicationScopes::new();

    let next = vec![manual("/v2/orders")];
    let target = compute_target_state(&next, &scopes);
    let current = compute_current_state(&store, &scope_of(&next[0]));
    let plan = determine_actions(&target, &current, &scopes);

    assert_eq!(plan.actions.len(), 1);
    assert_eq!(plan.actions[0].action, ActionType::Restart);
}

#[test]
fn property_change_under_auto_id_replaces_identity() {
    let store = ExecutableStateStore::new();
    let old = auto_webhook("a", 1, 1);
    store_activated(&store, vec![old.clone()]);
    let scopes = DeduplicationScopes::new();

    let next = vec![
        ElementBuilder::new("webhook")
            .auto_dedup()
            .property("path", "/invoices")
            .element_id("a")
            .build(),
    ];
    let target = compute_target_state(&next, &scopes);
    let plan = determine_actions(&target, &compute_current_state(&store, &scope_of(&old)), &scopes);

    // Activations come first, then deactivations.
    let actions: Vec<ActionType> = plan.actions.iter().map(|p| p.action).collect();
    assert_eq!(actions, vec![ActionType::Activate, ActionType::Deactivate]);
}

#[test]
fn conflicting_target_replaces_live_executable_with_invalid() {
    let store = ExecutableStateStore::new();
    let live = ElementBuilder::new("webhook").manual_dedup("shared").element_id("a").build();
    store_activated(&store, vec![live.clone()]);
    let scopes = DeduplicationScopes::new();

    let conflicting = ElementBuilder::new("kafka")
        .manual_dedup("shared")
        .element_id("b")
        .version(2, 2)
        .build();
    let next = vec![live.clone(), conflicting];
    let target = compute_target_state(&next, &scopes);
    let id = target.all_ids().next().copied().unwrap();
    assert!(matches!(target.get(&id), Some(Declaration::Invalid(_))));

    let current = compute_current_state(&store, &scope_of(&live));
    let plan = determine_actions(&target, &current, &scopes);
    assert_eq!(plan.actions.len(), 1);
    assert_eq!(plan.actions[0].action, ActionType::ReplaceWithInvalid);
}

#[test]
fn non_activated_entry_is_restarted() {
    let store = ExecutableStateStore::new();
    let element = auto_webhook("a", 1, 1);
    let scopes = DeduplicationScopes::new();
    let target = compute_target_state(&[element.clone()], &scopes);
    let id = *target.all_ids().next().unwrap();
    store.put(
        id,
        RegisteredExecutable::FailedToActivate {
            declaration: target.get(&id).cloned().unwrap(),
            reason: "boom".into(),
        },
    );

    let current = compute_current_state(&store, &scope_of(&element));
    let plan = determine_actions(&target, &current, &scopes);
    assert_eq!(plan.actions[0].action, ActionType::Restart);
}

#[test]
fn missing_from_target_is_deactivated() {
    let store = ExecutableStateStore::new();
    let element = auto_webhook("a", 1, 1);
    store_activated(&store, vec![element.clone()]);
    let scopes = DeduplicationScopes::new();

    let target = compute_target_state(&[], &scopes);
    let current = compute_current_state(&store, &scope_of(&element));
    let plan = determine_actions(&target, &current, &scopes);
    assert_eq!(plan.actions.len(), 1);
    assert_eq!(plan.actions[0].action, ActionType::Deactivate);
}
