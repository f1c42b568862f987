//! All-or-nothing batch activation.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use inbound_runtime::{
    ActivityLog, BatchProcessor, CancellationHandler, ContextServices, DefaultExecutableFactory,
    ExecutableStatus, InMemoryMetrics, MetricAction, RegisteredExecutable,
};
use inbound_testkit::{ElementBuilder, MockOutcome, MockRecorder, mock_registration};
use inbound_types::{Declaration, DeduplicationScopes, ExecutableId, RawElement, group_elements};

struct Fixture {
    batch: BatchProcessor,
    metrics: Arc<InMemoryMetrics>,
    ok: Arc<MockRecorder>,
    failing: Arc<MockRecorder>,
}

fn fixture(activation_timeout: Duration) -> Fixture {
    let ok = MockRecorder::new();
    let failing = MockRecorder::new();
    let factory = DefaultExecutableFactory::new()
        .with(mock_registration("webhook", ok.clone()))
        .with(mock_registration("kafka", failing.clone()));
    let metrics = Arc::new(InMemoryMetrics::new());
    let batch = BatchProcessor::new(
        Arc::new(factory),
        ContextServices::default(),
        metrics.clone(),
        Arc::new(ActivityLog::new(10)),
        activation_timeout,
        Duration::from_secs(1),
    );
    Fixture {
        batch,
        metrics,
        ok,
        failing,
    }
}

fn request(elements: Vec<RawElement>) -> IndexMap<ExecutableId, Declaration> {
    group_elements(&elements, &DeduplicationScopes::new())
        .into_iter()
        .map(|declaration| (declaration.id(), declaration))
        .collect()
}

fn noop_cancel() -> CancellationHandler {
    Arc::new(|_| {})
}

#[tokio::test]
async fn failure_rolls_back_and_fails_every_member() {
    let fx = fixture(Duration::from_secs(5));
    fx.failing.script([MockOutcome::Fail("broker unreachable".into())]);

    let request = request(vec![
        ElementBuilder::new("webhook").element_id("a").build(),
        ElementBuilder::new("kafka").element_id("b").build(),
        ElementBuilder::new("webhook").element_id("c").build(),
    ]);
    let ids: Vec<ExecutableId> = request.keys().copied().collect();
    let results = fx.batch.activate_batch(request, &noop_cancel()).await;

    assert_eq!(results.len(), 3);
    for entry in results.values() {
        assert_eq!(entry.status(), ExecutableStatus::FailedToActivate);
    }
    let reason_of = |id: &ExecutableId| match &results[id] {
        RegisteredExecutable::FailedToActivate { reason, .. } => reason.clone(),
        other => panic!("unexpected state {other:?}"),
    };
    assert_eq!(reason_of(&ids[1]), "broker unreachable");
    assert_eq!(
        reason_of(&ids[0]),
        "Process contains invalid connector(s): b. Reason: broker unreachable"
    );
    assert_eq!(reason_of(&ids[0]), reason_of(&ids[2]));

    // "a" was activated before "b" failed and has been rolled back; "c" never ran.
    assert_eq!(fx.ok.activations(), 1);
    assert_eq!(fx.ok.deactivations(), 1);
    assert_eq!(fx.ok.attempts(), 1);
    assert_eq!(fx.metrics.count(MetricAction::ActivationFailed, "kafka"), 1);
}

#[tokio::test]
async fn unregistered_and_invalid_members_do_not_abort_the_batch() {
    let fx = fixture(Duration::from_secs(5));
    let request = request(vec![
        ElementBuilder::new("webhook").element_id("a").build(),
        ElementBuilder::new("carrier-pigeon").element_id("b").build(),
        ElementBuilder::new("webhook")
            .manual_dedup("shared")
            .element_id("c")
            .build(),
        ElementBuilder::new("kafka")
            .manual_dedup("shared")
            .element_id("d")
            .build(),
    ]);
    let results = fx.batch.activate_batch(request, &noop_cancel()).await;

    let statuses: Vec<ExecutableStatus> =
        results.values().map(RegisteredExecutable::status).collect();
    assert_eq!(
        statuses,
        vec![
            ExecutableStatus::Activated,
            ExecutableStatus::ConnectorNotRegistered,
            ExecutableStatus::InvalidDefinition,
        ]
    );
    let not_registered = results.values().nth(1).unwrap();
    assert_eq!(
        not_registered.health().error.as_deref(),
        Some("Connector carrier-pigeon not registered")
    );
    assert_eq!(fx.ok.live(), 1);
    assert_eq!(fx.metrics.count(MetricAction::Activated, "webhook"), 1);
    assert_eq!(
        fx.metrics.count_for_tenant(
            MetricAction::Activated,
            "webhook",
            inbound_testkit::elements::DEFAULT_TENANT,
        ),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn hanging_activation_times_out() {
    let fx = fixture(Duration::from_millis(200));
    fx.failing.script([MockOutcome::Hang]);
    let request = request(vec![ElementBuilder::new("kafka").element_id("slow").build()]);
    let results = fx.batch.activate_batch(request, &noop_cancel()).await;

    let entry = results.values().next().unwrap();
    match entry {
        RegisteredExecutable::FailedToActivate { reason, .. } => {
            assert!(reason.contains("timed out"), "reason: {reason}");
        }
        other => panic!("unexpected state {other:?}"),
    }
}

#[tokio::test]
async fn deactivate_batch_only_touches_live_entries() {
    let fx = fixture(Duration::from_secs(5));
    let request = request(vec![
        ElementBuilder::new("webhook").element_id("a").build(),
        ElementBuilder::new("carrier-pigeon").element_id("b").build(),
    ]);
    let results = fx.batch.activate_batch(request, &noop_cancel()).await;
    fx.batch
        .deactivate_batch(results.into_values().collect())
        .await;

    assert_eq!(fx.ok.deactivations(), 1);
    assert_eq!(fx.ok.live(), 0);
    assert_eq!(fx.metrics.count(MetricAction::Deactivated, "webhook"), 1);
}

#[tokio::test]
async fn panicking_activation_fails_the_batch_and_rolls_back() {
    let fx = fixture(Duration::from_secs(5));
    fx.failing.script([MockOutcome::Panic("client exploded".into())]);

    let request = request(vec![
        ElementBuilder::new("webhook").element_id("a").build(),
        ElementBuilder::new("kafka").element_id("b").build(),
    ]);
    let ids: Vec<ExecutableId> = request.keys().copied().collect();
    let results = fx.batch.activate_batch(request, &noop_cancel()).await;

    assert_eq!(results.len(), 2);
    match &results[&ids[1]] {
        RegisteredExecutable::FailedToActivate { reason, .. } => {
            assert_eq!(reason, "executable panicked: client exploded");
        }
        other => panic!("unexpected state {other:?}"),
    }
    assert_eq!(results[&ids[0]].status(), ExecutableStatus::FailedToActivate);
    assert_eq!(fx.ok.activations(), 1);
    assert_eq!(fx.ok.live(), 0);
    assert_eq!(fx.metrics.count(MetricAction::ActivationFailed, "kafka"), 1);
}

#[tokio::test]
async fn failed_deactivation_does_not_block_the_rest() {
    let fx = fixture(Duration::from_secs(5));
    fx.ok.script_deactivation([MockOutcome::Fail("socket busy".into())]);
    let request = request(vec![
        ElementBuilder::new("webhook").element_id("a").build(),
        ElementBuilder::new("webhook").element_id("b").build(),
    ]);
    let results = fx.batch.activate_batch(request, &noop_cancel()).await;
    assert_eq!(fx.ok.activations(), 2);

    fx.batch
        .deactivate_batch(results.into_values().collect())
        .await;

    assert_eq!(fx.ok.deactivation_attempts(), 2);
    assert_eq!(fx.ok.deactivations(), 1);
    assert_eq!(fx.metrics.count(MetricAction::Deactivated, "webhook"), 2);
}

#[tokio::test]
async fn panicking_deactivation_is_contained() {
    let fx = fixture(Duration::from_secs(5));
    fx.ok.script_deactivation([MockOutcome::Panic("double free".into())]);
    let request = request(vec![
        ElementBuilder::new("webhook").element_id("a").build(),
        ElementBuilder::new("webhook").element_id("b").build(),
    ]);
    let results = fx.batch.activate_batch(request, &noop_cancel()).await;
    let first = results.keys().next().copied().unwrap();

    fx.batch
        .deactivate_batch(results.into_values().collect())
        .await;

    assert_eq!(fx.ok.deactivation_attempts(), 2);
    assert_eq!(fx.ok.deactivations(), 1);
    let logs = fx.batch.activity().recent(&first);
    assert_eq!(
        logs.last().map(|activity| activity.message.as_str()),
        Some("Deactivation failed: executable panicked: double free")
    );
}
