//! Cancellation handling and bounded, delayed reactivation.
//!
//! Cancellations arrive through the owning scope's worker. Restart attempts
//! run on one scheduler task ordered by due time, with at most one pending
//! attempt per identity.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use inbound_id::ExecutableId;
use inbound_types::{Activity, Health, Severity};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::batch::{BatchProcessor, guarded_call};
use crate::context::{CancellationRequest, RestartHint};
use crate::error::RuntimeError;
use crate::registered::{ActivatedExecutable, RegisteredExecutable, RestartState};
use crate::store::ExecutableStateStore;

#[derive(Debug, Clone)]
pub(crate) struct RestartRequest {
    pub id: ExecutableId,
    pub context_instance: u64,
    pub hint: RestartHint,
}

/// Mark the executable cancelled, deactivate it, and hand any restart hint to the scheduler.
pub(crate) async fn cancel(
    store: &ExecutableStateStore,
    batch: &BatchProcessor,
    restarts: &mpsc::UnboundedSender<RestartRequest>,
    request: CancellationRequest,
) {
    let CancellationRequest {
        id,
        context_instance,
        error,
        ..
    } = request;
    let activated = match store.get(&id) {
        Some(RegisteredExecutable::Activated(activated))
            if activated.context.instance() == context_instance =>
        {
            activated
        }
        Some(_) => {
            debug!(
                executable_id = %id.short(),
                "ignoring cancellation from a stale or inactive executable"
            );
            return;
        }
        None => {
            error!(
                executable_id = %id.short(),
                "executable requested cancellation but is not registered"
            );
            return;
        }
    };

    warn!(executable_id = %id.short(), "inbound executable requested its cancellation: {error}");
    let restart = match error.restart {
        Some(hint) if hint.retries > 0 => RestartState::Pending {
            remaining: hint.retries,
        },
        Some(_) => RestartState::Exhausted,
        None => RestartState::NotRequested,
    };
    activated.context.report_health(Health::down(error.message.clone()));
    activated.context.log(Activity::lifecycle(
        Severity::Warning,
        format!("Cancelled: {}", error.message),
    ));
    store.put(
        id,
        RegisteredExecutable::Cancelled {
            activated: activated.clone(),
            error: error.clone(),
            restart,
        },
    );
    batch.deactivate(&activated).await;

    if let (Some(hint), RestartState::Pending { .. }) = (error.restart, restart) {
        let request = RestartRequest {
            id,
            context_instance,
            hint,
        };
        if restarts.send(request).is_err() {
            warn!(
                executable_id = %id.short(),
                "restart scheduler stopped; executable stays cancelled"
            );
        }
    }
}

#[derive(Debug, Clone)]
struct RestartEntry {
    due: Instant,
    generation: u64,
    id: ExecutableId,
    context_instance: u64,
    delay: Duration,
    remaining: u32,
}

impl PartialEq for RestartEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.generation == other.generation && self.id == other.id
    }
}

impl Eq for RestartEntry {}

impl PartialOrd for RestartEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RestartEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.generation.cmp(&other.generation))
            .then_with(|| self.id.cmp(&other.id))
    }
}

pub(crate) struct RestartScheduler {
    store: Arc<ExecutableStateStore>,
    batch: Arc<BatchProcessor>,
    requests: mpsc::UnboundedReceiver<RestartRequest>,
    heap: BinaryHeap<Reverse<RestartEntry>>,
    generations: HashMap<ExecutableId, u64>,
    next_generation: u64,
}

enum AttemptOutcome {
    Reactivated,
    Retry(RestartEntry),
    Finished,
}

impl RestartScheduler {
    pub(crate) fn new(
        store: Arc<ExecutableStateStore>,
        batch: Arc<BatchProcessor>,
        requests: mpsc::UnboundedReceiver<RestartRequest>,
    ) -> Self {
        Self {
            store,
            batch,
            requests,
            heap: BinaryHeap::new(),
            generations: HashMap::new(),
            next_generation: 1,
        }
    }

    pub(crate) async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            let next_due = self.heap.peek().map(|Reverse(entry)| entry.due);
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!(pending = self.heap.len(), "restart scheduler shutting down");
                    break;
                }
                request = self.requests.recv() => match request {
                    Some(request) => self.schedule(request),
                    None => break,
                },
                _ = sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                    self.fire_due().await;
                }
            }
        }
    }

    fn schedule(&mut self, request: RestartRequest) {
        let generation = self.next_generation;
        self.next_generation += 1;
        // A newer request supersedes whatever is still queued for the id.
        self.generations.insert(request.id, generation);
        debug!(
            executable_id = %request.id.short(),
            delay_ms = request.hint.delay.as_millis() as u64,
            retries = request.hint.retries,
            "scheduling executable restart"
        );
        self.heap.push(Reverse(RestartEntry {
            due: Instant::now() + request.hint.delay,
            generation,
            id: request.id,
            context_instance: request.context_instance,
            delay: request.hint.delay,
            remaining: request.hint.retries,
        }));
    }

    async fn fire_due(&mut self) {
        let now = Instant::now();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.due > now {
                break;
            }
            let Some(Reverse(entry)) = self.heap.pop() else {
                break;
            };
            if self.generations.get(&entry.id) != Some(&entry.generation) {
                continue;
            }
            match self.attempt(entry).await {
                AttemptOutcome::Retry(next) => self.heap.push(Reverse(next)),
                AttemptOutcome::Reactivated | AttemptOutcome::Finished => {}
            }
        }
        let heap = &self.heap;
        self.generations.retain(|id, generation| {
            heap.iter()
                .any(|Reverse(entry)| &entry.id == id && entry.generation == *generation)
        });
    }

    async fn attempt(&self, entry: RestartEntry) -> AttemptOutcome {
        let id = entry.id;
        let context_instance = entry.context_instance;
        let still_pending = move |current: &RegisteredExecutable| {
            matches!(
                current,
                RegisteredExecutable::Cancelled {
                    activated,
                    restart: RestartState::Pending { .. },
                    ..
                } if activated.context.instance() == context_instance
            )
        };

        let (previous, error) = match self.store.get(&id) {
            Some(RegisteredExecutable::Cancelled {
                activated,
                error,
                restart: RestartState::Pending { .. },
            }) if activated.context.instance() == context_instance => (activated, error),
            _ => {
                debug!(
                    executable_id = %id.short(),
                    "restart dropped: executable changed since cancellation"
                );
                return AttemptOutcome::Finished;
            }
        };

        let context = previous.context.clone();
        let trigger_type = context.declaration().trigger_type.clone();
        let factory = self.batch.factory();
        let result = match factory.resolve(&trigger_type) {
            None => Err(format!("Connector {trigger_type} not registered")),
            Some(resolved) => {
                context.report_health(Health::unknown());
                let limit = self.batch.activation_timeout();
                let activation = guarded_call(
                    limit,
                    RuntimeError::ActivationTimeout(limit),
                    resolved.executable.activate(context.clone()),
                );
                match activation.await {
                    Ok(()) => Ok(resolved),
                    Err(err) => Err(err.to_string()),
                }
            }
        };

        let first_element = context.declaration().elements.first().cloned();
        match result {
            Ok(resolved) => {
                let reactivated = ActivatedExecutable {
                    executable: resolved.executable,
                    context: context.clone(),
                    implementation: resolved.implementation,
                };
                if self.store.replace_if(
                    id,
                    still_pending,
                    RegisteredExecutable::Activated(reactivated.clone()),
                ) {
                    context.mark_activated();
                    context.log(Activity::lifecycle(
                        Severity::Info,
                        "Reactivated after cancellation",
                    ));
                    if let Some(element) = &first_element {
                        self.batch.metrics().activation(element);
                    }
                    info!(
                        executable_id = %id.short(),
                        trigger_type = %trigger_type,
                        "inbound executable reactivated"
                    );
                } else {
                    debug!(
                        executable_id = %id.short(),
                        "executable replaced during restart; discarding new instance"
                    );
                    self.batch.deactivate(&reactivated).await;
                }
                AttemptOutcome::Reactivated
            }
            Err(reason) => {
                if let Some(element) = &first_element {
                    self.batch.metrics().activation_failure(element);
                }
                let remaining = entry.remaining.saturating_sub(1);
                context.log(Activity::lifecycle(
                    Severity::Error,
                    format!("Reactivation failed: {reason}"),
                ));
                if remaining == 0 {
                    error!(
                        executable_id = %id.short(),
                        trigger_type = %trigger_type,
                        "reactivation failed: {reason}; restart retries exhausted"
                    );
                    context.report_health(Health::down(format!(
                        "restart retries exhausted: {}",
                        error.message
                    )));
                    self.store.replace_if(
                        id,
                        still_pending,
                        RegisteredExecutable::Cancelled {
                            activated: previous,
                            error,
                            restart: RestartState::Exhausted,
                        },
                    );
                    AttemptOutcome::Finished
                } else {
                    warn!(
                        executable_id = %id.short(),
                        trigger_type = %trigger_type,
                        remaining,
                        "reactivation failed: {reason}; retrying"
                    );
                    context.report_health(Health::down(error.message.clone()));
                    let updated = self.store.replace_if(
                        id,
                        still_pending,
                        RegisteredExecutable::Cancelled {
                            activated: previous,
                            error,
                            restart: RestartState::Pending { remaining },
                        },
                    );
                    if !updated {
                        return AttemptOutcome::Finished;
                    }
                    AttemptOutcome::Retry(RestartEntry {
                        due: Instant::now() + entry.delay,
                        remaining,
                        ..entry
                    })
                }
            }
        }
    }
}
