//! Per-scope event loop that reconciles declarations with running executables.
//!
//! One dispatcher task drains the registry queue and forwards each event to
//! the worker owning its `(tenant, process)` scope. Workers are spawned on
//! first use and retired after the scope's definitions are removed; a
//! replacement worker waits for its predecessor to finish, so events for one
//! scope are handled strictly in submission order while distinct scopes run
//! concurrently.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use indexmap::IndexMap;
use inbound_id::ExecutableId;
use inbound_types::{
    Activity, Declaration, DeduplicationScopes, ProcessScope, RawElement, ScopeEvent, Severity,
    ValidDeclaration,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::activity::ActivityLog;
use crate::batch::BatchProcessor;
use crate::config::RuntimeConfig;
use crate::context::{
    CancellationHandler, CancellationRequest, ContextServices, CorrelationHandler,
    ProcessInstanceClient, SecretProvider,
};
use crate::error::RuntimeError;
use crate::factory::ExecutableFactory;
use crate::metrics::{InboundMetrics, NoopMetrics};
use crate::planner::{
    ActionType, StateTransitionPlan, TargetState, compute_current_state, compute_target_state,
    determine_actions,
};
use crate::query::QueryService;
use crate::registered::{ActivatedExecutable, RegisteredExecutable};
use crate::store::ExecutableStateStore;
use crate::supervisor::{self, RestartRequest, RestartScheduler};

/// Messages accepted by the dispatcher and forwarded to scope workers.
#[derive(Debug)]
enum RegistryEvent {
    Scope(ScopeEvent),
    Cancelled(CancellationRequest),
    Flush(oneshot::Sender<()>),
}

pub struct ExecutableRegistryBuilder {
    factory: Arc<dyn ExecutableFactory>,
    config: RuntimeConfig,
    metrics: Arc<dyn InboundMetrics>,
    services: ContextServices,
}

impl ExecutableRegistryBuilder {
    pub fn new(factory: Arc<dyn ExecutableFactory>) -> Self {
        Self {
            factory,
            config: RuntimeConfig::default(),
            metrics: Arc::new(NoopMetrics),
            services: ContextServices::default(),
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn InboundMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn correlation(mut self, correlation: Arc<dyn CorrelationHandler>) -> Self {
        self.services.correlation = correlation;
        self
    }

    pub fn secrets(mut self, secrets: Arc<dyn SecretProvider>) -> Self {
        self.services.secrets = secrets;
        self
    }

    pub fn process_instances(mut self, client: Arc<dyn ProcessInstanceClient>) -> Self {
        self.services.process_instances = Some(client);
        self
    }

    /// Spawn the dispatcher, restart scheduler and status reporter on the current tokio runtime.
    pub fn start(self) -> ExecutableRegistry {
        let config = self.config;
        let activity = Arc::new(ActivityLog::new(config.activity_log_size));
        let store = Arc::new(ExecutableStateStore::new());
        let batch = Arc::new(BatchProcessor::new(
            self.factory.clone(),
            self.services,
            self.metrics,
            activity.clone(),
            config.activation_timeout,
            config.deactivation_timeout,
        ));
        let query = QueryService::new(store.clone(), activity, self.factory.clone());

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (restart_tx, restart_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(4);

        let cancel_tx = events_tx.clone();
        let on_cancel: CancellationHandler = Arc::new(move |request: CancellationRequest| {
            let id = request.id;
            if cancel_tx.send(RegistryEvent::Cancelled(request)).is_err() {
                warn!(executable_id = %id.short(), "registry stopped; cancellation dropped");
            }
        });

        let shared = Arc::new(Shared {
            store: store.clone(),
            batch: batch.clone(),
            scopes: self.factory.deduplication_scopes(),
            on_cancel,
            restarts: restart_tx,
        });

        let mut tasks = Vec::new();
        let dispatcher = Dispatcher {
            shared: shared.clone(),
            events_rx,
            shutdown_tx: shutdown_tx.clone(),
            workers: HashMap::new(),
            retiring: HashMap::new(),
        };
        tasks.push(tokio::spawn(dispatcher.run(shutdown_tx.subscribe())));
        let scheduler = RestartScheduler::new(store, batch, restart_rx);
        tasks.push(tokio::spawn(scheduler.run(shutdown_tx.subscribe())));
        if let Some(interval) = config.status_report_interval.filter(|d| !d.is_zero()) {
            tasks.push(tokio::spawn(run_status_reporter(
                query.clone(),
                interval,
                shutdown_tx.subscribe(),
            )));
        }
        #[cfg(feature = "http")]
        tasks.extend(crate::http::spawn_http_server(
            config.http.clone(),
            query.clone(),
            shutdown_tx.clone(),
        ));

        ExecutableRegistry {
            events_tx,
            shutdown_tx,
            shared,
            query,
            tasks: Mutex::new(tasks),
        }
    }
}

/// Entry point for definition changes; owns the background tasks of the runtime.
pub struct ExecutableRegistry {
    events_tx: mpsc::UnboundedSender<RegistryEvent>,
    shutdown_tx: broadcast::Sender<()>,
    shared: Arc<Shared>,
    query: QueryService,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutableRegistry {
    pub fn builder(factory: Arc<dyn ExecutableFactory>) -> ExecutableRegistryBuilder {
        ExecutableRegistryBuilder::new(factory)
    }

    /// Queue an event; handling happens asynchronously on the scope's worker.
    pub fn publish(&self, event: ScopeEvent) -> Result<(), RuntimeError> {
        debug!(scope = %event.scope(), "event queued");
        self.events_tx
            .send(RegistryEvent::Scope(event))
            .map_err(|_| RuntimeError::Shutdown)
    }

    pub fn on_definitions_changed(
        &self,
        scope: ProcessScope,
        elements_by_definition: BTreeMap<i64, Vec<RawElement>>,
    ) -> Result<(), RuntimeError> {
        self.publish(ScopeEvent::DefinitionsChanged {
            scope,
            elements_by_definition,
        })
    }

    pub fn on_definitions_removed(&self, scope: ProcessScope) -> Result<(), RuntimeError> {
        self.publish(ScopeEvent::DefinitionsRemoved { scope })
    }

    /// Resolves once every event queued before this call has been handled.
    pub async fn flush(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.events_tx
            .send(RegistryEvent::Flush(tx))
            .map_err(|_| RuntimeError::Shutdown)?;
        rx.await.map_err(|_| RuntimeError::Shutdown)
    }

    pub fn query_service(&self) -> &QueryService {
        &self.query
    }

    pub fn store(&self) -> &Arc<ExecutableStateStore> {
        &self.shared.store
    }

    /// Sender whose broadcast stops every runtime task.
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Stop all background tasks, then deactivate every live executable.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(err) = task.await {
                if err.is_panic() {
                    error!("runtime task panicked: {err}");
                }
            }
        }

        let remaining = self.shared.store.get_all();
        info!(executables = remaining.len(), "deactivating executables on shutdown");
        for entry in remaining {
            let id = entry.id();
            self.shared.store.remove(&id);
            self.shared.batch.deactivate_batch(vec![entry]).await;
            self.shared.batch.activity().remove(&id);
        }
    }
}

impl Drop for ExecutableRegistry {
    fn drop(&mut self) {
        // Background tasks hold their own senders; stop them explicitly.
        let _ = self.shutdown_tx.send(());
    }
}

/// State shared by the dispatcher and every scope worker.
struct Shared {
    store: Arc<ExecutableStateStore>,
    batch: Arc<BatchProcessor>,
    scopes: DeduplicationScopes,
    on_cancel: CancellationHandler,
    restarts: mpsc::UnboundedSender<RestartRequest>,
}

impl Shared {
    async fn handle(&self, event: RegistryEvent) {
        match event {
            RegistryEvent::Scope(event) => {
                let elements = event.elements();
                match event {
                    ScopeEvent::DefinitionsChanged { scope, .. } => {
                        self.reconcile(&scope, &elements).await
                    }
                    ScopeEvent::DefinitionsRemoved { scope } => self.remove_scope(&scope).await,
                }
            }
            RegistryEvent::Cancelled(request) => {
                supervisor::cancel(&self.store, &self.batch, &self.restarts, request).await
            }
            RegistryEvent::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }

    async fn reconcile(&self, scope: &ProcessScope, elements: &[RawElement]) {
        let target = compute_target_state(elements, &self.scopes);
        let current = compute_current_state(&self.store, scope);
        let plan = determine_actions(&target, &current, &self.scopes);
        if plan.is_noop() {
            debug!(scope = %scope, "definitions changed but no action required");
            return;
        }
        info!(scope = %scope, actions = plan.actions.len(), "applying transition plan");
        self.execute(&target, &plan).await;
    }

    /// Teardown first, then hot swaps, then one activation batch.
    async fn execute(&self, target: &TargetState, plan: &StateTransitionPlan) {
        for id in plan.ids_for(ActionType::Deactivate) {
            self.teardown(&id).await;
            self.batch.activity().remove(&id);
        }
        for id in plan.ids_for(ActionType::ReplaceWithInvalid) {
            self.teardown(&id).await;
            if let Some(Declaration::Invalid(invalid)) = target.get(&id) {
                self.store.put(
                    id,
                    RegisteredExecutable::InvalidDefinition {
                        declaration: invalid.clone(),
                    },
                );
            }
        }
        for id in plan.ids_for(ActionType::Restart) {
            self.teardown(&id).await;
        }

        let mut batch: IndexMap<ExecutableId, Declaration> = plan
            .actions
            .iter()
            .filter(|planned| matches!(planned.action, ActionType::Activate | ActionType::Restart))
            .filter_map(|planned| target.get(&planned.id).map(|d| (planned.id, d.clone())))
            .collect();

        for id in plan.ids_for(ActionType::HotSwap) {
            let Some(declaration) = target.get(&id) else {
                continue;
            };
            match (self.store.get(&id), declaration) {
                (Some(RegisteredExecutable::Activated(activated)), Declaration::Valid(valid)) => {
                    hot_swap(&activated, valid.clone());
                }
                _ => {
                    // State moved between planning and execution; fall back to a restart.
                    self.teardown(&id).await;
                    batch.insert(id, declaration.clone());
                }
            }
        }

        if batch.is_empty() {
            return;
        }
        let results = self.batch.activate_batch(batch, &self.on_cancel).await;
        self.store.put_all(results);
    }

    /// Remove `id` from the store and deactivate it if it was live.
    async fn teardown(&self, id: &ExecutableId) {
        if let Some(previous) = self.store.remove(id) {
            self.batch.deactivate_batch(vec![previous]).await;
        }
    }

    async fn remove_scope(&self, scope: &ProcessScope) {
        let ids = self.store.ids_for_scope(scope);
        info!(scope = %scope, executables = ids.len(), "definitions removed; deactivating scope");
        for id in ids {
            self.teardown(&id).await;
            self.batch.activity().remove(&id);
        }
    }
}

fn hot_swap(activated: &ActivatedExecutable, declaration: ValidDeclaration) {
    let elements = declaration.elements.len();
    let keys = declaration.process_definition_keys();
    activated.context.replace_declaration(declaration);
    activated.context.log(Activity::lifecycle(
        Severity::Info,
        format!("Hot swapped: bound to {elements} element(s) across {} definition(s)", keys.len()),
    ));
    info!(
        executable_id = %activated.context.id().short(),
        elements,
        "hot swapped executable elements"
    );
}

/// Completes when the owning worker task has exited.
#[derive(Clone)]
struct WorkerExit(watch::Receiver<()>);

impl WorkerExit {
    async fn wait(mut self) {
        while self.0.changed().await.is_ok() {}
    }

    fn is_finished(&self) -> bool {
        self.0.has_changed().is_err()
    }
}

struct ScopeWorker {
    tx: mpsc::UnboundedSender<RegistryEvent>,
    exit: WorkerExit,
}

impl ScopeWorker {
    fn spawn(
        scope: ProcessScope,
        shared: Arc<Shared>,
        predecessor: Option<WorkerExit>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(());
        tokio::spawn(async move {
            let _exit = exit_tx;
            if let Some(predecessor) = predecessor {
                predecessor.wait().await;
            }
            debug!(scope = %scope, "scope worker started");
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => break,
                    event = rx.recv() => match event {
                        Some(event) => shared.handle(event).await,
                        None => break,
                    },
                }
            }
            debug!(scope = %scope, "scope worker stopped");
        });
        Self {
            tx,
            exit: WorkerExit(exit_rx),
        }
    }
}

struct Dispatcher {
    shared: Arc<Shared>,
    events_rx: mpsc::UnboundedReceiver<RegistryEvent>,
    shutdown_tx: broadcast::Sender<()>,
    workers: HashMap<ProcessScope, ScopeWorker>,
    retiring: HashMap<ProcessScope, WorkerExit>,
}

impl Dispatcher {
    async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                event = self.events_rx.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => break,
                },
            }
        }

        let exits: Vec<WorkerExit> = self
            .workers
            .drain()
            .map(|(_, worker)| worker.exit)
            .chain(self.retiring.drain().map(|(_, exit)| exit))
            .collect();
        for exit in exits {
            exit.wait().await;
        }
        debug!("registry dispatcher stopped");
    }

    fn dispatch(&mut self, event: RegistryEvent) {
        match event {
            RegistryEvent::Scope(event) => {
                let scope = event.scope().clone();
                let removed = matches!(event, ScopeEvent::DefinitionsRemoved { .. });
                self.send_to(scope.clone(), RegistryEvent::Scope(event));
                if removed {
                    if let Some(worker) = self.workers.remove(&scope) {
                        self.retiring.insert(scope, worker.exit);
                    }
                }
            }
            RegistryEvent::Cancelled(request) => {
                self.send_to(request.scope.clone(), RegistryEvent::Cancelled(request));
            }
            RegistryEvent::Flush(done) => self.flush(done),
        }
        self.retiring.retain(|_, exit| !exit.is_finished());
    }

    fn send_to(&mut self, scope: ProcessScope, event: RegistryEvent) {
        let event = match self.worker(&scope).tx.send(event) {
            Ok(()) => return,
            Err(mpsc::error::SendError(event)) => event,
        };
        error!(scope = %scope, "scope worker died; restarting it");
        self.workers.remove(&scope);
        if self.worker(&scope).tx.send(event).is_err() {
            error!(scope = %scope, "scope worker unavailable; event dropped");
        }
    }

    fn worker(&mut self, scope: &ProcessScope) -> &ScopeWorker {
        if !self.workers.contains_key(scope) {
            let predecessor = self.retiring.remove(scope);
            let worker = ScopeWorker::spawn(
                scope.clone(),
                self.shared.clone(),
                predecessor,
                self.shutdown_tx.subscribe(),
            );
            self.workers.insert(scope.clone(), worker);
        }
        &self.workers[scope]
    }

    fn flush(&mut self, done: oneshot::Sender<()>) {
        let mut acks = Vec::new();
        for worker in self.workers.values() {
            let (tx, rx) = oneshot::channel();
            if worker.tx.send(RegistryEvent::Flush(tx)).is_ok() {
                acks.push(rx);
            }
        }
        let exits: Vec<WorkerExit> = self.retiring.values().cloned().collect();
        tokio::spawn(async move {
            for ack in acks {
                let _ = ack.await;
            }
            for exit in exits {
                exit.wait().await;
            }
            let _ = done.send(());
        });
    }
}

async fn run_status_reporter(
    query: QueryService,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                query.status_report();
            }
        }
    }
}
