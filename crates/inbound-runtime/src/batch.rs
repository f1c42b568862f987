//! All-or-nothing activation and best-effort deactivation of executables.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use indexmap::IndexMap;
use inbound_id::ExecutableId;
use inbound_types::{Activity, Declaration, Severity, ValidDeclaration};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::activity::ActivityLog;
use crate::context::{CancellationHandler, ContextServices, InboundContext};
use crate::error::RuntimeError;
use crate::factory::ExecutableFactory;
use crate::metrics::InboundMetrics;
use crate::registered::{ActivatedExecutable, RegisteredExecutable};

pub struct BatchProcessor {
    factory: Arc<dyn ExecutableFactory>,
    services: ContextServices,
    metrics: Arc<dyn InboundMetrics>,
    activity: Arc<ActivityLog>,
    activation_timeout: Duration,
    deactivation_timeout: Duration,
}

impl BatchProcessor {
    pub fn new(
        factory: Arc<dyn ExecutableFactory>,
        services: ContextServices,
        metrics: Arc<dyn InboundMetrics>,
        activity: Arc<ActivityLog>,
        activation_timeout: Duration,
        deactivation_timeout: Duration,
    ) -> Self {
        Self {
            factory,
            services,
            metrics,
            activity,
            activation_timeout,
            deactivation_timeout,
        }
    }

    pub fn factory(&self) -> &Arc<dyn ExecutableFactory> {
        &self.factory
    }

    pub fn metrics(&self) -> &Arc<dyn InboundMetrics> {
        &self.metrics
    }

    pub fn activity(&self) -> &Arc<ActivityLog> {
        &self.activity
    }

    pub fn activation_timeout(&self) -> Duration {
        self.activation_timeout
    }

    /// Activate every declaration in input order.
    ///
    /// Invalid declarations map to `InvalidDefinition` and unknown types to
    /// `ConnectorNotRegistered`; neither aborts the batch. The first failed
    /// activation deactivates everything this call already activated and
    /// marks every other member `FailedToActivate` with a shared reason.
    pub async fn activate_batch(
        &self,
        request: IndexMap<ExecutableId, Declaration>,
        on_cancel: &CancellationHandler,
    ) -> IndexMap<ExecutableId, RegisteredExecutable> {
        let mut processed: IndexMap<ExecutableId, RegisteredExecutable> = IndexMap::new();

        for (id, declaration) in &request {
            let valid = match declaration {
                Declaration::Invalid(invalid) => {
                    processed.insert(
                        *id,
                        RegisteredExecutable::InvalidDefinition {
                            declaration: invalid.clone(),
                        },
                    );
                    continue;
                }
                Declaration::Valid(valid) => valid,
            };

            let reason = match self.activate_single(valid.clone(), on_cancel).await {
                Ok(registered) => {
                    processed.insert(*id, registered);
                    continue;
                }
                Err(reason) => reason,
            };

            error!(
                trigger_type = %valid.trigger_type,
                deduplication_id = %valid.deduplication_id,
                "failed to activate executable, reason: {reason}. \
                 All previously activated executables from this batch will be discarded"
            );
            let rollback: Vec<RegisteredExecutable> =
                processed.values().rev().cloned().collect();
            self.deactivate_batch(rollback).await;

            let shared_reason = format!(
                "Process contains invalid connector(s): {}. Reason: {}",
                declaration.element_ids(),
                reason
            );
            return request
                .iter()
                .map(|(other_id, other)| {
                    let reason = if other_id == id {
                        reason.clone()
                    } else {
                        shared_reason.clone()
                    };
                    (
                        *other_id,
                        RegisteredExecutable::FailedToActivate {
                            declaration: other.clone(),
                            reason,
                        },
                    )
                })
                .collect();
        }
        processed
    }

    /// `Err` carries the failure reason; every other outcome is a stored state.
    async fn activate_single(
        &self,
        declaration: ValidDeclaration,
        on_cancel: &CancellationHandler,
    ) -> Result<RegisteredExecutable, String> {
        let Some(resolved) = self.factory.resolve(&declaration.trigger_type) else {
            warn!(
                trigger_type = %declaration.trigger_type,
                executable_id = %declaration.id.short(),
                "no executable registered for type"
            );
            return Ok(RegisteredExecutable::ConnectorNotRegistered { declaration });
        };

        let context = match InboundContext::new(
            declaration.clone(),
            resolved.kind,
            self.services.clone(),
            self.activity.clone(),
            on_cancel.clone(),
        ) {
            Ok(context) => Arc::new(context),
            Err(err) => return Err(self.failed(&declaration, err.to_string())),
        };

        let activation = guarded_call(
            self.activation_timeout,
            RuntimeError::ActivationTimeout(self.activation_timeout),
            resolved.executable.activate(context.clone()),
        );
        if let Err(err) = activation.await {
            return Err(self.failed(&declaration, err.to_string()));
        }

        context.mark_activated();
        context.log(Activity::lifecycle(
            Severity::Info,
            format!("Activated {} executable", declaration.trigger_type),
        ));
        info!(
            trigger_type = %declaration.trigger_type,
            deduplication_id = %declaration.deduplication_id,
            executable_id = %declaration.id.short(),
            "inbound executable activated"
        );
        if let Some(element) = declaration.elements.first() {
            self.metrics.activation(element);
        }
        Ok(RegisteredExecutable::Activated(ActivatedExecutable {
            executable: resolved.executable,
            context,
            implementation: resolved.implementation,
        }))
    }

    fn failed(&self, declaration: &ValidDeclaration, reason: String) -> String {
        self.activity.push(
            declaration.id,
            Activity::lifecycle(Severity::Error, format!("Activation failed: {reason}")),
        );
        if let Some(element) = declaration.elements.first() {
            self.metrics.activation_failure(element);
        }
        reason
    }

    /// Deactivate every `Activated` entry; failures are logged and skipped.
    pub async fn deactivate_batch(&self, executables: Vec<RegisteredExecutable>) {
        for entry in executables {
            if let RegisteredExecutable::Activated(activated) = entry {
                self.deactivate(&activated).await;
            }
        }
    }

    /// Best-effort deactivation of one live executable.
    pub async fn deactivate(&self, activated: &ActivatedExecutable) {
        let declaration = activated.context.declaration();
        debug!(
            trigger_type = %declaration.trigger_type,
            executable_id = %declaration.id.short(),
            "deactivating executable"
        );
        let deactivation = guarded_call(
            self.deactivation_timeout,
            RuntimeError::DeactivationTimeout(self.deactivation_timeout),
            activated.executable.deactivate(),
        );
        let message = match deactivation.await {
            Ok(()) => "Deactivated".to_string(),
            Err(err) => {
                error!(
                    trigger_type = %declaration.trigger_type,
                    executable_id = %declaration.id.short(),
                    "failed to deactivate executable: {err:#}"
                );
                format!("Deactivation failed: {err}")
            }
        };
        activated
            .context
            .log(Activity::lifecycle(Severity::Info, message));
        if let Some(element) = declaration.elements.first() {
            self.metrics.deactivation(element);
        }
    }
}

/// Await trigger code under a deadline. A panic inside `call` is reported as
/// [`RuntimeError::Panicked`] instead of unwinding into the scope worker.
pub(crate) async fn guarded_call<F>(
    limit: Duration,
    on_timeout: RuntimeError,
    call: F,
) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match timeout(limit, AssertUnwindSafe(call).catch_unwind()).await {
        Ok(Ok(result)) => result,
        Ok(Err(payload)) => Err(RuntimeError::Panicked(panic_message(payload.as_ref())).into()),
        Err(_) => Err(on_timeout.into()),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
