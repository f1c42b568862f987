//! Lifecycle controller for inbound executables.
//!
//! Definition changes for a `(tenant, process)` scope are grouped into
//! declarations, diffed against the executables already running, and applied
//! as one transition plan on that scope's worker.

pub mod activity;
pub mod batch;
pub mod config;
pub mod context;
pub mod error;
pub mod executable;
pub mod factory;
#[cfg(feature = "http")]
pub mod http;
pub mod metrics;
pub mod planner;
pub mod query;
pub mod registered;
pub mod registry;
pub mod store;
mod supervisor;

pub use activity::ActivityLog;
pub use batch::BatchProcessor;
pub use config::{HttpServerConfig, RuntimeConfig};
pub use context::{
    CancellationError, CancellationHandler, CancellationRequest, ContextServices,
    CorrelationHandler, CorrelationResult, EnvSecretProvider, InboundContext, ProcessInstance,
    ProcessInstanceClient, RestartHint, SecretProvider, resolve_secrets,
};
pub use error::RuntimeError;
pub use executable::InboundExecutable;
pub use factory::{
    ContextKind, DefaultExecutableFactory, ExecutableFactory, ExecutableRegistration,
    ResolvedExecutable,
};
pub use metrics::{InMemoryMetrics, InboundMetrics, MetricAction, NoopMetrics};
pub use planner::{
    ActionType, CurrentState, PlannedAction, StateTransitionPlan, TargetState,
    compute_current_state, compute_target_state, determine_actions,
};
pub use query::{AggregatedHealth, ExecutableQuery, ExecutableSummary, QueryService};
pub use registered::{ActivatedExecutable, ExecutableStatus, RegisteredExecutable, RestartState};
pub use registry::{ExecutableRegistry, ExecutableRegistryBuilder};
pub use store::ExecutableStateStore;
