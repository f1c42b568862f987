//! Test utilities for exercising the inbound runtime with scripted executables.
//!
//! - `elements`: builders for raw elements and scope events
//! - `mock`: a scriptable [`inbound_runtime::InboundExecutable`] plus the recorder that observes it
//! - `correlation`: a correlation handler that records every payload

pub mod correlation;
pub mod elements;
pub mod mock;

pub use correlation::{Correlated, RecordingCorrelation};
pub use elements::{ElementBuilder, by_definition, scope_of};
pub use mock::{MockExecutable, MockOutcome, MockRecorder, mock_registration};

/// Install a test subscriber honouring `RUST_LOG`; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
