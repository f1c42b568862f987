//! Data model for inbound trigger declarations: raw elements, reserved
//! keywords, deduplication, grouping into declarations, and the health and
//! activity records reported for running executables.

pub mod activity;
pub mod declaration;
pub mod element;
pub mod event;
pub mod grouping;
pub mod health;
pub mod keywords;

pub use activity::{Activity, LIFECYCLE, Severity};
pub use declaration::{
    Declaration, DeclarationError, DeclarationFingerprint, InvalidDeclaration, ValidDeclaration,
};
pub use element::{CorrelationPoint, ProcessElement, RawElement};
pub use event::{ProcessScope, ScopeEvent};
pub use grouping::{DeduplicationScopes, group_elements};
pub use health::{Health, HealthStatus};
pub use inbound_id::ExecutableId;
pub use keywords::DeduplicationMode;

/// Wall clock time in nanoseconds since the Unix epoch.
pub fn now_wallclock_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
