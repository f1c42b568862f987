use serde::{Deserialize, Serialize};

/// Tag used for every lifecycle transition written by the runtime.
pub const LIFECYCLE: &str = "LIFECYCLE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

/// One entry of an executable's activity log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub severity: Severity,
    pub tag: String,
    pub message: String,
    pub timestamp_ns: u64,
}

impl Activity {
    pub fn new(severity: Severity, tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            tag: tag.into(),
            message: message.into(),
            timestamp_ns: crate::now_wallclock_ns(),
        }
    }

    pub fn lifecycle(severity: Severity, message: impl Into<String>) -> Self {
        Self::new(severity, LIFECYCLE, message)
    }
}
