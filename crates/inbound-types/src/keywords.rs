//! Property keys interpreted by the runtime rather than by trigger implementations.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::DeclarationError;

pub const INBOUND_TYPE: &str = "inbound.type";
pub const DEDUPLICATION_MODE: &str = "deduplicationMode";
pub const DEDUPLICATION_ID: &str = "deduplicationId";
pub const DEDUPLICATION_MODE_MANUAL_FLAG: &str = "deduplicationModeManualFlag";
pub const MESSAGE_ID_EXPRESSION: &str = "messageIdExpression";
pub const CORRELATION_KEY_EXPRESSION: &str = "correlationKeyExpression";
pub const CORRELATION_REQUIRED: &str = "correlationRequired";
pub const ACTIVATION_CONDITION: &str = "activationCondition";
pub const DEPRECATED_ACTIVATION_CONDITION: &str = "inbound.activationCondition";
pub const CONSUME_UNMATCHED_EVENTS: &str = "consumeUnmatchedEvents";
pub const MESSAGE_TTL: &str = "messageTtl";
pub const RESULT_VARIABLE: &str = "resultVariable";
pub const RESULT_EXPRESSION: &str = "resultExpression";

/// Keys consumed by the runtime itself; never handed to an executable.
pub const RUNTIME_PROPERTIES: &[&str] = &[
    INBOUND_TYPE,
    DEDUPLICATION_MODE,
    DEDUPLICATION_ID,
    MESSAGE_ID_EXPRESSION,
    CORRELATION_KEY_EXPRESSION,
    DEPRECATED_ACTIVATION_CONDITION,
    ACTIVATION_CONDITION,
    CONSUME_UNMATCHED_EVENTS,
    MESSAGE_TTL,
];

/// Keys that never contribute to deduplication.
pub const EXCLUDED_FROM_DEDUPLICATION: &[&str] = &[
    INBOUND_TYPE,
    DEDUPLICATION_MODE,
    DEDUPLICATION_ID,
    MESSAGE_ID_EXPRESSION,
    CORRELATION_KEY_EXPRESSION,
    DEPRECATED_ACTIVATION_CONDITION,
    ACTIVATION_CONDITION,
    MESSAGE_TTL,
    CORRELATION_REQUIRED,
    DEDUPLICATION_MODE_MANUAL_FLAG,
    RESULT_EXPRESSION,
    RESULT_VARIABLE,
];

/// True for runtime-interpreted keys handled by the runtime instead of the executable.
pub fn is_runtime_property(key: &str) -> bool {
    RUNTIME_PROPERTIES.contains(&key)
}

/// True for any reserved key, i.e. anything outside the non-reserved property bag.
pub fn is_reserved(key: &str) -> bool {
    RUNTIME_PROPERTIES.contains(&key) || EXCLUDED_FROM_DEDUPLICATION.contains(&key)
}

/// Policy governing how a group identity is derived from raw properties.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeduplicationMode {
    /// No mode declared: one executable per element.
    Legacy,
    Auto,
    Manual,
}

impl DeduplicationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeduplicationMode::Legacy => "LEGACY",
            DeduplicationMode::Auto => "AUTO",
            DeduplicationMode::Manual => "MANUAL",
        }
    }

    /// Resolve the mode declared by a `deduplicationMode` property value.
    pub fn from_property(value: Option<&str>) -> Result<Self, DeclarationError> {
        match value {
            None => Ok(DeduplicationMode::Legacy),
            Some(raw) => raw.parse(),
        }
    }
}

impl FromStr for DeduplicationMode {
    type Err = DeclarationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AUTO" => Ok(DeduplicationMode::Auto),
            "MANUAL" => Ok(DeduplicationMode::Manual),
            other => Err(DeclarationError::UnknownDeduplicationMode(other.to_string())),
        }
    }
}

impl fmt::Display for DeduplicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parsing() {
        assert_eq!(
            DeduplicationMode::from_property(None).unwrap(),
            DeduplicationMode::Legacy
        );
        assert_eq!(
            DeduplicationMode::from_property(Some("AUTO")).unwrap(),
            DeduplicationMode::Auto
        );
        assert_eq!(
            DeduplicationMode::from_property(Some("MANUAL")).unwrap(),
            DeduplicationMode::Manual
        );
        assert!(DeduplicationMode::from_property(Some("auto")).is_err());
    }

    #[test]
    fn reserved_sets() {
        assert!(is_runtime_property(MESSAGE_TTL));
        assert!(!is_runtime_property(RESULT_VARIABLE));
        assert!(is_reserved(RESULT_VARIABLE));
        assert!(is_reserved(CONSUME_UNMATCHED_EVENTS));
        assert!(!is_reserved("topic"));
    }
}
