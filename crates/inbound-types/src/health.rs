use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Up,
    Down,
    Unknown,
}

/// Health reported by (or derived for) one executable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl Health {
    pub fn up() -> Self {
        Self {
            status: HealthStatus::Up,
            error: None,
            details: BTreeMap::new(),
        }
    }

    pub fn down(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Down,
            error: Some(message.into()),
            details: BTreeMap::new(),
        }
    }

    pub fn unknown() -> Self {
        Self {
            status: HealthStatus::Unknown,
            error: None,
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn is_down(&self) -> bool {
        self.status == HealthStatus::Down
    }
}

impl Default for Health {
    fn default() -> Self {
        Self::unknown()
    }
}
