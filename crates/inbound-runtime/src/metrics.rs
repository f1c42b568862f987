use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use inbound_types::RawElement;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricAction {
    Activated,
    ActivationFailed,
    Deactivated,
}

/// Counter sink for lifecycle transitions, keyed by the first element of a declaration.
pub trait InboundMetrics: Send + Sync {
    fn activation(&self, element: &RawElement);
    fn activation_failure(&self, element: &RawElement);
    fn deactivation(&self, element: &RawElement);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl InboundMetrics for NoopMetrics {
    fn activation(&self, _element: &RawElement) {}
    fn activation_failure(&self, _element: &RawElement) {}
    fn deactivation(&self, _element: &RawElement) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CounterKey {
    action: MetricAction,
    trigger_type: String,
    tenant_id: Option<String>,
}

/// Counters held in memory, scoped by type and by (type, tenant).
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<HashMap<CounterKey, u64>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, action: MetricAction, trigger_type: &str) -> u64 {
        self.get(CounterKey {
            action,
            trigger_type: trigger_type.to_string(),
            tenant_id: None,
        })
    }

    pub fn count_for_tenant(
        &self,
        action: MetricAction,
        trigger_type: &str,
        tenant_id: &str,
    ) -> u64 {
        self.get(CounterKey {
            action,
            trigger_type: trigger_type.to_string(),
            tenant_id: Some(tenant_id.to_string()),
        })
    }

    fn get(&self, key: CounterKey) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied()
            .unwrap_or(0)
    }

    fn increment(&self, action: MetricAction, element: &RawElement) {
        let trigger_type = element.trigger_type().unwrap_or("unknown").to_string();
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        *counters
            .entry(CounterKey {
                action,
                trigger_type: trigger_type.clone(),
                tenant_id: None,
            })
            .or_default() += 1;
        *counters
            .entry(CounterKey {
                action,
                trigger_type,
                tenant_id: Some(element.tenant_id().to_string()),
            })
            .or_default() += 1;
    }
}

impl InboundMetrics for InMemoryMetrics {
    fn activation(&self, element: &RawElement) {
        self.increment(MetricAction::Activated, element);
    }

    fn activation_failure(&self, element: &RawElement) {
        self.increment(MetricAction::ActivationFailed, element);
    }

    fn deactivation(&self, element: &RawElement) {
        self.increment(MetricAction::Deactivated, element);
    }
}
