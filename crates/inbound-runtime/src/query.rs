//! Read-only projection over the state store.

use std::collections::BTreeMap;
use std::sync::Arc;

use inbound_id::ExecutableId;
use inbound_types::{Activity, Health, HealthStatus, ProcessElement};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::activity::ActivityLog;
use crate::factory::ExecutableFactory;
use crate::registered::{ExecutableStatus, RegisteredExecutable};
use crate::store::ExecutableStateStore;

/// Filter for [`QueryService::query`]; `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutableQuery {
    #[serde(rename = "type")]
    pub trigger_type: Option<String>,
    pub tenant_id: Option<String>,
    pub bpmn_process_id: Option<String>,
    pub element_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutableSummary {
    pub id: ExecutableId,
    pub status: ExecutableStatus,
    #[serde(rename = "type")]
    pub trigger_type: Option<String>,
    pub tenant_id: Option<String>,
    pub implementation: Option<String>,
    pub elements: Vec<ProcessElement>,
    pub health: Health,
    pub logs: Vec<Activity>,
    pub activated_at_ns: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregatedHealth {
    Up,
    Down { down: usize, total: usize },
}

impl AggregatedHealth {
    pub fn is_up(&self) -> bool {
        matches!(self, AggregatedHealth::Up)
    }

    pub fn message(&self) -> String {
        match self {
            AggregatedHealth::Up => "all connectors are up".to_string(),
            AggregatedHealth::Down { down, total } => {
                format!("{down} of {total} connectors are down")
            }
        }
    }
}

#[derive(Clone)]
pub struct QueryService {
    store: Arc<ExecutableStateStore>,
    activity: Arc<ActivityLog>,
    factory: Arc<dyn ExecutableFactory>,
}

impl QueryService {
    pub fn new(
        store: Arc<ExecutableStateStore>,
        activity: Arc<ActivityLog>,
        factory: Arc<dyn ExecutableFactory>,
    ) -> Self {
        Self {
            store,
            activity,
            factory,
        }
    }

    pub fn query(&self, query: &ExecutableQuery) -> Vec<ExecutableSummary> {
        let mut summaries: Vec<ExecutableSummary> = self
            .store
            .get_all()
            .iter()
            .map(|entry| self.summarize(entry))
            .filter(|summary| matches_query(summary, query))
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub fn get(&self, id: &ExecutableId) -> Option<ExecutableSummary> {
        self.store.get(id).map(|entry| self.summarize(&entry))
    }

    /// Registration name for a trigger type.
    pub fn connector_name(&self, trigger_type: &str) -> Option<String> {
        self.factory.name_of(trigger_type)
    }

    /// Down whenever any stored executable reports Down.
    pub fn aggregate_health(&self) -> AggregatedHealth {
        let entries = self.store.get_all();
        let total = entries.len();
        let down = entries
            .iter()
            .filter(|entry| entry.health().status == HealthStatus::Down)
            .count();
        if down == 0 {
            AggregatedHealth::Up
        } else {
            AggregatedHealth::Down { down, total }
        }
    }

    /// Log the number of stored executables with a per-type breakdown.
    pub fn status_report(&self) -> BTreeMap<String, usize> {
        let entries = self.store.get_all();
        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
        for entry in &entries {
            let ty = entry.trigger_type().unwrap_or_else(|| "unknown".to_string());
            *by_type.entry(ty).or_default() += 1;
        }
        info!("inbound status report - {} executables registered", entries.len());
        for (ty, count) in &by_type {
            info!(". '{ty}' - {count}");
        }
        by_type
    }

    fn summarize(&self, entry: &RegisteredExecutable) -> ExecutableSummary {
        let id = entry.id();
        let elements = entry.elements();
        ExecutableSummary {
            id,
            status: entry.status(),
            trigger_type: entry.trigger_type(),
            tenant_id: elements.first().map(|el| el.tenant_id().to_string()),
            implementation: entry.implementation().map(str::to_string),
            elements: elements.into_iter().map(|el| el.element).collect(),
            health: entry.health(),
            logs: self.activity.recent(&id),
            activated_at_ns: entry.context().and_then(|ctx| ctx.activated_at_ns()),
        }
    }
}

fn matches_query(summary: &ExecutableSummary, query: &ExecutableQuery) -> bool {
    let Some(first) = summary.elements.first() else {
        return false;
    };
    if let Some(ty) = &query.trigger_type {
        if summary.trigger_type.as_ref() != Some(ty) {
            return false;
        }
    }
    if let Some(tenant) = &query.tenant_id {
        if &first.tenant_id != tenant {
            return false;
        }
    }
    if let Some(process) = &query.bpmn_process_id {
        if &first.bpmn_process_id != process {
            return false;
        }
    }
    if let Some(element_id) = &query.element_id {
        return summary
            .elements
            .iter()
            .any(|element| &element.element_id == element_id);
    }
    true
}
