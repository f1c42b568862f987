use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::element::RawElement;

/// Reconciliation scope: one process id within one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessScope {
    pub tenant_id: String,
    pub bpmn_process_id: String,
}

impl ProcessScope {
    pub fn new(tenant_id: impl Into<String>, bpmn_process_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            bpmn_process_id: bpmn_process_id.into(),
        }
    }
}

impl fmt::Display for ProcessScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.bpmn_process_id)
    }
}

/// Change notification for the declarations owned by one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeEvent {
    /// Latest known elements for every live definition version of the scope.
    DefinitionsChanged {
        scope: ProcessScope,
        elements_by_definition: BTreeMap<i64, Vec<RawElement>>,
    },
    /// Every definition of the scope is gone.
    DefinitionsRemoved { scope: ProcessScope },
}

impl ScopeEvent {
    pub fn scope(&self) -> &ProcessScope {
        match self {
            ScopeEvent::DefinitionsChanged { scope, .. } => scope,
            ScopeEvent::DefinitionsRemoved { scope } => scope,
        }
    }

    /// Flattened elements in definition-key order.
    pub fn elements(&self) -> Vec<RawElement> {
        match self {
            ScopeEvent::DefinitionsChanged {
                elements_by_definition,
                ..
            } => elements_by_definition.values().flatten().cloned().collect(),
            ScopeEvent::DefinitionsRemoved { .. } => Vec::new(),
        }
    }
}
