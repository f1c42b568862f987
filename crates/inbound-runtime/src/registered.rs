use std::fmt;
use std::sync::Arc;

use inbound_id::ExecutableId;
use inbound_types::{
    Declaration, Health, InvalidDeclaration, ProcessScope, RawElement, ValidDeclaration,
};
use serde::{Deserialize, Serialize};

use crate::context::{CancellationError, InboundContext};
use crate::executable::InboundExecutable;

/// A live executable and the context it was activated with.
#[derive(Clone)]
pub struct ActivatedExecutable {
    pub executable: Arc<dyn InboundExecutable>,
    pub context: Arc<InboundContext>,
    pub implementation: String,
}

impl fmt::Debug for ActivatedExecutable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivatedExecutable")
            .field("id", &self.context.id())
            .field("implementation", &self.implementation)
            .finish()
    }
}

/// Progress of supervised reactivation for a cancelled executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RestartState {
    NotRequested,
    Pending { remaining: u32 },
    Exhausted,
}

/// Lifecycle state of one identity, as owned by the state store.
#[derive(Debug, Clone)]
pub enum RegisteredExecutable {
    Activated(ActivatedExecutable),
    Cancelled {
        activated: ActivatedExecutable,
        error: CancellationError,
        restart: RestartState,
    },
    FailedToActivate {
        declaration: Declaration,
        reason: String,
    },
    ConnectorNotRegistered {
        declaration: ValidDeclaration,
    },
    InvalidDefinition {
        declaration: InvalidDeclaration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutableStatus {
    Activated,
    Cancelled,
    FailedToActivate,
    ConnectorNotRegistered,
    InvalidDefinition,
}

impl RegisteredExecutable {
    pub fn id(&self) -> ExecutableId {
        match self {
            RegisteredExecutable::Activated(activated)
            | RegisteredExecutable::Cancelled { activated, .. } => activated.context.id(),
            RegisteredExecutable::FailedToActivate { declaration, .. } => declaration.id(),
            RegisteredExecutable::ConnectorNotRegistered { declaration } => declaration.id,
            RegisteredExecutable::InvalidDefinition { declaration } => declaration.id,
        }
    }

    pub fn status(&self) -> ExecutableStatus {
        match self {
            RegisteredExecutable::Activated(_) => ExecutableStatus::Activated,
            RegisteredExecutable::Cancelled { .. } => ExecutableStatus::Cancelled,
            RegisteredExecutable::FailedToActivate { .. } => ExecutableStatus::FailedToActivate,
            RegisteredExecutable::ConnectorNotRegistered { .. } => {
                ExecutableStatus::ConnectorNotRegistered
            }
            RegisteredExecutable::InvalidDefinition { .. } => ExecutableStatus::InvalidDefinition,
        }
    }

    /// Owning elements; for live executables this reflects the latest hot swap.
    pub fn elements(&self) -> Vec<RawElement> {
        match self {
            RegisteredExecutable::Activated(activated)
            | RegisteredExecutable::Cancelled { activated, .. } => {
                activated.context.declaration().elements.clone()
            }
            RegisteredExecutable::FailedToActivate { declaration, .. } => {
                declaration.elements().to_vec()
            }
            RegisteredExecutable::ConnectorNotRegistered { declaration } => {
                declaration.elements.clone()
            }
            RegisteredExecutable::InvalidDefinition { declaration } => declaration.elements.clone(),
        }
    }

    pub fn trigger_type(&self) -> Option<String> {
        match self {
            RegisteredExecutable::Activated(activated)
            | RegisteredExecutable::Cancelled { activated, .. } => {
                Some(activated.context.declaration().trigger_type.clone())
            }
            RegisteredExecutable::FailedToActivate { declaration, .. } => {
                declaration.trigger_type().map(str::to_string)
            }
            RegisteredExecutable::ConnectorNotRegistered { declaration } => {
                Some(declaration.trigger_type.clone())
            }
            RegisteredExecutable::InvalidDefinition { declaration } => declaration
                .elements
                .first()
                .and_then(RawElement::trigger_type)
                .map(str::to_string),
        }
    }

    pub fn scope(&self) -> Option<ProcessScope> {
        self.elements()
            .first()
            .map(|el| ProcessScope::new(el.tenant_id(), el.bpmn_process_id()))
    }

    pub fn implementation(&self) -> Option<&str> {
        match self {
            RegisteredExecutable::Activated(activated)
            | RegisteredExecutable::Cancelled { activated, .. } => Some(&activated.implementation),
            RegisteredExecutable::FailedToActivate { .. }
            | RegisteredExecutable::ConnectorNotRegistered { .. }
            | RegisteredExecutable::InvalidDefinition { .. } => None,
        }
    }

    pub fn context(&self) -> Option<&Arc<InboundContext>> {
        match self {
            RegisteredExecutable::Activated(activated)
            | RegisteredExecutable::Cancelled { activated, .. } => Some(&activated.context),
            RegisteredExecutable::FailedToActivate { .. }
            | RegisteredExecutable::ConnectorNotRegistered { .. }
            | RegisteredExecutable::InvalidDefinition { .. } => None,
        }
    }

    pub fn as_activated(&self) -> Option<&ActivatedExecutable> {
        match self {
            RegisteredExecutable::Activated(activated) => Some(activated),
            _ => None,
        }
    }

    /// Health as seen by queries and aggregation.
    pub fn health(&self) -> Health {
        match self {
            RegisteredExecutable::Activated(activated) => activated.context.health(),
            RegisteredExecutable::Cancelled { error, restart, .. } => match restart {
                RestartState::NotRequested => Health::down(error.message.clone()),
                RestartState::Pending { remaining } => Health::down(error.message.clone())
                    .with_detail("restartAttemptsRemaining", (*remaining).into()),
                RestartState::Exhausted => {
                    Health::down(format!("restart retries exhausted: {}", error.message))
                }
            },
            RegisteredExecutable::FailedToActivate { reason, .. } => Health::down(reason.clone()),
            RegisteredExecutable::ConnectorNotRegistered { declaration } => Health::down(format!(
                "Connector {} not registered",
                declaration.trigger_type
            )),
            RegisteredExecutable::InvalidDefinition { declaration } => Health::down(format!(
                "Invalid connector definition: {}",
                declaration.error
            )),
        }
    }
}
