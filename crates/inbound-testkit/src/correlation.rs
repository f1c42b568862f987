use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use inbound_runtime::{CorrelationHandler, CorrelationResult};
use inbound_types::ValidDeclaration;

/// One payload as it reached the correlation handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Correlated {
    pub deduplication_id: String,
    /// Element ids of the declaration bound at correlation time.
    pub element_ids: Vec<String>,
    pub payload: serde_json::Value,
}

/// Records every correlated payload and reports success against the first bound element.
#[derive(Debug, Default)]
pub struct RecordingCorrelation {
    received: Mutex<Vec<Correlated>>,
}

impl RecordingCorrelation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads in arrival order.
    pub fn received(&self) -> Vec<Correlated> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl CorrelationHandler for RecordingCorrelation {
    async fn correlate(
        &self,
        declaration: &ValidDeclaration,
        payload: serde_json::Value,
    ) -> anyhow::Result<CorrelationResult> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Correlated {
                deduplication_id: declaration.deduplication_id.clone(),
                element_ids: declaration
                    .elements
                    .iter()
                    .map(|element| element.element_id().to_string())
                    .collect(),
                payload,
            });
        Ok(match declaration.elements.first() {
            Some(element) => CorrelationResult::Success {
                element_id: element.element_id().to_string(),
                process_instance_key: None,
            },
            None => CorrelationResult::NoMatch,
        })
    }
}
