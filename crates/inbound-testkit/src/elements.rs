use std::collections::BTreeMap;

use inbound_types::keywords;
use inbound_types::{CorrelationPoint, ProcessElement, ProcessScope, RawElement};

pub const DEFAULT_TENANT: &str = "<default>";
pub const DEFAULT_PROCESS: &str = "order-process";

/// Fluent builder for [`RawElement`] fixtures.
#[derive(Debug, Clone)]
pub struct ElementBuilder {
    properties: BTreeMap<String, String>,
    correlation: CorrelationPoint,
    element: ProcessElement,
}

impl ElementBuilder {
    pub fn new(trigger_type: &str) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(keywords::INBOUND_TYPE.to_string(), trigger_type.to_string());
        Self {
            properties,
            correlation: CorrelationPoint::StartEvent,
            element: ProcessElement::new(DEFAULT_PROCESS, 1, 1, "start", DEFAULT_TENANT),
        }
    }

    pub fn tenant(mut self, tenant_id: &str) -> Self {
        self.element.tenant_id = tenant_id.to_string();
        self
    }

    pub fn process(mut self, bpmn_process_id: &str) -> Self {
        self.element.bpmn_process_id = bpmn_process_id.to_string();
        self
    }

    /// Definition key and version move together in fixtures.
    pub fn version(mut self, version: i32, process_definition_key: i64) -> Self {
        self.element.version = version;
        self.element.process_definition_key = process_definition_key;
        self
    }

    pub fn element_id(mut self, element_id: &str) -> Self {
        self.element.element_id = element_id.to_string();
        self
    }

    pub fn property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    pub fn correlation(mut self, correlation: CorrelationPoint) -> Self {
        self.correlation = correlation;
        self
    }

    pub fn auto_dedup(self) -> Self {
        self.property(keywords::DEDUPLICATION_MODE, "AUTO")
    }

    pub fn manual_dedup(self, deduplication_id: &str) -> Self {
        self.property(keywords::DEDUPLICATION_MODE, "MANUAL")
            .property(keywords::DEDUPLICATION_ID, deduplication_id)
    }

    pub fn build(self) -> RawElement {
        RawElement::new(self.properties, self.correlation, self.element)
    }
}

/// Group elements by owning definition key, as a definitions-changed event carries them.
pub fn by_definition(
    elements: impl IntoIterator<Item = RawElement>,
) -> BTreeMap<i64, Vec<RawElement>> {
    let mut grouped: BTreeMap<i64, Vec<RawElement>> = BTreeMap::new();
    for element in elements {
        grouped
            .entry(element.process_definition_key())
            .or_default()
            .push(element);
    }
    grouped
}

pub fn scope_of(element: &RawElement) -> ProcessScope {
    ProcessScope::new(element.tenant_id(), element.bpmn_process_id())
}
