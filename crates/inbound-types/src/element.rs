use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::keywords::{self, DeduplicationMode};
use crate::DeclarationError;

/// Reference to the process definition element that declared a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessElement {
    pub bpmn_process_id: String,
    pub version: i32,
    pub process_definition_key: i64,
    pub element_id: String,
    pub tenant_id: String,
}

impl ProcessElement {
    pub fn new(
        bpmn_process_id: impl Into<String>,
        version: i32,
        process_definition_key: i64,
        element_id: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            bpmn_process_id: bpmn_process_id.into(),
            version,
            process_definition_key,
            element_id: element_id.into(),
            tenant_id: tenant_id.into(),
        }
    }
}

/// How an inbound event is matched back to the element that declared the trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CorrelationPoint {
    /// Plain start event: every inbound event creates a new instance.
    StartEvent,
    /// Message start event, optionally deduplicated by message id.
    MessageStartEvent { message_name: String },
    /// Intermediate catch event or receive task waiting on a correlated message.
    Message {
        message_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_key_expression: Option<String>,
    },
    /// Message boundary event attached to an activity.
    BoundaryEvent {
        message_name: String,
        attached_to: String,
    },
}

impl CorrelationPoint {
    pub fn kind(&self) -> &'static str {
        match self {
            CorrelationPoint::StartEvent => "start_event",
            CorrelationPoint::MessageStartEvent { .. } => "message_start_event",
            CorrelationPoint::Message { .. } => "message",
            CorrelationPoint::BoundaryEvent { .. } => "boundary_event",
        }
    }
}

/// One declared trigger occurrence, as received from the workflow engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawElement {
    pub properties: BTreeMap<String, String>,
    pub correlation: CorrelationPoint,
    pub element: ProcessElement,
}

impl RawElement {
    pub fn new(
        properties: BTreeMap<String, String>,
        correlation: CorrelationPoint,
        element: ProcessElement,
    ) -> Self {
        Self {
            properties,
            correlation,
            element,
        }
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Declared trigger type (`inbound.type`).
    pub fn trigger_type(&self) -> Option<&str> {
        self.property(keywords::INBOUND_TYPE)
    }

    pub fn tenant_id(&self) -> &str {
        &self.element.tenant_id
    }

    pub fn bpmn_process_id(&self) -> &str {
        &self.element.bpmn_process_id
    }

    pub fn element_id(&self) -> &str {
        &self.element.element_id
    }

    pub fn process_definition_key(&self) -> i64 {
        self.element.process_definition_key
    }

    pub fn deduplication_mode(&self) -> Result<DeduplicationMode, DeclarationError> {
        DeduplicationMode::from_property(self.property(keywords::DEDUPLICATION_MODE))
    }

    /// The non-reserved property bag used for deduplication and group validation.
    pub fn properties_without_keywords(&self) -> BTreeMap<String, String> {
        self.properties
            .iter()
            .filter(|(key, _)| !keywords::is_reserved(key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Properties handed to the executable: everything except runtime keys.
    pub fn executable_properties(&self) -> BTreeMap<String, String> {
        self.properties
            .iter()
            .filter(|(key, _)| !keywords::is_runtime_property(key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Compute the deduplication string for this element.
    ///
    /// `scoped_properties` are the keys the trigger type declared as
    /// identity-relevant; an empty slice means "all non-reserved properties".
    /// Pure: consults nothing but the element itself.
    pub fn deduplication_id(
        &self,
        scoped_properties: &[String],
    ) -> Result<String, DeclarationError> {
        match self.deduplication_mode()? {
            DeduplicationMode::Legacy => Ok(format!(
                "{}-{}-{}",
                self.element.tenant_id, self.element.process_definition_key, self.element.element_id
            )),
            DeduplicationMode::Auto => {
                let hashed = self.auto_deduplication_properties(scoped_properties);
                if hashed.is_empty() {
                    return Err(DeclarationError::MissingDeduplicationProperties {
                        element_id: self.element.element_id.clone(),
                    });
                }
                let digest = inbound_id::canonical_digest_hex(&hashed)
                    .map_err(|err| DeclarationError::Encoding(err.to_string()))?;
                Ok(format!(
                    "{}-{}-{}",
                    self.element.tenant_id, self.element.bpmn_process_id, digest
                ))
            }
            DeduplicationMode::Manual => {
                let id = self
                    .property(keywords::DEDUPLICATION_ID)
                    .filter(|id| !id.trim().is_empty())
                    .ok_or_else(|| DeclarationError::MissingDeduplicationId {
                        element_id: self.element.element_id.clone(),
                    })?;
                Ok(format!(
                    "{}-{}-{}",
                    self.element.tenant_id, self.element.bpmn_process_id, id
                ))
            }
        }
    }

    fn auto_deduplication_properties(
        &self,
        scoped_properties: &[String],
    ) -> BTreeMap<String, String> {
        if scoped_properties.is_empty() {
            return self.properties_without_keywords();
        }
        scoped_properties
            .iter()
            .filter_map(|key| self.properties.get(key).map(|v| (key.clone(), v.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(props: &[(&str, &str)]) -> RawElement {
        RawElement::new(
            props
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            CorrelationPoint::StartEvent,
            ProcessElement::new("order-process", 3, 42, "start", "t1"),
        )
    }

    #[test]
    fn legacy_mode_is_unique_per_element() {
        let el = element(&[(keywords::INBOUND_TYPE, "webhook")]);
        assert_eq!(el.deduplication_id(&[]).unwrap(), "t1-42-start");
    }

    #[test]
    fn auto_mode_is_deterministic_and_ignores_reserved_keys() {
        let a = element(&[
            (keywords::INBOUND_TYPE, "webhook"),
            (keywords::DEDUPLICATION_MODE, "AUTO"),
            ("path", "/orders"),
            (keywords::RESULT_VARIABLE, "a"),
        ]);
        let mut b = a.clone();
        b.properties
            .insert(keywords::RESULT_VARIABLE.into(), "b".into());
        b.element.element_id = "other".into();
        b.element.process_definition_key = 43;

        let id_a = a.deduplication_id(&[]).unwrap();
        assert_eq!(id_a, a.deduplication_id(&[]).unwrap());
        assert_eq!(id_a, b.deduplication_id(&[]).unwrap());
        assert!(id_a.starts_with("t1-order-process-"));

        let mut c = a.clone();
        c.properties.insert("path".into(), "/invoices".into());
        assert_ne!(id_a, c.deduplication_id(&[]).unwrap());
    }

    #[test]
    fn auto_mode_honours_scoped_properties() {
        let a = element(&[
            (keywords::DEDUPLICATION_MODE, "AUTO"),
            ("path", "/orders"),
            ("secret", "x"),
        ]);
        let mut b = a.clone();
        b.properties.insert("secret".into(), "y".into());
        let scoped = vec!["path".to_string()];
        assert_eq!(
            a.deduplication_id(&scoped).unwrap(),
            b.deduplication_id(&scoped).unwrap()
        );
        assert_ne!(a.deduplication_id(&[]).unwrap(), b.deduplication_id(&[]).unwrap());
    }

    #[test]
    fn auto_mode_without_properties_is_invalid() {
        let el = element(&[
            (keywords::INBOUND_TYPE, "webhook"),
            (keywords::DEDUPLICATION_MODE, "AUTO"),
        ]);
        assert!(matches!(
            el.deduplication_id(&[]),
            Err(DeclarationError::MissingDeduplicationProperties { .. })
        ));
        let scoped = vec!["absent".to_string()];
        assert!(el.deduplication_id(&scoped).is_err());
    }

    #[test]
    fn manual_mode_requires_id() {
        let missing = element(&[(keywords::DEDUPLICATION_MODE, "MANUAL")]);
        assert!(matches!(
            missing.deduplication_id(&[]),
            Err(DeclarationError::MissingDeduplicationId { .. })
        ));

        let present = element(&[
            (keywords::DEDUPLICATION_MODE, "MANUAL"),
            (keywords::DEDUPLICATION_ID, "shared"),
        ]);
        assert_eq!(
            present.deduplication_id(&[]).unwrap(),
            "t1-order-process-shared"
        );
    }

    #[test]
    fn executable_properties_drop_runtime_keys_only() {
        let el = element(&[
            (keywords::INBOUND_TYPE, "webhook"),
            (keywords::MESSAGE_TTL, "PT1S"),
            (keywords::RESULT_VARIABLE, "out"),
            ("path", "/orders"),
        ]);
        let props = el.executable_properties();
        assert!(!props.contains_key(keywords::INBOUND_TYPE));
        assert!(!props.contains_key(keywords::MESSAGE_TTL));
        assert_eq!(props.get(keywords::RESULT_VARIABLE).map(String::as_str), Some("out"));
        assert_eq!(props.get("path").map(String::as_str), Some("/orders"));
    }
}
