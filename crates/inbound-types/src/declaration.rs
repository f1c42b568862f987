use inbound_id::ExecutableId;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::element::RawElement;
use crate::event::ProcessScope;
use crate::keywords::DeduplicationMode;

/// Static inconsistency in declared trigger data. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeclarationError {
    #[error("element '{element_id}' has no inbound.type property")]
    MissingType { element_id: String },
    #[error("unknown deduplication mode '{0}'")]
    UnknownDeduplicationMode(String),
    #[error("element '{element_id}' uses MANUAL deduplication but has no deduplicationId")]
    MissingDeduplicationId { element_id: String },
    #[error("element '{element_id}' uses AUTO deduplication but has no properties to deduplicate on")]
    MissingDeduplicationProperties { element_id: String },
    #[error("All elements in a group must have the same type")]
    TypeMismatch,
    #[error("All elements in a group must have the same tenant")]
    TenantMismatch,
    #[error("All elements in a group must have the same properties (excluding runtime-level properties)")]
    PropertyMismatch,
    #[error("a declaration group must contain at least one element")]
    EmptyGroup,
    #[error("failed to encode deduplication properties: {0}")]
    Encoding(String),
}

/// A group of raw elements sharing one deduplication identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    Valid(ValidDeclaration),
    Invalid(InvalidDeclaration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidDeclaration {
    pub id: ExecutableId,
    pub deduplication_id: String,
    pub deduplication_mode: DeduplicationMode,
    pub trigger_type: String,
    pub tenant_id: String,
    pub bpmn_process_id: String,
    /// Non-reserved property bag shared by every member.
    pub properties: BTreeMap<String, String>,
    pub elements: Vec<RawElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidDeclaration {
    pub id: ExecutableId,
    pub deduplication_id: String,
    pub elements: Vec<RawElement>,
    pub error: DeclarationError,
}

impl Declaration {
    /// Validate a bucket of elements that share `deduplication_id`.
    ///
    /// Violations turn the whole bucket into [`Declaration::Invalid`].
    pub fn of(deduplication_id: impl Into<String>, elements: Vec<RawElement>) -> Self {
        let deduplication_id = deduplication_id.into();
        let id = ExecutableId::from_dedup_id(&deduplication_id);
        match ValidDeclaration::validate(&elements) {
            Ok((trigger_type, deduplication_mode, properties)) => {
                let first = &elements[0];
                Declaration::Valid(ValidDeclaration {
                    id,
                    deduplication_id,
                    deduplication_mode,
                    trigger_type,
                    tenant_id: first.tenant_id().to_string(),
                    bpmn_process_id: first.bpmn_process_id().to_string(),
                    properties,
                    elements,
                })
            }
            Err(error) => Declaration::Invalid(InvalidDeclaration {
                id,
                deduplication_id,
                elements,
                error,
            }),
        }
    }

    pub fn id(&self) -> ExecutableId {
        match self {
            Declaration::Valid(valid) => valid.id,
            Declaration::Invalid(invalid) => invalid.id,
        }
    }

    pub fn deduplication_id(&self) -> &str {
        match self {
            Declaration::Valid(valid) => &valid.deduplication_id,
            Declaration::Invalid(invalid) => &invalid.deduplication_id,
        }
    }

    pub fn elements(&self) -> &[RawElement] {
        match self {
            Declaration::Valid(valid) => &valid.elements,
            Declaration::Invalid(invalid) => &invalid.elements,
        }
    }

    /// Type of the first member; an invalid group may disagree internally.
    pub fn trigger_type(&self) -> Option<&str> {
        match self {
            Declaration::Valid(valid) => Some(&valid.trigger_type),
            Declaration::Invalid(invalid) => {
                invalid.elements.first().and_then(RawElement::trigger_type)
            }
        }
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.elements().first().map(RawElement::tenant_id)
    }

    /// Scope of the first member. Deduplication ids are namespaced by scope,
    /// so every member of a group shares it.
    pub fn scope(&self) -> Option<ProcessScope> {
        self.elements()
            .first()
            .map(|el| ProcessScope::new(el.tenant_id(), el.bpmn_process_id()))
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Declaration::Valid(_))
    }

    pub fn as_valid(&self) -> Option<&ValidDeclaration> {
        match self {
            Declaration::Valid(valid) => Some(valid),
            Declaration::Invalid(_) => None,
        }
    }

    /// Comma separated element ids, as used in batch failure reasons.
    pub fn element_ids(&self) -> String {
        self.elements()
            .iter()
            .map(RawElement::element_id)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl ValidDeclaration {
    fn validate(
        elements: &[RawElement],
    ) -> Result<(String, DeduplicationMode, BTreeMap<String, String>), DeclarationError> {
        let first = elements.first().ok_or(DeclarationError::EmptyGroup)?;
        let trigger_type = first
            .trigger_type()
            .ok_or_else(|| DeclarationError::MissingType {
                element_id: first.element_id().to_string(),
            })?;
        let mode = first.deduplication_mode()?;
        let properties = first.properties_without_keywords();

        for element in &elements[1..] {
            if element.trigger_type() != Some(trigger_type) {
                return Err(DeclarationError::TypeMismatch);
            }
            if element.tenant_id() != first.tenant_id() {
                return Err(DeclarationError::TenantMismatch);
            }
            if element.properties_without_keywords() != properties {
                return Err(DeclarationError::PropertyMismatch);
            }
        }
        Ok((trigger_type.to_string(), mode, properties))
    }

    pub fn scope(&self) -> ProcessScope {
        ProcessScope::new(&self.tenant_id, &self.bpmn_process_id)
    }

    /// Properties handed to the executable (runtime keys removed).
    pub fn executable_properties(&self) -> BTreeMap<String, String> {
        self.elements
            .first()
            .map(RawElement::executable_properties)
            .unwrap_or_default()
    }

    /// Distinct owning process-definition keys across all members.
    pub fn process_definition_keys(&self) -> BTreeSet<i64> {
        self.elements
            .iter()
            .map(RawElement::process_definition_key)
            .collect()
    }

    /// Identity-relevant projection compared before membership when planning updates.
    pub fn fingerprint(&self) -> DeclarationFingerprint<'_> {
        DeclarationFingerprint {
            trigger_type: &self.trigger_type,
            tenant_id: &self.tenant_id,
            deduplication_id: &self.deduplication_id,
            properties: &self.properties,
        }
    }
}

/// Borrowed view of the fields that make a declaration "the same trigger".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeclarationFingerprint<'a> {
    pub trigger_type: &'a str,
    pub tenant_id: &'a str,
    pub deduplication_id: &'a str,
    pub properties: &'a BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{CorrelationPoint, ProcessElement};
    use crate::keywords;

    fn raw(element_id: &str, tenant: &str, def_key: i64, props: &[(&str, &str)]) -> RawElement {
        RawElement::new(
            props
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            CorrelationPoint::StartEvent,
            ProcessElement::new("proc", 1, def_key, element_id, tenant),
        )
    }

    #[test]
    fn consistent_group_is_valid() {
        let a = raw("a", "t1", 1, &[(keywords::INBOUND_TYPE, "webhook"), ("path", "/x")]);
        let b = raw(
            "b",
            "t1",
            2,
            &[
                (keywords::INBOUND_TYPE, "webhook"),
                ("path", "/x"),
                (keywords::RESULT_VARIABLE, "r"),
            ],
        );
        let decl = Declaration::of("t1-proc-x", vec![a, b]);
        let valid = decl.as_valid().expect("valid");
        assert_eq!(valid.trigger_type, "webhook");
        assert_eq!(valid.process_definition_keys().len(), 2);
        assert_eq!(decl.id(), ExecutableId::from_dedup_id("t1-proc-x"));
        assert_eq!(decl.element_ids(), "a, b");
    }

    #[test]
    fn mixed_types_are_invalid() {
        let a = raw("a", "t1", 1, &[(keywords::INBOUND_TYPE, "webhook")]);
        let b = raw("b", "t1", 1, &[(keywords::INBOUND_TYPE, "kafka")]);
        let Declaration::Invalid(invalid) = Declaration::of("x", vec![a, b]) else {
            panic!("expected invalid declaration");
        };
        assert_eq!(invalid.error, DeclarationError::TypeMismatch);
        assert_eq!(
            invalid.error.to_string(),
            "All elements in a group must have the same type"
        );
    }

    #[test]
    fn mixed_tenants_and_properties_are_invalid() {
        let a = raw("a", "t1", 1, &[(keywords::INBOUND_TYPE, "webhook"), ("p", "1")]);
        let b = raw("b", "t2", 1, &[(keywords::INBOUND_TYPE, "webhook"), ("p", "1")]);
        let c = raw("c", "t1", 1, &[(keywords::INBOUND_TYPE, "webhook"), ("p", "2")]);
        assert!(matches!(
            Declaration::of("x", vec![a.clone(), b]),
            Declaration::Invalid(InvalidDeclaration {
                error: DeclarationError::TenantMismatch,
                ..
            })
        ));
        assert!(matches!(
            Declaration::of("x", vec![a, c]),
            Declaration::Invalid(InvalidDeclaration {
                error: DeclarationError::PropertyMismatch,
                ..
            })
        ));
    }

    #[test]
    fn missing_type_and_empty_group() {
        let a = raw("a", "t1", 1, &[("p", "1")]);
        assert!(matches!(
            Declaration::of("x", vec![a]),
            Declaration::Invalid(InvalidDeclaration {
                error: DeclarationError::MissingType { .. },
                ..
            })
        ));
        assert!(matches!(
            Declaration::of("x", vec![]),
            Declaration::Invalid(InvalidDeclaration {
                error: DeclarationError::EmptyGroup,
                ..
            })
        ));
    }
}
