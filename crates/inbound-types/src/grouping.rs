use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::{debug, error};

use crate::declaration::Declaration;
use crate::element::RawElement;

/// Identity-relevant property keys per trigger type, used by AUTO deduplication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeduplicationScopes {
    scopes: HashMap<String, Vec<String>>,
}

impl DeduplicationScopes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, trigger_type: impl Into<String>, properties: Vec<String>) {
        self.scopes.insert(trigger_type.into(), properties);
    }

    pub fn with(mut self, trigger_type: impl Into<String>, properties: Vec<String>) -> Self {
        self.insert(trigger_type, properties);
        self
    }

    /// Scoped keys for `trigger_type`; empty when the type declared none.
    pub fn for_type(&self, trigger_type: &str) -> &[String] {
        self.scopes
            .get(trigger_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Partition raw elements into declarations sharing one deduplication identity.
///
/// Elements whose deduplication string cannot be computed are logged and
/// excluded; the rest of the input is still grouped. Output order follows the
/// first appearance of each identity in `elements`.
pub fn group_elements(elements: &[RawElement], scopes: &DeduplicationScopes) -> Vec<Declaration> {
    let mut buckets: IndexMap<String, Vec<RawElement>> = IndexMap::new();
    for element in elements {
        let scoped = element
            .trigger_type()
            .map(|ty| scopes.for_type(ty))
            .unwrap_or(&[]);
        match element.deduplication_id(scoped) {
            Ok(dedup_id) => buckets.entry(dedup_id).or_default().push(element.clone()),
            Err(err) => {
                error!(
                    element_id = %element.element_id(),
                    bpmn_process_id = %element.bpmn_process_id(),
                    process_definition_key = element.process_definition_key(),
                    "failed to compute deduplication id, element excluded: {err}"
                );
            }
        }
    }

    let declarations: Vec<Declaration> = buckets
        .into_iter()
        .map(|(dedup_id, members)| Declaration::of(dedup_id, members))
        .collect();
    debug!(
        elements = elements.len(),
        groups = declarations.len(),
        "grouped inbound elements"
    );
    declarations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{CorrelationPoint, ProcessElement};
    use crate::keywords;

    fn raw(element_id: &str, def_key: i64, props: &[(&str, &str)]) -> RawElement {
        RawElement::new(
            props
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            CorrelationPoint::StartEvent,
            ProcessElement::new("proc", 1, def_key, element_id, "t1"),
        )
    }

    #[test]
    fn identical_auto_elements_form_one_group() {
        let props = [
            (keywords::INBOUND_TYPE, "webhook"),
            (keywords::DEDUPLICATION_MODE, "AUTO"),
            ("path", "/orders"),
        ];
        let groups = group_elements(
            &[raw("a", 1, &props), raw("b", 1, &props)],
            &DeduplicationScopes::new(),
        );
        assert_eq!(groups.len(), 1);
        assert!(groups[0].is_valid());
        assert_eq!(groups[0].elements().len(), 2);
    }

    #[test]
    fn legacy_elements_stay_separate() {
        let props = [(keywords::INBOUND_TYPE, "webhook"), ("path", "/orders")];
        let groups = group_elements(
            &[raw("a", 1, &props), raw("b", 1, &props)],
            &DeduplicationScopes::new(),
        );
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].elements()[0].element_id(), "a");
        assert_eq!(groups[1].elements()[0].element_id(), "b");
    }

    #[test]
    fn malformed_element_is_excluded_not_fatal() {
        let good = raw("good", 1, &[(keywords::INBOUND_TYPE, "webhook")]);
        let bad = raw(
            "bad",
            1,
            &[
                (keywords::INBOUND_TYPE, "webhook"),
                (keywords::DEDUPLICATION_MODE, "MANUAL"),
            ],
        );
        let unknown = raw(
            "unknown",
            1,
            &[
                (keywords::INBOUND_TYPE, "webhook"),
                (keywords::DEDUPLICATION_MODE, "SOMETIMES"),
            ],
        );
        let groups = group_elements(&[bad, good, unknown], &DeduplicationScopes::new());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].elements()[0].element_id(), "good");
    }

    #[test]
    fn manual_group_with_conflicting_types_is_invalid() {
        let a = raw(
            "a",
            1,
            &[
                (keywords::INBOUND_TYPE, "webhook"),
                (keywords::DEDUPLICATION_MODE, "MANUAL"),
                (keywords::DEDUPLICATION_ID, "shared"),
            ],
        );
        let b = raw(
            "b",
            1,
            &[
                (keywords::INBOUND_TYPE, "kafka"),
                (keywords::DEDUPLICATION_MODE, "MANUAL"),
                (keywords::DEDUPLICATION_ID, "shared"),
            ],
        );
        let groups = group_elements(&[a, b], &DeduplicationScopes::new());
        assert_eq!(groups.len(), 1);
        assert!(!groups[0].is_valid());
    }

    #[test]
    fn scoped_properties_are_looked_up_by_type() {
        let scopes = DeduplicationScopes::new().with("webhook", vec!["path".into()]);
        let a = raw(
            "a",
            1,
            &[
                (keywords::INBOUND_TYPE, "webhook"),
                (keywords::DEDUPLICATION_MODE, "AUTO"),
                ("path", "/orders"),
                ("auth", "basic"),
            ],
        );
        let b = raw(
            "b",
            1,
            &[
                (keywords::INBOUND_TYPE, "webhook"),
                (keywords::DEDUPLICATION_MODE, "AUTO"),
                ("path", "/orders"),
                ("auth", "jwt"),
            ],
        );
        let groups = group_elements(&[a, b], &scopes);
        // same identity, but the bags disagree outside the scoped keys
        assert_eq!(groups.len(), 1);
        assert!(!groups[0].is_valid());
        assert_eq!(scopes.for_type("kafka"), &[] as &[String]);
    }
}
