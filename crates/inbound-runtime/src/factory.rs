use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use inbound_types::DeduplicationScopes;
use serde::{Deserialize, Serialize};

use crate::executable::InboundExecutable;

/// Which context flavour an executable receives, fixed at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Standard,
    /// Can enumerate the live process instances bound to its elements.
    Intermediate,
}

pub type ExecutableConstructor = Arc<dyn Fn() -> Arc<dyn InboundExecutable> + Send + Sync>;

/// One trigger type known to this runtime.
#[derive(Clone)]
pub struct ExecutableRegistration {
    pub trigger_type: String,
    pub name: String,
    pub kind: ContextKind,
    /// Properties that define identity under AUTO deduplication; empty means all.
    pub deduplication_properties: Vec<String>,
    pub implementation: String,
    constructor: ExecutableConstructor,
}

impl ExecutableRegistration {
    pub fn new<F, E>(
        trigger_type: impl Into<String>,
        name: impl Into<String>,
        constructor: F,
    ) -> Self
    where
        F: Fn() -> E + Send + Sync + 'static,
        E: InboundExecutable + 'static,
    {
        Self {
            trigger_type: trigger_type.into(),
            name: name.into(),
            kind: ContextKind::Standard,
            deduplication_properties: Vec::new(),
            implementation: std::any::type_name::<E>().to_string(),
            constructor: Arc::new(move || Arc::new(constructor()) as Arc<dyn InboundExecutable>),
        }
    }

    pub fn intermediate(mut self) -> Self {
        self.kind = ContextKind::Intermediate;
        self
    }

    pub fn with_deduplication_properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deduplication_properties = properties.into_iter().map(Into::into).collect();
        self
    }

    /// Build a fresh, not yet activated instance.
    pub fn instantiate(&self) -> Arc<dyn InboundExecutable> {
        (self.constructor)()
    }
}

impl fmt::Debug for ExecutableRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableRegistration")
            .field("trigger_type", &self.trigger_type)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("deduplication_properties", &self.deduplication_properties)
            .field("implementation", &self.implementation)
            .finish()
    }
}

/// A freshly constructed executable together with its registration metadata.
#[derive(Clone)]
pub struct ResolvedExecutable {
    pub executable: Arc<dyn InboundExecutable>,
    pub kind: ContextKind,
    pub implementation: String,
}

/// Lookup of trigger implementations by declared type. Resolving has no side
/// effects beyond constructing a new instance.
pub trait ExecutableFactory: Send + Sync {
    fn resolve(&self, trigger_type: &str) -> Option<ResolvedExecutable>;

    fn deduplication_scopes(&self) -> DeduplicationScopes;

    /// Human readable name of a registered type.
    fn name_of(&self, trigger_type: &str) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct DefaultExecutableFactory {
    registrations: HashMap<String, ExecutableRegistration>,
}

impl DefaultExecutableFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, registration: ExecutableRegistration) {
        if let Some(previous) = self
            .registrations
            .insert(registration.trigger_type.clone(), registration)
        {
            tracing::warn!(
                trigger_type = %previous.trigger_type,
                "replacing existing executable registration"
            );
        }
    }

    pub fn with(mut self, registration: ExecutableRegistration) -> Self {
        self.register(registration);
        self
    }

    pub fn registrations(&self) -> impl Iterator<Item = &ExecutableRegistration> {
        self.registrations.values()
    }
}

impl ExecutableFactory for DefaultExecutableFactory {
    fn resolve(&self, trigger_type: &str) -> Option<ResolvedExecutable> {
        self.registrations
            .get(trigger_type)
            .map(|registration| ResolvedExecutable {
                executable: registration.instantiate(),
                kind: registration.kind,
                implementation: registration.implementation.clone(),
            })
    }

    fn deduplication_scopes(&self) -> DeduplicationScopes {
        let mut scopes = DeduplicationScopes::new();
        for registration in self.registrations.values() {
            if !registration.deduplication_properties.is_empty() {
                scopes.insert(
                    registration.trigger_type.clone(),
                    registration.deduplication_properties.clone(),
                );
            }
        }
        scopes
    }

    fn name_of(&self, trigger_type: &str) -> Option<String> {
        self.registrations
            .get(trigger_type)
            .map(|registration| registration.name.clone())
    }
}
