//! Runtime context handed to an executable on activation.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use inbound_id::ExecutableId;
use inbound_types::{Activity, Health, ProcessElement, ProcessScope, ValidDeclaration};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::activity::ActivityLog;
use crate::error::RuntimeError;
use crate::factory::ContextKind;

static SECRET_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*secrets\.([A-Za-z0-9_.\-]+)\s*\}\}").expect("secret placeholder pattern")
});

static NEXT_CONTEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Restart hint attached to a cancellation: retry `retries` times, `delay` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartHint {
    pub delay: Duration,
    pub retries: u32,
}

/// Raised by a running executable that can no longer operate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CancellationError {
    pub message: String,
    pub restart: Option<RestartHint>,
}

impl CancellationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            restart: None,
        }
    }

    pub fn with_restart(mut self, delay: Duration, retries: u32) -> Self {
        self.restart = Some(RestartHint { delay, retries });
        self
    }
}

/// A cancellation on its way to the owning scope's queue.
#[derive(Debug, Clone)]
pub struct CancellationRequest {
    pub scope: ProcessScope,
    pub id: ExecutableId,
    /// Instance number of the context that raised it; stale requests are dropped.
    pub context_instance: u64,
    pub error: CancellationError,
}

pub type CancellationHandler = Arc<dyn Fn(CancellationRequest) + Send + Sync>;

pub trait SecretProvider: Send + Sync {
    fn get_secret(&self, name: &str) -> Option<String>;
}

/// Reads `{prefix}{NAME}` from the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretProvider {
    prefix: String,
}

impl EnvSecretProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl SecretProvider for EnvSecretProvider {
    fn get_secret(&self, name: &str) -> Option<String> {
        std::env::var(format!("{}{}", self.prefix, name)).ok()
    }
}

impl SecretProvider for HashMap<String, String> {
    fn get_secret(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Replace every `{{secrets.NAME}}` placeholder in `properties`.
pub fn resolve_secrets(
    properties: &BTreeMap<String, String>,
    secrets: &dyn SecretProvider,
) -> Result<BTreeMap<String, String>, RuntimeError> {
    let mut resolved = BTreeMap::new();
    for (key, value) in properties {
        let mut missing = None;
        let replaced = SECRET_PLACEHOLDER.replace_all(value, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            secrets.get_secret(name).unwrap_or_else(|| {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            })
        });
        if let Some(name) = missing {
            return Err(RuntimeError::MissingSecret(name));
        }
        resolved.insert(key.clone(), replaced.into_owned());
    }
    Ok(resolved)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CorrelationResult {
    Success {
        element_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        process_instance_key: Option<i64>,
    },
    /// Activation condition or correlation key did not match; the event is dropped.
    NoMatch,
    Failure { message: String },
}

/// Delivers an inbound payload to the workflow engine.
#[async_trait]
pub trait CorrelationHandler: Send + Sync {
    async fn correlate(
        &self,
        declaration: &ValidDeclaration,
        payload: serde_json::Value,
    ) -> anyhow::Result<CorrelationResult>;
}

/// Used when no engine client is configured.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredCorrelation;

#[async_trait]
impl CorrelationHandler for UnconfiguredCorrelation {
    async fn correlate(
        &self,
        _declaration: &ValidDeclaration,
        _payload: serde_json::Value,
    ) -> anyhow::Result<CorrelationResult> {
        Ok(CorrelationResult::Failure {
            message: "no correlation handler configured".into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInstance {
    pub process_instance_key: i64,
    pub element_id: String,
    #[serde(default)]
    pub variables: serde_json::Value,
}

/// Looks up live process instances waiting on an element.
#[async_trait]
pub trait ProcessInstanceClient: Send + Sync {
    async fn active_instances(
        &self,
        element: &ProcessElement,
    ) -> anyhow::Result<Vec<ProcessInstance>>;
}

/// Collaborators shared by every context this runtime creates.
#[derive(Clone)]
pub struct ContextServices {
    pub correlation: Arc<dyn CorrelationHandler>,
    pub secrets: Arc<dyn SecretProvider>,
    pub process_instances: Option<Arc<dyn ProcessInstanceClient>>,
}

impl Default for ContextServices {
    fn default() -> Self {
        Self {
            correlation: Arc::new(UnconfiguredCorrelation),
            secrets: Arc::new(EnvSecretProvider::default()),
            process_instances: None,
        }
    }
}

pub struct InboundContext {
    id: ExecutableId,
    instance: u64,
    kind: ContextKind,
    declaration: RwLock<Arc<ValidDeclaration>>,
    properties: BTreeMap<String, String>,
    health: RwLock<Health>,
    activated_at_ns: AtomicU64,
    activity: Arc<ActivityLog>,
    on_cancel: CancellationHandler,
    services: ContextServices,
}

impl InboundContext {
    /// Build a context for `declaration`, resolving secrets in its properties.
    pub fn new(
        declaration: ValidDeclaration,
        kind: ContextKind,
        services: ContextServices,
        activity: Arc<ActivityLog>,
        on_cancel: CancellationHandler,
    ) -> Result<Self, RuntimeError> {
        let properties = resolve_secrets(
            &declaration.executable_properties(),
            services.secrets.as_ref(),
        )?;
        Ok(Self {
            id: declaration.id,
            instance: NEXT_CONTEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            kind,
            declaration: RwLock::new(Arc::new(declaration)),
            properties,
            health: RwLock::new(Health::unknown()),
            activated_at_ns: AtomicU64::new(0),
            activity,
            on_cancel,
            services,
        })
    }

    pub fn id(&self) -> ExecutableId {
        self.id
    }

    /// Process-unique number distinguishing this context from earlier ones with the same id.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// Current bound declaration. Changes when the element set is hot-swapped.
    pub fn declaration(&self) -> Arc<ValidDeclaration> {
        self.declaration
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn replace_declaration(&self, declaration: ValidDeclaration) {
        *self
            .declaration
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(declaration);
    }

    /// Declared properties with runtime keys removed and secrets resolved.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Deserialize the resolved properties into a typed configuration.
    pub fn bind_properties<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        let value = serde_json::to_value(&self.properties)?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn correlate(&self, payload: serde_json::Value) -> anyhow::Result<CorrelationResult> {
        let declaration = self.declaration();
        self.services.correlation.correlate(&declaration, payload).await
    }

    pub fn report_health(&self, health: Health) {
        *self.health.write().unwrap_or_else(PoisonError::into_inner) = health;
    }

    pub fn health(&self) -> Health {
        self.health
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn log(&self, activity: Activity) {
        self.activity.push(self.id, activity);
    }

    pub fn activities(&self) -> Vec<Activity> {
        self.activity.recent(&self.id)
    }

    /// Ask the runtime to cancel this executable; optionally with a restart hint.
    pub fn cancel(&self, error: CancellationError) {
        let declaration = self.declaration();
        (self.on_cancel)(CancellationRequest {
            scope: declaration.scope(),
            id: self.id,
            context_instance: self.instance,
            error,
        });
    }

    pub fn activated_at_ns(&self) -> Option<u64> {
        match self.activated_at_ns.load(Ordering::Acquire) {
            0 => None,
            ns => Some(ns),
        }
    }

    pub(crate) fn mark_activated(&self) {
        self.activated_at_ns
            .store(inbound_types::now_wallclock_ns(), Ordering::Release);
    }

    /// Live process instances waiting on the bound elements.
    pub async fn process_instances(&self) -> anyhow::Result<Vec<ProcessInstance>> {
        if self.kind != ContextKind::Intermediate {
            return Err(anyhow!(
                "process instances are only available to intermediate executables"
            ));
        }
        let client = self
            .services
            .process_instances
            .as_ref()
            .ok_or_else(|| anyhow!("no process instance client configured"))?;
        let declaration = self.declaration();
        let mut instances = Vec::new();
        for element in &declaration.elements {
            instances.extend(client.active_instances(&element.element).await?);
        }
        Ok(instances)
    }
}

impl fmt::Debug for InboundContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundContext")
            .field("id", &self.id)
            .field("instance", &self.instance)
            .field("kind", &self.kind)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn secrets_are_substituted_in_place() {
        let mut props = BTreeMap::new();
        props.insert("token".to_string(), "Bearer {{secrets.API_TOKEN}}".to_string());
        props.insert("url".to_string(), "https://{{ secrets.HOST }}/hook".to_string());
        props.insert("plain".to_string(), "value".to_string());
        let resolved =
            resolve_secrets(&props, &secrets(&[("API_TOKEN", "abc"), ("HOST", "example.org")]))
                .unwrap();
        assert_eq!(resolved["token"], "Bearer abc");
        assert_eq!(resolved["url"], "https://example.org/hook");
        assert_eq!(resolved["plain"], "value");
    }

    #[test]
    fn missing_secret_is_an_error() {
        let mut props = BTreeMap::new();
        props.insert("token".to_string(), "{{secrets.NOPE}}".to_string());
        let err = resolve_secrets(&props, &secrets(&[])).unwrap_err();
        assert!(matches!(err, RuntimeError::MissingSecret(name) if name == "NOPE"));
    }

    #[test]
    fn cancellation_error_carries_restart_hint() {
        let err = CancellationError::new("broker gone").with_restart(Duration::from_secs(5), 2);
        assert_eq!(err.to_string(), "broker gone");
        assert_eq!(
            err.restart,
            Some(RestartHint {
                delay: Duration::from_secs(5),
                retries: 2
            })
        );
    }
}
