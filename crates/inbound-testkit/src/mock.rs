use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::anyhow;
use async_trait::async_trait;
use inbound_runtime::{CancellationError, ExecutableRegistration, InboundContext, InboundExecutable};
use inbound_types::Health;
use tokio::time::Instant;

/// What the next `activate` or `deactivate` call does.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Succeed,
    Fail(String),
    /// Never returns; exercises the activation and deactivation timeouts.
    Hang,
    /// Panics with the given message.
    Panic(String),
    /// Succeeds, then immediately asks to be cancelled.
    SucceedThenCancel(CancellationError),
}

#[derive(Default)]
struct RecorderState {
    outcomes: VecDeque<MockOutcome>,
    deactivation_outcomes: VecDeque<MockOutcome>,
    attempts: Vec<Instant>,
    activations: usize,
    deactivation_attempts: usize,
    deactivations: usize,
    contexts: Vec<Arc<InboundContext>>,
}

/// Shared observation point for every [`MockExecutable`] built from one registration.
#[derive(Default)]
pub struct MockRecorder {
    state: Mutex<RecorderState>,
}

impl MockRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue outcomes for upcoming activations; once drained, activations succeed.
    pub fn script(&self, outcomes: impl IntoIterator<Item = MockOutcome>) {
        self.state().outcomes.extend(outcomes);
    }

    /// Queue outcomes for upcoming deactivations; once drained, deactivations succeed.
    pub fn script_deactivation(&self, outcomes: impl IntoIterator<Item = MockOutcome>) {
        self.state().deactivation_outcomes.extend(outcomes);
    }

    /// Number of `activate` calls, successful or not.
    pub fn attempts(&self) -> usize {
        self.state().attempts.len()
    }

    /// Instants at which `activate` was entered.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.state().attempts.clone()
    }

    pub fn activations(&self) -> usize {
        self.state().activations
    }

    /// Successful `deactivate` calls.
    pub fn deactivations(&self) -> usize {
        self.state().deactivations
    }

    /// Number of `deactivate` calls, successful or not.
    pub fn deactivation_attempts(&self) -> usize {
        self.state().deactivation_attempts
    }

    /// Activated minus deactivated.
    pub fn live(&self) -> usize {
        let state = self.state();
        state.activations.saturating_sub(state.deactivations)
    }

    pub fn last_context(&self) -> Option<Arc<InboundContext>> {
        self.state().contexts.last().cloned()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, context: Arc<InboundContext>) -> MockOutcome {
        let mut state = self.state();
        state.attempts.push(Instant::now());
        state.contexts.push(context);
        state.outcomes.pop_front().unwrap_or(MockOutcome::Succeed)
    }
}

pub struct MockExecutable {
    recorder: Arc<MockRecorder>,
}

impl MockExecutable {
    pub fn new(recorder: Arc<MockRecorder>) -> Self {
        Self { recorder }
    }
}

#[async_trait]
impl InboundExecutable for MockExecutable {
    async fn activate(&self, context: Arc<InboundContext>) -> anyhow::Result<()> {
        match self.recorder.begin(context.clone()) {
            MockOutcome::Succeed => {
                self.recorder.state().activations += 1;
                context.report_health(Health::up());
                Ok(())
            }
            MockOutcome::Fail(message) => Err(anyhow!(message)),
            MockOutcome::Hang => std::future::pending().await,
            MockOutcome::Panic(message) => panic!("{message}"),
            MockOutcome::SucceedThenCancel(error) => {
                self.recorder.state().activations += 1;
                context.report_health(Health::up());
                context.cancel(error);
                Ok(())
            }
        }
    }

    async fn deactivate(&self) -> anyhow::Result<()> {
        let outcome = {
            let mut state = self.recorder.state();
            state.deactivation_attempts += 1;
            state
                .deactivation_outcomes
                .pop_front()
                .unwrap_or(MockOutcome::Succeed)
        };
        match outcome {
            MockOutcome::Succeed | MockOutcome::SucceedThenCancel(_) => {
                self.recorder.state().deactivations += 1;
                Ok(())
            }
            MockOutcome::Fail(message) => Err(anyhow!(message)),
            MockOutcome::Hang => std::future::pending().await,
            MockOutcome::Panic(message) => panic!("{message}"),
        }
    }
}

/// Registration whose executables all report to `recorder`.
pub fn mock_registration(
    trigger_type: &str,
    recorder: Arc<MockRecorder>,
) -> ExecutableRegistration {
    ExecutableRegistration::new(trigger_type, format!("Mock {trigger_type}"), move || {
        MockExecutable::new(recorder.clone())
    })
}
