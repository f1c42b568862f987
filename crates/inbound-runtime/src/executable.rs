use std::sync::Arc;

use async_trait::async_trait;

use crate::context::InboundContext;

/// A long-lived trigger implementation (webhook, listener, poller).
///
/// `activate` must return once the trigger is running; background work is
/// spawned by the implementation. Failures after that point are reported via
/// [`InboundContext::cancel`].
#[async_trait]
pub trait InboundExecutable: Send + Sync {
    async fn activate(&self, context: Arc<InboundContext>) -> anyhow::Result<()>;
    async fn deactivate(&self) -> anyhow::Result<()>;
}
