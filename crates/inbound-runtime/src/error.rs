use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("executable registry is shut down")]
    Shutdown,
    #[error("activation timed out after {0:?}")]
    ActivationTimeout(Duration),
    #[error("deactivation timed out after {0:?}")]
    DeactivationTimeout(Duration),
    #[error("executable panicked: {0}")]
    Panicked(String),
    #[error("secret '{0}' could not be resolved")]
    MissingSecret(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("http server error: {0}")]
    Http(String),
}
