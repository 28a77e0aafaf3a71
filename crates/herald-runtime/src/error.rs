//! Runtime error types.

use thiserror::Error;

/// Errors raised while loading configuration or driving the client
/// lifecycle.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but described an invalid setup.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// Client wiring was rejected.
    #[error(transparent)]
    Wiring(#[from] herald_core::ConfigError),

    /// The client lifecycle failed.
    #[error(transparent)]
    Lifecycle(#[from] herald_core::LifecycleError),
}

impl From<figment::Error> for RuntimeError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
