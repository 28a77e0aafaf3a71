//! Unified error types for the Herald core.
//!
//! The dispatch layer distinguishes four categories of failure: user-facing
//! command errors, intentional halt signals, configuration errors, and
//! transient REST failures. Framework-level errors (injection failures) are
//! defined in `herald-framework`.

use std::time::Duration;

use thiserror::Error;

/// A boxed error type used where callbacks may fail with arbitrary errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// =============================================================================
// Command-flow errors
// =============================================================================

/// A user-facing error raised by a command, check, or hook to communicate an
/// expected failure.
///
/// The client dispatch layer catches this, sends [`message`](Self::message)
/// as the response, and treats the command as found.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CommandError {
    /// The text sent back to the invoking user.
    pub message: String,
}

impl CommandError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An intentional short-circuit raised to abandon the rest of the dispatch
/// pipeline without reporting an error or a not-found condition.
///
/// The client dispatch layer catches this and swallows it silently.
#[derive(Debug, Clone, Copy, Error)]
#[error("execution halted")]
pub struct HaltExecution;

/// Any failure that can flow out of the check/hook/execution pipeline.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Expected, user-facing failure; becomes the response message.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Intentional short-circuit; swallowed at the client layer.
    #[error(transparent)]
    Halt(#[from] HaltExecution),

    /// A programming bug in a handler; surfaced via logging and the error
    /// hooks, never silently dropped.
    #[error("handler failed: {0}")]
    Unexpected(#[source] BoxError),
}

impl DispatchError {
    /// Wraps an arbitrary error as an unexpected handler failure.
    pub fn unexpected(err: impl Into<BoxError>) -> Self {
        Self::Unexpected(err.into())
    }
}

/// Result type for command-flow operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

// =============================================================================
// Configuration errors
// =============================================================================

/// Errors raised by invalid wiring of the client and its components.
///
/// These are fatal to the call that triggered them and are never retried.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// An event-managed client requires an event source to attach to.
    #[error("client cannot be event managed without an event source")]
    EventManagedWithoutSource,

    /// Message accepts-modes other than `None` require an event source.
    #[error("cannot set accepts level on a client with no event source")]
    AcceptsWithoutSource,

    /// A component may be owned by at most one client at a time.
    #[error("component '{name}' is already bound to a client")]
    ComponentAlreadyBound {
        /// Name of the offending component.
        name: String,
    },

    /// A loader callback rejected the client it was handed.
    #[error("loader failed: {0}")]
    Loader(String),
}

// =============================================================================
// Lifecycle errors
// =============================================================================

/// Errors raised by `Client::open` / `Client::close`.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// `open` was called while the client was already alive.
    #[error("client is already alive")]
    AlreadyAlive,

    /// `close` was called while the client was not alive.
    #[error("client isn't alive")]
    NotAlive,

    /// A `starting` lifecycle callback failed; startup is aborted.
    #[error("starting callback failed: {0}")]
    StartingCallback(#[source] BoxError),

    /// A REST failure that survived the retry budget.
    #[error(transparent)]
    Rest(#[from] RestError),
}

// =============================================================================
// REST errors
// =============================================================================

/// Error type for calls to the REST collaborator.
#[derive(Debug, Clone, Error)]
pub enum RestError {
    /// The platform rate limited the request.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// How long the platform asked us to wait.
        retry_after: Duration,
    },

    /// The platform returned a server-side error.
    #[error("server error (status {status})")]
    ServerError { status: u16 },

    /// The credentials were rejected.
    #[error("unauthorized")]
    Unauthorized,

    /// Any other request failure.
    #[error("request failed: {0}")]
    Request(String),
}

impl RestError {
    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RestError::RateLimited { .. } | RestError::ServerError { .. }
        )
    }
}

/// Result type for REST operations.
pub type RestResult<T> = Result<T, RestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_error_displays_message() {
        let err = CommandError::new("bad args");
        assert_eq!(err.to_string(), "bad args");
    }

    #[test]
    fn transient_rest_errors() {
        assert!(
            RestError::RateLimited {
                retry_after: Duration::from_secs(1)
            }
            .is_transient()
        );
        assert!(RestError::ServerError { status: 502 }.is_transient());
        assert!(!RestError::Unauthorized.is_transient());
    }
}
