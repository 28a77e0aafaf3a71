//! The outbound response boundary.
//!
//! [`RestClient`] is the contract Herald expects from the concrete REST
//! client used to send responses. Each affordance is idempotent once called;
//! the dispatch core guarantees it never double-sends an initial interaction
//! response.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RestResult;
use crate::event::User;

/// The initial response to a slash-command interaction.
#[derive(Debug, Clone, PartialEq)]
pub enum InteractionResponse {
    /// A normal message response.
    Message { content: String },
    /// A "thinking" placeholder; a real response follows as a followup.
    Deferred,
    /// Structured marker that no command matched the interaction.
    NotFound { content: Option<String> },
}

/// The REST collaborator used to deliver responses and look up the bot's own
/// identity.
#[async_trait]
pub trait RestClient: Send + Sync {
    /// Sends a plain text message to a channel.
    async fn create_message(&self, channel_id: u64, content: &str) -> RestResult<()>;

    /// Sends the initial response for an interaction.
    async fn create_interaction_response(
        &self,
        interaction_id: u64,
        token: &str,
        response: &InteractionResponse,
    ) -> RestResult<()>;

    /// Sends a followup message for an interaction that already has an
    /// initial response (typically after a deferral).
    async fn create_followup(&self, token: &str, content: &str) -> RestResult<()>;

    /// Fetches the bot's own user. Used during startup to build mention
    /// prefixes when no cache entry is available.
    async fn fetch_own_user(&self) -> RestResult<User>;
}

/// Shared reference to a REST client.
pub type SharedRestClient = Arc<dyn RestClient>;

/// Read-only cache collaborator.
pub trait Cache: Send + Sync {
    /// Returns the bot's own user, if cached.
    fn get_own_user(&self) -> Option<User>;
}

/// Shared reference to a cache.
pub type SharedCache = Arc<dyn Cache>;
