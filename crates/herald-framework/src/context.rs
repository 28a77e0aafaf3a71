//! Execution contexts.
//!
//! A context is built per invocation and carries the triggering event, the
//! REST handle used to respond, and the state dispatch fills in as
//! matching progresses. [`MessageContext`] is the prefix-command flavour;
//! [`SlashContext`] adds the single-initial-response state machine shared by
//! gateway-delivered and directly-requested interactions.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use herald_core::{
    CommandOption, DispatchError, DispatchResult, InteractionEvent, InteractionResponse,
    MessageEvent, SharedRestClient, User,
};

use crate::command::{MessageCommand, SlashCommand};
use crate::injectable::Context;

// =============================================================================
// Message contexts
// =============================================================================

/// Context for a prefix-command invocation.
///
/// `content` starts as the message content with the prefix stripped; the
/// matching component strips the trigger name before handing the remainder to
/// the command's parser.
pub struct MessageContext {
    rest: SharedRestClient,
    event: MessageEvent,
    content: RwLock<String>,
    triggering_prefix: String,
    triggering_name: RwLock<String>,
    command: RwLock<Option<Arc<MessageCommand>>>,
}

impl MessageContext {
    pub fn new(
        rest: SharedRestClient,
        event: MessageEvent,
        content: String,
        triggering_prefix: String,
    ) -> Self {
        Self {
            rest,
            event,
            content: RwLock::new(content),
            triggering_prefix,
            triggering_name: RwLock::new(String::new()),
            command: RwLock::new(None),
        }
    }

    pub fn event(&self) -> &MessageEvent {
        &self.event
    }

    /// The content still to be parsed as arguments.
    pub fn content(&self) -> String {
        self.content.read().clone()
    }

    pub fn set_content(&self, content: String) {
        *self.content.write() = content;
    }

    /// The prefix this invocation matched.
    pub fn triggering_prefix(&self) -> &str {
        &self.triggering_prefix
    }

    pub fn set_triggering_name(&self, name: String) {
        *self.triggering_name.write() = name;
    }

    /// The command matching resolved to, once one has been.
    pub fn command(&self) -> Option<Arc<MessageCommand>> {
        self.command.read().clone()
    }

    pub(crate) fn set_command(&self, command: Arc<MessageCommand>) {
        *self.command.write() = Some(command);
    }
}

#[async_trait::async_trait]
impl Context for MessageContext {
    fn author(&self) -> &User {
        &self.event.author
    }

    fn channel_id(&self) -> u64 {
        self.event.channel_id
    }

    fn guild_id(&self) -> Option<u64> {
        self.event.guild_id
    }

    fn triggering_name(&self) -> String {
        self.triggering_name.read().clone()
    }

    async fn respond(&self, content: String) -> DispatchResult<()> {
        self.rest
            .create_message(self.event.channel_id, &content)
            .await
            .map_err(DispatchError::unexpected)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Debug for MessageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageContext")
            .field("message_id", &self.event.id)
            .field("triggering_prefix", &self.triggering_prefix)
            .field("triggering_name", &*self.triggering_name.read())
            .finish()
    }
}

// =============================================================================
// Slash contexts
// =============================================================================

/// Where the interaction's initial response has got to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseState {
    /// No initial response sent yet.
    Pending,
    /// A deferral placeholder was sent; the real answer goes out as a
    /// followup.
    Deferred,
    /// The initial response went out; everything further is a followup.
    Sent,
}

/// Delivery channel for the initial response.
enum ResponseSink {
    /// Gateway-delivered interaction: respond over REST.
    Rest,
    /// Direct HTTP request: resolve the pending response future.
    Future(Mutex<Option<oneshot::Sender<InteractionResponse>>>),
}

/// Context for a slash-command invocation.
///
/// The state transition out of [`ResponseState::Pending`] happens exactly
/// once, decided under a lock before any IO, so a user `respond`, the
/// auto-defer timer and the not-found path can race without double-sending
/// the initial response.
pub struct SlashContext {
    rest: SharedRestClient,
    event: InteractionEvent,
    state: Mutex<ResponseState>,
    sink: ResponseSink,
    defer_token: CancellationToken,
    command: RwLock<Option<Arc<SlashCommand>>>,
}

impl SlashContext {
    /// A context for an interaction received over the gateway.
    pub fn gateway(rest: SharedRestClient, event: InteractionEvent) -> Arc<Self> {
        Arc::new(Self {
            rest,
            event,
            state: Mutex::new(ResponseState::Pending),
            sink: ResponseSink::Rest,
            defer_token: CancellationToken::new(),
            command: RwLock::new(None),
        })
    }

    /// A context for a directly-requested interaction. The returned receiver
    /// resolves exactly once with the initial response.
    pub fn direct(
        rest: SharedRestClient,
        event: InteractionEvent,
    ) -> (Arc<Self>, oneshot::Receiver<InteractionResponse>) {
        let (tx, rx) = oneshot::channel();
        let ctx = Arc::new(Self {
            rest,
            event,
            state: Mutex::new(ResponseState::Pending),
            sink: ResponseSink::Future(Mutex::new(Some(tx))),
            defer_token: CancellationToken::new(),
            command: RwLock::new(None),
        });
        (ctx, rx)
    }

    pub fn event(&self) -> &InteractionEvent {
        &self.event
    }

    pub fn options(&self) -> &[CommandOption] {
        &self.event.options
    }

    /// The command matching resolved to, once one has been.
    pub fn command(&self) -> Option<Arc<SlashCommand>> {
        self.command.read().clone()
    }

    pub(crate) fn set_command(&self, command: Arc<SlashCommand>) {
        *self.command.write() = Some(command);
    }

    /// Whether the initial response is still pending.
    pub fn is_pending(&self) -> bool {
        *self.state.lock() == ResponseState::Pending
    }

    /// Sends the deferral placeholder if no initial response has been
    /// decided yet. A no-op otherwise.
    pub async fn defer(&self) -> DispatchResult<()> {
        let won = {
            let mut state = self.state.lock();
            if *state == ResponseState::Pending {
                *state = ResponseState::Deferred;
                true
            } else {
                false
            }
        };
        if won {
            self.deliver_initial(InteractionResponse::Deferred).await?;
        }
        Ok(())
    }

    /// Starts the auto-defer timer. If nothing responds within `after` the
    /// timer defers; a response cancels it.
    pub fn start_defer_timer(self: &Arc<Self>, after: Duration) {
        let ctx = Arc::clone(self);
        let token = self.defer_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    if let Err(error) = ctx.defer().await {
                        warn!(interaction = ctx.event.id, %error, "auto-defer failed");
                    }
                }
            }
        });
    }

    pub fn cancel_defer(&self) {
        self.defer_token.cancel();
    }

    /// Resolves a not-found outcome. For a pending direct request this is
    /// what guarantees the response future still completes; after a deferral
    /// it degrades to a followup carrying `content` when one is configured.
    pub async fn mark_not_found(&self, content: Option<String>) -> DispatchResult<()> {
        self.cancel_defer();
        let state = {
            let mut state = self.state.lock();
            let previous = *state;
            if previous == ResponseState::Pending {
                *state = ResponseState::Sent;
            }
            previous
        };
        match state {
            ResponseState::Pending => {
                self.deliver_initial(InteractionResponse::NotFound { content })
                    .await
            }
            ResponseState::Deferred => {
                if let Some(content) = content {
                    self.rest
                        .create_followup(&self.event.token, &content)
                        .await
                        .map_err(DispatchError::unexpected)?;
                }
                Ok(())
            }
            ResponseState::Sent => Ok(()),
        }
    }

    async fn deliver_initial(&self, response: InteractionResponse) -> DispatchResult<()> {
        match &self.sink {
            ResponseSink::Rest => self
                .rest
                .create_interaction_response(self.event.id, &self.event.token, &response)
                .await
                .map_err(DispatchError::unexpected),
            ResponseSink::Future(sender) => {
                if let Some(sender) = sender.lock().take() {
                    // The requester may have gone away; nothing left to do.
                    let _ = sender.send(response);
                }
                Ok(())
            }
        }
    }
}

#[async_trait::async_trait]
impl Context for SlashContext {
    fn author(&self) -> &User {
        &self.event.author
    }

    fn channel_id(&self) -> u64 {
        self.event.channel_id
    }

    fn guild_id(&self) -> Option<u64> {
        self.event.guild_id
    }

    fn triggering_name(&self) -> String {
        self.event.command_name.clone()
    }

    async fn respond(&self, content: String) -> DispatchResult<()> {
        let initial = {
            let mut state = self.state.lock();
            let was_pending = *state == ResponseState::Pending;
            *state = ResponseState::Sent;
            was_pending
        };
        if initial {
            self.cancel_defer();
            self.deliver_initial(InteractionResponse::Message { content })
                .await
        } else {
            self.rest
                .create_followup(&self.event.token, &content)
                .await
                .map_err(DispatchError::unexpected)
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Debug for SlashContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlashContext")
            .field("interaction_id", &self.event.id)
            .field("command_name", &self.event.command_name)
            .field("state", &*self.state.lock())
            .finish()
    }
}
