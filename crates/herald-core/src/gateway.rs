//! The inbound event boundary.
//!
//! [`EventSource`] is the contract Herald expects from whatever delivers raw
//! events: a gateway socket, a webhook server, or an in-memory double in
//! tests. The client subscribes listeners per [`EventKind`] while it is open
//! and unsubscribes them on close; components do the same for their own
//! listeners while started.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::event::{Event, EventKind, InteractionEvent};
use crate::rest::InteractionResponse;

/// A type-erased event listener.
///
/// Listeners are invoked once per delivered event; each invocation is an
/// independent dispatch and may run concurrently with others.
pub type ListenerFn = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

/// Opaque handle identifying one subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(pub u64);

/// The transport collaborator that delivers raw events.
pub trait EventSource: Send + Sync {
    /// Registers a listener for events of the given kind.
    fn subscribe(&self, kind: EventKind, listener: ListenerFn) -> ListenerHandle;

    /// Removes a previous subscription. Unknown handles are ignored.
    fn unsubscribe(&self, handle: ListenerHandle);
}

/// Shared reference to an event source.
pub type SharedEventSource = Arc<dyn EventSource>;

/// Handler for direct interaction requests.
///
/// Must produce the initial HTTP-style response for the caller to forward;
/// the future it returns resolves exactly once.
pub type InteractionRequestHandler =
    Arc<dyn Fn(InteractionEvent) -> BoxFuture<'static, InteractionResponse> + Send + Sync>;

/// The transport collaborator that receives interactions as direct HTTP
/// requests rather than gateway events.
pub trait InteractionServer: Send + Sync {
    /// Installs or clears the request handler. At most one handler is set at
    /// a time; setting `None` detaches the client.
    fn set_listener(&self, handler: Option<InteractionRequestHandler>);
}

/// Shared reference to an interaction server.
pub type SharedInteractionServer = Arc<dyn InteractionServer>;
