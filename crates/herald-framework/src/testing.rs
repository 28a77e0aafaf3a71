//! In-memory doubles for the transport and REST collaborators.
//!
//! Used throughout the framework's own tests and exported so downstream bots
//! can drive a [`Client`](crate::client::Client) end to end without a real
//! platform connection.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;

use herald_core::{
    Cache, Event, EventKind, EventSource, InteractionEvent, InteractionRequestHandler,
    InteractionResponse, InteractionServer, ListenerFn, ListenerHandle, MessageEvent, RestClient,
    RestError, RestResult, User,
};

/// A REST double recording every outbound call.
#[derive(Default)]
pub struct MockRest {
    messages: Mutex<Vec<(u64, String)>>,
    initial: Mutex<Vec<InteractionResponse>>,
    followups: Mutex<Vec<String>>,
    fetch_results: Mutex<VecDeque<Result<User, RestError>>>,
    fetch_calls: AtomicUsize,
}

impl MockRest {
    /// Queues a result for the next `fetch_own_user` call. With an empty
    /// queue the mock answers with a default bot user.
    pub fn queue_own_user(&self, result: Result<User, RestError>) {
        self.fetch_results.lock().push_back(result);
    }

    pub fn messages(&self) -> Vec<(u64, String)> {
        self.messages.lock().clone()
    }

    pub fn initial_responses(&self) -> Vec<InteractionResponse> {
        self.initial.lock().clone()
    }

    pub fn followups(&self) -> Vec<String> {
        self.followups.lock().clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RestClient for MockRest {
    async fn create_message(&self, channel_id: u64, content: &str) -> RestResult<()> {
        self.messages.lock().push((channel_id, content.to_owned()));
        Ok(())
    }

    async fn create_interaction_response(
        &self,
        _interaction_id: u64,
        _token: &str,
        response: &InteractionResponse,
    ) -> RestResult<()> {
        self.initial.lock().push(response.clone());
        Ok(())
    }

    async fn create_followup(&self, _token: &str, content: &str) -> RestResult<()> {
        self.followups.lock().push(content.to_owned());
        Ok(())
    }

    async fn fetch_own_user(&self) -> RestResult<User> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        match self.fetch_results.lock().pop_front() {
            Some(result) => result,
            None => Ok(own_user()),
        }
    }
}

/// A cache double with an optional own-user entry.
#[derive(Default)]
pub struct MockCache {
    own_user: Mutex<Option<User>>,
}

impl MockCache {
    pub fn with_own_user(user: User) -> Self {
        Self {
            own_user: Mutex::new(Some(user)),
        }
    }
}

impl Cache for MockCache {
    fn get_own_user(&self) -> Option<User> {
        self.own_user.lock().clone()
    }
}

/// An event source double that records subscriptions and lets tests push
/// events through them.
#[derive(Default)]
pub struct MockEventSource {
    listeners: Mutex<HashMap<u64, (EventKind, ListenerFn)>>,
    next_handle: AtomicU64,
}

impl MockEventSource {
    /// Delivers `event` to every listener subscribed to its kind, awaiting
    /// all of them.
    pub async fn emit(&self, event: Event) {
        let kind = event.kind();
        let listeners: Vec<ListenerFn> = self
            .listeners
            .lock()
            .values()
            .filter(|(subscribed, _)| *subscribed == kind)
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        join_all(listeners.iter().map(|listener| listener(event.clone()))).await;
    }

    pub fn subscription_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn subscribed_kinds(&self) -> Vec<EventKind> {
        self.listeners.lock().values().map(|(kind, _)| *kind).collect()
    }
}

impl EventSource for MockEventSource {
    fn subscribe(&self, kind: EventKind, listener: ListenerFn) -> ListenerHandle {
        let handle = ListenerHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().insert(handle.0, (kind, listener));
        handle
    }

    fn unsubscribe(&self, handle: ListenerHandle) {
        self.listeners.lock().remove(&handle.0);
    }
}

/// An interaction server double exposing the currently installed handler.
#[derive(Default)]
pub struct MockInteractionServer {
    handler: Mutex<Option<InteractionRequestHandler>>,
}

impl MockInteractionServer {
    pub fn handler(&self) -> Option<InteractionRequestHandler> {
        self.handler.lock().clone()
    }

    /// Sends an interaction through the installed handler, as the HTTP layer
    /// would, and returns the initial response.
    pub async fn request(&self, event: InteractionEvent) -> Option<InteractionResponse> {
        let handler = self.handler()?;
        Some(handler(event).await)
    }
}

impl InteractionServer for MockInteractionServer {
    fn set_listener(&self, handler: Option<InteractionRequestHandler>) {
        *self.handler.lock() = handler;
    }
}

/// The default bot account used by the doubles.
pub fn own_user() -> User {
    User {
        id: 777,
        username: "herald".into(),
        is_bot: true,
    }
}

/// A human author for test events.
pub fn author() -> User {
    User {
        id: 5,
        username: "tester".into(),
        is_bot: false,
    }
}

/// A guild message with the given channel and content.
pub fn message_event(channel_id: u64, content: &str) -> MessageEvent {
    MessageEvent {
        id: 100,
        channel_id,
        guild_id: Some(200),
        author: author(),
        content: Some(content.to_owned()),
    }
}

/// A direct message with the given content.
pub fn dm_event(content: &str) -> MessageEvent {
    MessageEvent {
        guild_id: None,
        ..message_event(1, content)
    }
}

/// An interaction invoking the named slash command.
pub fn interaction_event(command_name: &str) -> InteractionEvent {
    InteractionEvent {
        id: 300,
        token: "tok".into(),
        channel_id: 42,
        guild_id: Some(200),
        author: author(),
        command_name: command_name.to_owned(),
        options: Vec::new(),
    }
}
