//! The client dispatcher.
//!
//! [`Client`] owns the component registry, the global checks and prefixes,
//! the dependency-injection container and the lifecycle. It subscribes to
//! the event source while open and routes message and interaction events to
//! its components in registration order.
//!
//! # Example
//!
//! ```rust,ignore
//! let client = ClientBuilder::new(rest)
//!     .event_source(events)
//!     .prefix("!")
//!     .build()?;
//! client.add_component(
//!     Component::new("general").with_message_command(ping),
//! )?;
//! client.open().await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::{BoxFuture, join_all};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use herald_core::{
    BoxError, ConfigError, DispatchError, Event, EventKind, InteractionEvent,
    InteractionResponse, LifecycleError, ListenerFn, ListenerHandle, MessageEvent, RestError,
    SharedCache, SharedEventSource, SharedInteractionServer, SharedRestClient, User,
};

use crate::component::Component;
use crate::context::{MessageContext, SlashContext};
use crate::hooks::{HookSet, Hooks};
use crate::injectable::{AnyContext, InjectableCheck, gather_checks};
use crate::injector::{CallbackId, Injector};
use crate::registry::Registry;

/// Lifecycle and dispatch notification names.
pub mod callbacks {
    /// Fired before startup commits; an error here aborts `open`.
    pub const STARTING: &str = "starting";
    /// Fired concurrently once startup has finished.
    pub const STARTED: &str = "started";
    /// Fired at the start of `close`.
    pub const CLOSING: &str = "closing";
    /// Fired once `close` has finished.
    pub const CLOSED: &str = "closed";
    /// Fired when no message command matched a prefixed message.
    pub const MESSAGE_COMMAND_NOT_FOUND: &str = "message_command_not_found";
    /// Fired when no slash command matched an interaction.
    pub const SLASH_COMMAND_NOT_FOUND: &str = "slash_command_not_found";
}

const OWN_USER_MAX_RETRIES: usize = 4;
const OWN_USER_BASE_DELAY: Duration = Duration::from_millis(200);
const RATE_LIMIT_CEILING: Duration = Duration::from_secs(30);

const DEFAULT_AUTO_DEFER: Duration = Duration::from_millis(2600);
const DEFAULT_INTERACTION_NOT_FOUND: &str = "Command not found";

/// Which message channels the client listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageAccepts {
    /// Direct and guild messages.
    #[default]
    All,
    /// Direct messages only.
    DmOnly,
    /// Guild messages only.
    GuildOnly,
    /// No message events at all; prefix commands are disabled.
    None,
}

impl MessageAccepts {
    fn kinds(self) -> &'static [EventKind] {
        match self {
            Self::All => &[EventKind::DmMessageCreate, EventKind::GuildMessageCreate],
            Self::DmOnly => &[EventKind::DmMessageCreate],
            Self::GuildOnly => &[EventKind::GuildMessageCreate],
            Self::None => &[],
        }
    }
}

/// The argument handed to client callbacks.
#[derive(Clone, Default)]
pub enum CallbackArgs {
    /// Lifecycle notifications carry no context.
    #[default]
    Empty,
    /// Message dispatch notifications carry the message context.
    Message(Arc<MessageContext>),
    /// Slash dispatch notifications carry the slash context.
    Slash(Arc<SlashContext>),
}

type ClientCallbackFn =
    Arc<dyn Fn(CallbackArgs) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// A named notification callback registered on the client.
#[derive(Clone)]
pub struct ClientCallback {
    id: CallbackId,
    callback: ClientCallbackFn,
}

impl ClientCallback {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(CallbackArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            id: CallbackId::next(),
            callback: Arc::new(move |args| Box::pin(f(args))),
        }
    }

    pub fn id(&self) -> CallbackId {
        self.id
    }
}

/// Resolves the prefixes to try for one message, ahead of the static list.
pub type PrefixGetter =
    Arc<dyn Fn(&MessageEvent) -> BoxFuture<'static, Vec<String>> + Send + Sync>;

/// An extension hook that wires commands and dependencies into a client.
pub trait Loader {
    fn load(&self, client: &Arc<Client>) -> Result<(), ConfigError>;
}

// =============================================================================
// Builder
// =============================================================================

/// Builds a [`Client`], validating the collaborator wiring.
pub struct ClientBuilder {
    rest: SharedRestClient,
    cache: Option<SharedCache>,
    events: Option<SharedEventSource>,
    server: Option<SharedInteractionServer>,
    accepts: MessageAccepts,
    event_managed: bool,
    mention_prefix: bool,
    prefixes: Vec<String>,
    auto_defer_after: Option<Duration>,
    interaction_not_found: Option<String>,
}

impl ClientBuilder {
    pub fn new(rest: SharedRestClient) -> Self {
        Self {
            rest,
            cache: None,
            events: None,
            server: None,
            accepts: MessageAccepts::default(),
            event_managed: false,
            mention_prefix: false,
            prefixes: Vec::new(),
            auto_defer_after: Some(DEFAULT_AUTO_DEFER),
            interaction_not_found: Some(DEFAULT_INTERACTION_NOT_FOUND.to_owned()),
        }
    }

    #[must_use]
    pub fn cache(mut self, cache: SharedCache) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn event_source(mut self, events: SharedEventSource) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn interaction_server(mut self, server: SharedInteractionServer) -> Self {
        self.server = Some(server);
        self
    }

    #[must_use]
    pub fn accepts(mut self, accepts: MessageAccepts) -> Self {
        self.accepts = accepts;
        self
    }

    /// Ties the client lifecycle to the event source's own start and stop
    /// events.
    #[must_use]
    pub fn event_managed(mut self, event_managed: bool) -> Self {
        self.event_managed = event_managed;
        self
    }

    /// Also accept `@bot`-mention prefixes, resolved at startup.
    #[must_use]
    pub fn mention_prefix(mut self, mention_prefix: bool) -> Self {
        self.mention_prefix = mention_prefix;
        self
    }

    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    /// Deadline after which a pending slash response is auto-deferred.
    /// `None` disables the timer.
    #[must_use]
    pub fn auto_defer_after(mut self, after: Option<Duration>) -> Self {
        self.auto_defer_after = after;
        self
    }

    /// Response content for unmatched interactions. `None` leaves deferred
    /// interactions silent.
    #[must_use]
    pub fn interaction_not_found(mut self, content: Option<String>) -> Self {
        self.interaction_not_found = content;
        self
    }

    pub fn build(self) -> Result<Arc<Client>, ConfigError> {
        if self.events.is_none() {
            if self.event_managed {
                return Err(ConfigError::EventManagedWithoutSource);
            }
            if self.accepts != MessageAccepts::None {
                return Err(ConfigError::AcceptsWithoutSource);
            }
        }

        let mut prefixes = Vec::new();
        for prefix in self.prefixes {
            if !prefixes.contains(&prefix) {
                prefixes.push(prefix);
            }
        }

        let client = Arc::new(Client {
            rest: self.rest,
            cache: self.cache,
            events: self.events,
            server: self.server,
            accepts: self.accepts,
            mention_prefix: self.mention_prefix,
            auto_defer_after: RwLock::new(self.auto_defer_after),
            interaction_not_found: RwLock::new(self.interaction_not_found),
            injector: Injector::new(),
            components: RwLock::new(Registry::new()),
            checks: RwLock::new(Registry::new()),
            prefixes: RwLock::new(prefixes),
            prefix_getter: RwLock::new(None),
            client_callbacks: RwLock::new(HashMap::new()),
            hooks: RwLock::new(None),
            message_hooks: RwLock::new(None),
            slash_hooks: RwLock::new(None),
            is_alive: AtomicBool::new(false),
            listener_handles: Mutex::new(Vec::new()),
            human_check: Mutex::new(None),
        });

        if self.event_managed {
            client.attach_lifecycle_listeners();
        }
        Ok(client)
    }
}

// =============================================================================
// Client
// =============================================================================

/// The command dispatcher.
pub struct Client {
    rest: SharedRestClient,
    cache: Option<SharedCache>,
    events: Option<SharedEventSource>,
    server: Option<SharedInteractionServer>,
    accepts: MessageAccepts,
    mention_prefix: bool,
    auto_defer_after: RwLock<Option<Duration>>,
    interaction_not_found: RwLock<Option<String>>,
    injector: Injector,
    components: RwLock<Registry<Arc<Component>>>,
    checks: RwLock<Registry<InjectableCheck>>,
    prefixes: RwLock<Vec<String>>,
    prefix_getter: RwLock<Option<PrefixGetter>>,
    client_callbacks: RwLock<HashMap<String, Registry<ClientCallback>>>,
    hooks: RwLock<Option<Arc<Hooks>>>,
    message_hooks: RwLock<Option<Arc<Hooks>>>,
    slash_hooks: RwLock<Option<Arc<Hooks>>>,
    is_alive: AtomicBool,
    listener_handles: Mutex<Vec<ListenerHandle>>,
    human_check: Mutex<Option<CallbackId>>,
}

impl Client {
    pub fn injector(&self) -> &Injector {
        &self.injector
    }

    pub fn rest(&self) -> &SharedRestClient {
        &self.rest
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::SeqCst)
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Adds a component. On a live client the component starts immediately.
    pub fn add_component(
        self: &Arc<Self>,
        component: Component,
    ) -> Result<Arc<Component>, ConfigError> {
        let component = Arc::new(component);
        component.bind(self.events.clone())?;
        component.attach_self(self);
        self.components
            .write()
            .insert(component.key(), Arc::clone(&component));
        if self.is_alive() {
            component.open();
        }
        info!(component = %component.name(), "component added");
        Ok(component)
    }

    /// Removes a component, stopping it first. Executions already holding a
    /// dispatch snapshot finish normally.
    pub fn remove_component(&self, component: &Arc<Component>) -> Option<Arc<Component>> {
        let removed = self.components.write().remove(component.key())?;
        removed.close();
        removed.unbind();
        info!(component = %removed.name(), "component removed");
        Some(removed)
    }

    pub fn add_check(&self, check: InjectableCheck) {
        self.checks.write().insert(check.id().raw(), check);
    }

    pub fn remove_check(&self, id: CallbackId) -> bool {
        self.checks.write().remove(id.raw()).is_some()
    }

    /// Installs or removes the built-in check rejecting bot authors.
    pub fn set_human_only(&self, enabled: bool) {
        let mut slot = self.human_check.lock();
        match (enabled, *slot) {
            (true, None) => {
                let check = InjectableCheck::new(|ctx| ctx.is_human());
                *slot = Some(check.id());
                self.add_check(check);
            }
            (false, Some(id)) => {
                self.remove_check(id);
                *slot = None;
            }
            _ => {}
        }
    }

    /// Adds a static prefix, keeping the trial order and dropping
    /// duplicates.
    pub fn add_prefix(&self, prefix: impl Into<String>) {
        let prefix = prefix.into();
        let mut prefixes = self.prefixes.write();
        if !prefixes.contains(&prefix) {
            prefixes.push(prefix);
        }
    }

    pub fn remove_prefix(&self, prefix: &str) -> bool {
        let mut prefixes = self.prefixes.write();
        match prefixes.iter().position(|known| known == prefix) {
            Some(index) => {
                prefixes.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn prefixes(&self) -> Vec<String> {
        self.prefixes.read().clone()
    }

    /// Sets the dynamic prefix resolver, tried before the static prefixes.
    pub fn set_prefix_getter(&self, getter: Option<PrefixGetter>) {
        *self.prefix_getter.write() = getter;
    }

    /// Sets how long an interaction may run before the auto-defer placeholder
    /// goes out; `None` disables the timer for later dispatches.
    pub fn set_auto_defer_after(&self, after: Option<Duration>) {
        *self.auto_defer_after.write() = after;
    }

    /// Sets the content of the structured not-found response for unknown
    /// slash commands.
    pub fn set_interaction_not_found(&self, content: Option<String>) {
        *self.interaction_not_found.write() = content;
    }

    pub fn set_hooks(&self, hooks: Option<Arc<Hooks>>) {
        *self.hooks.write() = hooks;
    }

    pub fn set_message_hooks(&self, hooks: Option<Arc<Hooks>>) {
        *self.message_hooks.write() = hooks;
    }

    pub fn set_slash_hooks(&self, hooks: Option<Arc<Hooks>>) {
        *self.slash_hooks.write() = hooks;
    }

    /// Registers a notification callback under a case-insensitive name.
    pub fn add_client_callback(&self, name: &str, callback: ClientCallback) {
        self.client_callbacks
            .write()
            .entry(name.to_lowercase())
            .or_default()
            .insert(callback.id().raw(), callback);
    }

    pub fn remove_client_callback(&self, name: &str, id: CallbackId) -> bool {
        self.client_callbacks
            .write()
            .get_mut(&name.to_lowercase())
            .is_some_and(|registry| registry.remove(id.raw()).is_some())
    }

    /// Runs an extension loader against this client.
    pub fn load(self: &Arc<Self>, loader: &dyn Loader) -> Result<(), ConfigError> {
        loader.load(self)
    }

    /// Every message command registered anywhere on this client under `name`,
    /// in component registration order.
    pub fn check_message_name(&self, name: &str) -> Vec<Arc<crate::command::MessageCommand>> {
        self.components
            .read()
            .iter()
            .flat_map(|component| component.check_message_name(name))
            .collect()
    }

    /// The slash command registered anywhere on this client under `name`.
    pub fn check_slash_name(&self, name: &str) -> Option<Arc<crate::command::SlashCommand>> {
        self.components
            .read()
            .iter()
            .find_map(|component| component.check_slash_name(name))
    }

    // ─── Client callbacks ────────────────────────────────────────────────────

    /// Invokes every callback registered under `name` concurrently.
    ///
    /// With `suppress` set, failures are logged and swallowed; otherwise the
    /// first failure is returned after every callback has finished.
    pub async fn dispatch_client_callback(
        &self,
        name: &str,
        args: CallbackArgs,
        suppress: bool,
    ) -> Result<(), BoxError> {
        let callbacks: Vec<ClientCallback> = self
            .client_callbacks
            .read()
            .get(&name.to_lowercase())
            .map(Registry::snapshot)
            .unwrap_or_default();
        if callbacks.is_empty() {
            return Ok(());
        }

        let results = join_all(
            callbacks
                .iter()
                .map(|callback| (callback.callback)(args.clone())),
        )
        .await;

        let mut first_error = None;
        for result in results {
            if let Err(err) = result {
                if suppress || first_error.is_some() {
                    error!(callback = name, error = %err, "client callback failed");
                } else {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    fn attach_lifecycle_listeners(self: &Arc<Self>) {
        let Some(events) = &self.events else { return };

        let client = Arc::clone(self);
        events.subscribe(
            EventKind::SourceStarting,
            Arc::new(move |_| {
                let client = Arc::clone(&client);
                Box::pin(async move {
                    if let Err(error) = client.open().await {
                        error!(%error, "event-managed startup failed");
                    }
                })
            }),
        );

        let client = Arc::clone(self);
        events.subscribe(
            EventKind::SourceClosing,
            Arc::new(move |_| {
                let client = Arc::clone(&client);
                Box::pin(async move {
                    if let Err(error) = client.close().await {
                        error!(%error, "event-managed shutdown failed");
                    }
                })
            }),
        );
    }

    /// Starts the client: fires `starting`, resolves mention prefixes,
    /// starts every component, subscribes to the event source and attaches
    /// to the interaction server, then fires `started` concurrently.
    pub async fn open(self: &Arc<Self>) -> Result<(), LifecycleError> {
        if self
            .is_alive
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(LifecycleError::AlreadyAlive);
        }

        if let Err(error) = self
            .dispatch_client_callback(callbacks::STARTING, CallbackArgs::Empty, false)
            .await
        {
            self.is_alive.store(false, Ordering::SeqCst);
            return Err(LifecycleError::StartingCallback(error));
        }

        if self.mention_prefix {
            match self.resolve_own_user().await {
                Ok(user) => {
                    self.add_prefix(format!("<@{}>", user.id));
                    self.add_prefix(format!("<@!{}>", user.id));
                }
                Err(error) => {
                    self.is_alive.store(false, Ordering::SeqCst);
                    return Err(error);
                }
            }
        }

        for component in self.components.read().snapshot() {
            component.open();
        }

        let mut handles = self.listener_handles.lock();
        if let Some(events) = &self.events {
            for kind in self.accepts.kinds() {
                let client = Arc::clone(self);
                let listener: ListenerFn = Arc::new(move |event| {
                    let client = Arc::clone(&client);
                    Box::pin(async move {
                        if let Event::Message(message) = event {
                            client.on_message_create(message).await;
                        }
                    })
                });
                handles.push(events.subscribe(*kind, listener));
            }

            let client = Arc::clone(self);
            let listener: ListenerFn = Arc::new(move |event| {
                let client = Arc::clone(&client);
                Box::pin(async move {
                    if let Event::Interaction(interaction) = event {
                        client.on_interaction_create(interaction).await;
                    }
                })
            });
            handles.push(events.subscribe(EventKind::InteractionCreate, listener));
        }
        drop(handles);

        if let Some(server) = &self.server {
            let client = Arc::clone(self);
            server.set_listener(Some(Arc::new(move |event| {
                let client = Arc::clone(&client);
                Box::pin(async move { client.on_interaction_request(event).await })
            })));
        }

        info!("client started");
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let _ = client
                .dispatch_client_callback(callbacks::STARTED, CallbackArgs::Empty, true)
                .await;
        });
        Ok(())
    }

    /// Stops the client: fires `closing`, detaches from the transports,
    /// stops every component and fires `closed`. Callback failures are
    /// logged, never propagated.
    pub async fn close(self: &Arc<Self>) -> Result<(), LifecycleError> {
        if !self.is_alive() {
            return Err(LifecycleError::NotAlive);
        }

        let _ = self
            .dispatch_client_callback(callbacks::CLOSING, CallbackArgs::Empty, true)
            .await;

        if let Some(events) = &self.events {
            for handle in self.listener_handles.lock().drain(..) {
                events.unsubscribe(handle);
            }
        }
        if let Some(server) = &self.server {
            server.set_listener(None);
        }

        for component in self.components.read().snapshot() {
            component.close();
        }

        self.is_alive.store(false, Ordering::SeqCst);
        info!("client closed");
        self.dispatch_client_callback(callbacks::CLOSED, CallbackArgs::Empty, true)
            .await
            .ok();
        Ok(())
    }

    /// The bot's own user, from the cache when possible, otherwise fetched
    /// with a bounded retry budget for transient REST failures.
    async fn resolve_own_user(&self) -> Result<User, LifecycleError> {
        if let Some(user) = self.cache.as_ref().and_then(|cache| cache.get_own_user()) {
            return Ok(user);
        }

        let mut attempts = 0;
        loop {
            match self.rest.fetch_own_user().await {
                Ok(user) => return Ok(user),
                Err(error) if attempts < OWN_USER_MAX_RETRIES && error.is_transient() => {
                    let delay = match &error {
                        RestError::RateLimited { retry_after } => {
                            if *retry_after > RATE_LIMIT_CEILING {
                                return Err(error.into());
                            }
                            *retry_after
                        }
                        _ => OWN_USER_BASE_DELAY * 2u32.pow(attempts as u32),
                    };
                    warn!(%error, ?delay, "own-user fetch failed, retrying");
                    attempts += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    // ─── Message dispatch ────────────────────────────────────────────────────

    /// Finds the prefix the message starts with, trying the dynamic getter
    /// ahead of the static list.
    async fn find_prefix(&self, event: &MessageEvent, content: &str) -> Option<String> {
        let getter = self.prefix_getter.read().clone();
        if let Some(getter) = getter {
            for prefix in getter(event).await {
                if content.starts_with(&prefix) {
                    return Some(prefix);
                }
            }
        }
        self.prefixes
            .read()
            .iter()
            .find(|prefix| content.starts_with(prefix.as_str()))
            .cloned()
    }

    /// Dispatches one message-creation event.
    pub async fn on_message_create(self: &Arc<Self>, event: MessageEvent) {
        let Some(content) = event.content.clone().filter(|content| !content.is_empty()) else {
            return;
        };

        let Some(prefix) = self.find_prefix(&event, &content).await else {
            // Not an invocation attempt we recognise; still worth telling
            // listeners that nothing matched.
            let ctx = Arc::new(MessageContext::new(
                Arc::clone(&self.rest),
                event,
                content,
                String::new(),
            ));
            let _ = self
                .dispatch_client_callback(
                    callbacks::MESSAGE_COMMAND_NOT_FOUND,
                    CallbackArgs::Message(ctx),
                    true,
                )
                .await;
            return;
        };
        let remainder = content[prefix.len()..].trim_start().to_owned();
        let ctx = Arc::new(MessageContext::new(
            Arc::clone(&self.rest),
            event,
            remainder,
            prefix,
        ));
        let any: AnyContext = Arc::clone(&ctx) as AnyContext;

        debug!(message = ctx.event().id, "dispatching message command");
        let checks = self.checks.read().snapshot();
        match gather_checks(&self.injector, &any, checks).await {
            Ok(true) => {}
            // A failed global check stays silent: no response, no not-found.
            Ok(false) => return,
            Err(DispatchError::Command(err)) => {
                self.respond_logged(&any, err.message).await;
                return;
            }
            Err(DispatchError::Halt(_)) => return,
            Err(error) => {
                error!(%error, "global check failed unexpectedly");
                return;
            }
        }

        let mut hooks = HookSet::new();
        hooks.push(self.hooks.read().as_ref());
        hooks.push(self.message_hooks.read().as_ref());

        let components = self.components.read().snapshot();
        for component in components {
            match component
                .execute_message(&self.injector, Arc::clone(&ctx), hooks.clone())
                .await
            {
                Ok(true) => return,
                Ok(false) => continue,
                Err(DispatchError::Command(err)) => {
                    // The command was found; its error is the answer.
                    self.respond_logged(&any, err.message).await;
                    return;
                }
                Err(DispatchError::Halt(_)) => return,
                Err(error) => {
                    error!(component = %component.name(), %error, "message dispatch failed");
                    return;
                }
            }
        }

        let _ = self
            .dispatch_client_callback(
                callbacks::MESSAGE_COMMAND_NOT_FOUND,
                CallbackArgs::Message(ctx),
                true,
            )
            .await;
    }

    async fn respond_logged(&self, ctx: &AnyContext, content: String) {
        if let Err(error) = ctx.respond(content).await {
            error!(%error, "failed to deliver command error response");
        }
    }

    // ─── Interaction dispatch ────────────────────────────────────────────────

    /// Dispatches a gateway-delivered interaction.
    pub async fn on_interaction_create(self: &Arc<Self>, event: InteractionEvent) {
        let ctx = SlashContext::gateway(Arc::clone(&self.rest), event);
        self.execute_interaction(ctx).await;
    }

    /// Handles a directly-requested interaction, producing the initial
    /// response for the HTTP layer. Execution continues in the background;
    /// the returned future resolves exactly once.
    pub async fn on_interaction_request(
        self: &Arc<Self>,
        event: InteractionEvent,
    ) -> InteractionResponse {
        let (ctx, response) = SlashContext::direct(Arc::clone(&self.rest), event);
        let client = Arc::clone(self);
        tokio::spawn(async move {
            client.execute_interaction(ctx).await;
        });
        match response.await {
            Ok(response) => response,
            // Dispatch always resolves the future; a dropped sender would be
            // a bug, but the requester still deserves an answer.
            Err(_) => InteractionResponse::NotFound {
                content: self.interaction_not_found.read().clone(),
            },
        }
    }

    async fn execute_interaction(self: &Arc<Self>, ctx: Arc<SlashContext>) {
        if let Some(after) = *self.auto_defer_after.read() {
            ctx.start_defer_timer(after);
        }
        let any: AnyContext = Arc::clone(&ctx) as AnyContext;

        debug!(interaction = ctx.event().id, command = %ctx.event().command_name, "dispatching slash command");
        let checks = self.checks.read().snapshot();
        match gather_checks(&self.injector, &any, checks).await {
            Ok(true) => {}
            Ok(false) => {
                self.finish_not_found(&ctx, false).await;
                return;
            }
            Err(DispatchError::Command(err)) => {
                self.respond_logged(&any, err.message).await;
                return;
            }
            Err(DispatchError::Halt(_)) => {
                self.finish_not_found(&ctx, false).await;
                return;
            }
            Err(error) => {
                error!(%error, "global check failed unexpectedly");
                self.finish_not_found(&ctx, false).await;
                return;
            }
        }

        let mut hooks = HookSet::new();
        hooks.push(self.hooks.read().as_ref());
        hooks.push(self.slash_hooks.read().as_ref());

        let components = self.components.read().snapshot();
        for component in components {
            let attempt = component
                .execute_interaction(&self.injector, Arc::clone(&ctx), hooks.clone())
                .await;
            match attempt {
                Ok(Some(task)) => {
                    match task.await {
                        Ok(Ok(())) => {}
                        Ok(Err(DispatchError::Command(err))) => {
                            self.respond_logged(&any, err.message).await;
                        }
                        Ok(Err(_)) => {}
                        Err(error) => {
                            error!(component = %component.name(), %error, "slash execution task failed");
                        }
                    }
                    // Whatever happened, the initial response must resolve.
                    if ctx.is_pending()
                        && let Err(error) = ctx.mark_not_found(None).await
                    {
                        error!(%error, "failed to finalize interaction response");
                    }
                    return;
                }
                Ok(None) => continue,
                Err(DispatchError::Command(err)) => {
                    self.respond_logged(&any, err.message).await;
                    return;
                }
                Err(DispatchError::Halt(_)) => {
                    self.finish_not_found(&ctx, false).await;
                    return;
                }
                Err(error) => {
                    error!(component = %component.name(), %error, "interaction dispatch failed");
                    self.finish_not_found(&ctx, false).await;
                    return;
                }
            }
        }

        self.finish_not_found(&ctx, true).await;
    }

    /// Resolves the interaction as not found, optionally firing the
    /// not-found client callback.
    async fn finish_not_found(&self, ctx: &Arc<SlashContext>, notify: bool) {
        let not_found = self.interaction_not_found.read().clone();
        if let Err(error) = ctx.mark_not_found(not_found).await {
            error!(%error, "failed to deliver not-found response");
        }
        if notify {
            let _ = self
                .dispatch_client_callback(
                    callbacks::SLASH_COMMAND_NOT_FOUND,
                    CallbackArgs::Slash(Arc::clone(ctx)),
                    true,
                )
                .await;
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("alive", &self.is_alive())
            .field("components", &self.components.read().len())
            .field("prefixes", &*self.prefixes.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{MessageCommand, SlashCommand};
    use crate::injectable::Context;
    use herald_core::CommandError;
    use crate::testing::{
        MockCache, MockEventSource, MockInteractionServer, MockRest, dm_event, interaction_event,
        message_event, own_user,
    };
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct Harness {
        rest: Arc<MockRest>,
        events: Arc<MockEventSource>,
        server: Arc<MockInteractionServer>,
        client: Arc<Client>,
    }

    fn builder_with(rest: &Arc<MockRest>, events: &Arc<MockEventSource>) -> ClientBuilder {
        ClientBuilder::new(Arc::clone(rest) as SharedRestClient)
            .event_source(Arc::clone(events) as SharedEventSource)
    }

    fn harness(configure: impl FnOnce(ClientBuilder) -> ClientBuilder) -> Harness {
        let rest = Arc::new(MockRest::default());
        let events = Arc::new(MockEventSource::default());
        let server = Arc::new(MockInteractionServer::default());
        let client = configure(
            builder_with(&rest, &events)
                .interaction_server(Arc::clone(&server) as SharedInteractionServer)
                .prefix("!"),
        )
        .build()
        .unwrap();
        Harness {
            rest,
            events,
            server,
            client,
        }
    }

    fn ping_component() -> Component {
        Component::new("general").with_message_command(MessageCommand::new(
            "ping",
            |ctx: Arc<MessageContext>| async move { ctx.respond("pong".into()).await },
        ))
    }

    fn not_found_counter(client: &Arc<Client>, name: &str) -> Arc<AtomicUsize> {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        client.add_client_callback(
            name,
            ClientCallback::new(move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
        fired
    }

    #[tokio::test]
    async fn prefixed_message_executes_the_matching_command() {
        let h = harness(|b| b);
        h.client.add_component(ping_component()).unwrap();
        let not_found = not_found_counter(&h.client, callbacks::MESSAGE_COMMAND_NOT_FOUND);
        h.client.open().await.unwrap();

        h.events
            .emit(Event::Message(message_event(42, "!ping")))
            .await;

        assert_eq!(h.rest.messages(), vec![(42, "pong".to_string())]);
        assert_eq!(not_found.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn loaders_wire_commands_through_the_client() {
        struct GeneralModule;
        impl Loader for GeneralModule {
            fn load(&self, client: &Arc<Client>) -> Result<(), ConfigError> {
                client.add_component(ping_component())?;
                client.add_prefix("?");
                Ok(())
            }
        }

        let h = harness(|b| b);
        h.client.load(&GeneralModule).unwrap();
        h.client.open().await.unwrap();

        h.events
            .emit(Event::Message(message_event(9, "?ping")))
            .await;
        assert_eq!(h.rest.messages(), vec![(9, "pong".to_string())]);
    }

    #[tokio::test]
    async fn dispatch_futures_run_on_spawned_tasks() {
        let h = harness(|b| b);
        h.client
            .add_component(ping_component().with_slash_command(SlashCommand::new(
                "info",
                |ctx: Arc<SlashContext>| async move { ctx.respond("ok".into()).await },
            )))
            .unwrap();
        h.client.open().await.unwrap();

        // Dispatch entry points must stay spawnable as independent tasks.
        let client = Arc::clone(&h.client);
        tokio::spawn(async move { client.on_message_create(message_event(42, "!ping")).await })
            .await
            .unwrap();
        let client = Arc::clone(&h.client);
        tokio::spawn(async move { client.on_interaction_create(interaction_event("info")).await })
            .await
            .unwrap();

        assert_eq!(h.rest.messages(), vec![(42, "pong".to_string())]);
        assert_eq!(h.rest.initial_responses().len(), 1);
    }

    #[tokio::test]
    async fn unprefixed_message_fires_not_found_without_responding() {
        let h = harness(|b| b);
        h.client.add_component(ping_component()).unwrap();
        let not_found = not_found_counter(&h.client, callbacks::MESSAGE_COMMAND_NOT_FOUND);
        h.client.open().await.unwrap();

        h.events.emit(Event::Message(message_event(42, "ping"))).await;

        assert!(h.rest.messages().is_empty());
        assert_eq!(not_found.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_command_fires_not_found_only() {
        let h = harness(|b| b);
        h.client.add_component(ping_component()).unwrap();
        let not_found = not_found_counter(&h.client, callbacks::MESSAGE_COMMAND_NOT_FOUND);
        h.client.open().await.unwrap();

        h.events
            .emit(Event::Message(message_event(42, "!pong")))
            .await;

        assert!(h.rest.messages().is_empty());
        assert_eq!(not_found.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_global_check_is_silent() {
        let h = harness(|b| b);
        h.client.add_component(ping_component()).unwrap();
        h.client.add_check(InjectableCheck::new(|_| false));
        let not_found = not_found_counter(&h.client, callbacks::MESSAGE_COMMAND_NOT_FOUND);
        h.client.open().await.unwrap();

        h.events
            .emit(Event::Message(message_event(42, "!ping")))
            .await;

        assert!(h.rest.messages().is_empty());
        assert_eq!(not_found.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn command_error_from_check_is_relayed() {
        let h = harness(|b| b);
        h.client.add_component(ping_component()).unwrap();
        h.client.add_check(InjectableCheck::new_async(|_| async {
            Err(CommandError::new("no access").into())
        }));
        h.client.open().await.unwrap();

        h.events
            .emit(Event::Message(message_event(42, "!ping")))
            .await;

        assert_eq!(h.rest.messages(), vec![(42, "no access".to_string())]);
    }

    #[tokio::test]
    async fn human_only_drops_bot_messages() {
        let h = harness(|b| b);
        h.client.add_component(ping_component()).unwrap();
        h.client.set_human_only(true);
        h.client.open().await.unwrap();

        let mut event = message_event(42, "!ping");
        event.author.is_bot = true;
        h.events.emit(Event::Message(event)).await;
        assert!(h.rest.messages().is_empty());

        h.client.set_human_only(false);
        let mut event = message_event(42, "!ping");
        event.author.is_bot = true;
        h.events.emit(Event::Message(event)).await;
        assert_eq!(h.rest.messages().len(), 1);
    }

    #[tokio::test]
    async fn accepts_dm_only_skips_guild_subscriptions() {
        let rest = Arc::new(MockRest::default());
        let events = Arc::new(MockEventSource::default());
        let client = builder_with(&rest, &events)
            .accepts(MessageAccepts::DmOnly)
            .prefix("!")
            .build()
            .unwrap();
        client.add_component(ping_component()).unwrap();
        client.open().await.unwrap();

        assert!(
            !events
                .subscribed_kinds()
                .contains(&EventKind::GuildMessageCreate)
        );

        events.emit(Event::Message(dm_event("!ping"))).await;
        assert_eq!(rest.messages().len(), 1);
    }

    #[tokio::test]
    async fn accepts_without_source_is_rejected() {
        let rest = Arc::new(MockRest::default());
        let err = ClientBuilder::new(rest as SharedRestClient)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::AcceptsWithoutSource));

        let rest = Arc::new(MockRest::default());
        let err = ClientBuilder::new(rest as SharedRestClient)
            .accepts(MessageAccepts::None)
            .event_managed(true)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::EventManagedWithoutSource));
    }

    #[tokio::test]
    async fn prefix_getter_is_tried_before_static_prefixes() {
        let h = harness(|b| b);
        h.client.add_component(ping_component()).unwrap();
        h.client.set_prefix_getter(Some(Arc::new(|_| {
            Box::pin(async { vec!["?".to_string()] })
        })));
        h.client.open().await.unwrap();

        h.events
            .emit(Event::Message(message_event(42, "?ping")))
            .await;
        h.events
            .emit(Event::Message(message_event(42, "!ping")))
            .await;

        assert_eq!(h.rest.messages().len(), 2);
    }

    #[tokio::test]
    async fn open_is_not_reentrant_and_close_requires_alive() {
        let h = harness(|b| b);
        assert!(matches!(
            h.client.close().await.unwrap_err(),
            LifecycleError::NotAlive
        ));
        h.client.open().await.unwrap();
        assert!(matches!(
            h.client.open().await.unwrap_err(),
            LifecycleError::AlreadyAlive
        ));
        h.client.close().await.unwrap();
        assert!(!h.client.is_alive());
        assert_eq!(h.events.subscription_count(), 0);
    }

    #[tokio::test]
    async fn failing_starting_callback_aborts_open() {
        let h = harness(|b| b);
        h.client.add_client_callback(
            callbacks::STARTING,
            ClientCallback::new(|_| async { Err("config missing".into()) }),
        );

        let err = h.client.open().await.unwrap_err();
        assert!(matches!(err, LifecycleError::StartingCallback(_)));
        assert!(!h.client.is_alive());
        assert_eq!(h.events.subscription_count(), 0);
    }

    #[tokio::test]
    async fn mention_prefixes_come_from_the_cache_when_available() {
        let rest = Arc::new(MockRest::default());
        let events = Arc::new(MockEventSource::default());
        let client = builder_with(&rest, &events)
            .cache(Arc::new(MockCache::with_own_user(own_user())) as SharedCache)
            .mention_prefix(true)
            .build()
            .unwrap();
        client.open().await.unwrap();

        assert_eq!(rest.fetch_calls(), 0);
        assert!(client.prefixes().contains(&"<@777>".to_string()));
        assert!(client.prefixes().contains(&"<@!777>".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn own_user_fetch_retries_transient_failures() {
        let rest = Arc::new(MockRest::default());
        rest.queue_own_user(Err(RestError::ServerError { status: 502 }));
        rest.queue_own_user(Err(RestError::RateLimited {
            retry_after: Duration::from_secs(1),
        }));
        let events = Arc::new(MockEventSource::default());
        let client = builder_with(&rest, &events)
            .mention_prefix(true)
            .build()
            .unwrap();
        client.open().await.unwrap();

        assert_eq!(rest.fetch_calls(), 3);
        assert!(client.prefixes().contains(&"<@777>".to_string()));
    }

    #[tokio::test]
    async fn own_user_fetch_gives_up_on_fatal_errors() {
        let rest = Arc::new(MockRest::default());
        rest.queue_own_user(Err(RestError::Unauthorized));
        let events = Arc::new(MockEventSource::default());
        let client = builder_with(&rest, &events)
            .mention_prefix(true)
            .build()
            .unwrap();

        let err = client.open().await.unwrap_err();
        assert!(matches!(err, LifecycleError::Rest(RestError::Unauthorized)));
        assert!(!client.is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn event_managed_client_follows_the_source_lifecycle() {
        let rest = Arc::new(MockRest::default());
        let events = Arc::new(MockEventSource::default());
        let client = builder_with(&rest, &events)
            .event_managed(true)
            .build()
            .unwrap();

        events.emit(Event::SourceStarting).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(client.is_alive());

        events.emit(Event::SourceClosing).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!client.is_alive());
    }

    #[tokio::test]
    async fn removing_a_component_mid_flight_is_safe() {
        let h = harness(|b| b);
        let gate = Arc::new(Notify::new());
        let release = Arc::clone(&gate);
        let component = h
            .client
            .add_component(Component::new("slow").with_message_command(MessageCommand::new(
                "ping",
                move |ctx: Arc<MessageContext>| {
                    let gate = Arc::clone(&release);
                    async move {
                        gate.notified().await;
                        ctx.respond("pong".into()).await
                    }
                },
            )))
            .unwrap();
        h.client.open().await.unwrap();

        let events = Arc::clone(&h.events);
        let dispatch =
            tokio::spawn(
                async move { events.emit(Event::Message(message_event(42, "!ping"))).await },
            );

        tokio::task::yield_now().await;
        h.client.remove_component(&component);
        gate.notify_one();
        dispatch.await.unwrap();

        assert_eq!(h.rest.messages(), vec![(42, "pong".to_string())]);
    }

    #[tokio::test]
    async fn gateway_interaction_executes_the_slash_command() {
        let h = harness(|b| b);
        h.client
            .add_component(Component::new("general").with_slash_command(SlashCommand::new(
                "ping",
                |ctx: Arc<SlashContext>| async move { ctx.respond("pong".into()).await },
            )))
            .unwrap();
        h.client.open().await.unwrap();

        h.events
            .emit(Event::Interaction(interaction_event("ping")))
            .await;

        assert_eq!(
            h.rest.initial_responses(),
            vec![InteractionResponse::Message {
                content: "pong".into()
            }]
        );
    }

    #[tokio::test]
    async fn unknown_interaction_resolves_not_found() {
        let h = harness(|b| b);
        h.client.add_component(ping_component()).unwrap();
        let not_found = not_found_counter(&h.client, callbacks::SLASH_COMMAND_NOT_FOUND);
        h.client.open().await.unwrap();

        h.events
            .emit(Event::Interaction(interaction_event("missing")))
            .await;

        assert_eq!(
            h.rest.initial_responses(),
            vec![InteractionResponse::NotFound {
                content: Some("Command not found".into())
            }]
        );
        assert_eq!(not_found.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn direct_request_returns_the_initial_response() {
        let h = harness(|b| b);
        h.client
            .add_component(Component::new("general").with_slash_command(SlashCommand::new(
                "ping",
                |ctx: Arc<SlashContext>| async move { ctx.respond("pong".into()).await },
            )))
            .unwrap();
        h.client.open().await.unwrap();

        let response = h.server.request(interaction_event("ping")).await.unwrap();
        assert_eq!(
            response,
            InteractionResponse::Message {
                content: "pong".into()
            }
        );
    }

    #[tokio::test]
    async fn direct_request_for_unknown_command_still_resolves() {
        let h = harness(|b| b);
        h.client.open().await.unwrap();

        let response = h.server.request(interaction_event("missing")).await.unwrap();
        assert_eq!(
            response,
            InteractionResponse::NotFound {
                content: Some("Command not found".into())
            }
        );
    }

    #[tokio::test]
    async fn direct_request_resolves_even_when_the_command_never_responds() {
        let h = harness(|b| b);
        h.client
            .add_component(Component::new("general").with_slash_command(SlashCommand::new(
                "quiet",
                |_ctx: Arc<SlashContext>| async move { Ok(()) },
            )))
            .unwrap();
        h.client.open().await.unwrap();

        let response = h.server.request(interaction_event("quiet")).await.unwrap();
        assert_eq!(response, InteractionResponse::NotFound { content: None });
    }

    #[tokio::test(start_paused = true)]
    async fn slow_slash_command_is_auto_deferred() {
        let h = harness(|b| b);
        h.client
            .add_component(Component::new("general").with_slash_command(SlashCommand::new(
                "slow",
                |ctx: Arc<SlashContext>| async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    ctx.respond("done".into()).await
                },
            )))
            .unwrap();
        h.client.open().await.unwrap();

        h.events
            .emit(Event::Interaction(interaction_event("slow")))
            .await;

        assert_eq!(
            h.rest.initial_responses(),
            vec![InteractionResponse::Deferred]
        );
        assert_eq!(h.rest.followups(), vec!["done".to_string()]);
    }

    #[tokio::test]
    async fn components_are_tried_in_registration_order() {
        let h = harness(|b| b);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for name in ["first", "second"] {
            let sink = Arc::clone(&seen);
            h.client
                .add_component(Component::new(name).with_message_command(MessageCommand::new(
                    "ping",
                    move |_| {
                        sink.lock().push(name);
                        async { Ok(()) }
                    },
                )))
                .unwrap();
        }
        h.client.open().await.unwrap();

        h.events
            .emit(Event::Message(message_event(42, "!ping")))
            .await;
        assert_eq!(*seen.lock(), vec!["first"]);
    }

    #[tokio::test]
    async fn components_added_while_alive_start_immediately() {
        let h = harness(|b| b);
        h.client.open().await.unwrap();
        let component = h.client.add_component(ping_component()).unwrap();
        assert!(component.is_started());

        h.events
            .emit(Event::Message(message_event(42, "!ping")))
            .await;
        assert_eq!(h.rest.messages().len(), 1);
    }

    #[tokio::test]
    async fn check_name_lookups_search_every_component() {
        let h = harness(|b| b);
        h.client.add_component(ping_component()).unwrap();
        h.client
            .add_component(Component::new("slash").with_slash_command(SlashCommand::new(
                "info",
                |_ctx: Arc<SlashContext>| async move { Ok(()) },
            )))
            .unwrap();

        assert_eq!(h.client.check_message_name("ping").len(), 1);
        assert!(h.client.check_message_name("pong").is_empty());
        assert!(h.client.check_slash_name("info").is_some());
        assert!(h.client.check_slash_name("ping").is_none());
    }
}
