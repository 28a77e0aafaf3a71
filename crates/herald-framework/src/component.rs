//! Command components.
//!
//! A component groups commands, checks, hooks and event listeners into one
//! unit that can be added to and removed from a client as a whole, at
//! runtime. Dispatch iterates components in registration order; within a
//! component, commands are tried in registration order too.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use herald_core::{
    ConfigError, DispatchResult, EventKind, ListenerFn, ListenerHandle, SharedEventSource,
};

use crate::client::Client;
use crate::command::{CommandResult, MessageCommand, SlashCommand};
use crate::context::{MessageContext, SlashContext};
use crate::hooks::{HookSet, Hooks};
use crate::injectable::{AnyContext, InjectableCheck, gather_checks};
use crate::injector::{CallbackId, Injector, next_id};
use crate::registry::Registry;

struct ListenerEntry {
    kind: EventKind,
    callback: ListenerFn,
    handle: Option<ListenerHandle>,
}

/// A named group of commands with shared checks, hooks and listeners.
pub struct Component {
    id: u64,
    name: String,
    started: AtomicBool,
    bound: AtomicBool,
    source: RwLock<Option<SharedEventSource>>,
    self_ref: RwLock<Weak<Component>>,
    client: RwLock<Weak<Client>>,
    message_commands: RwLock<Registry<Arc<MessageCommand>>>,
    slash_commands: RwLock<Registry<Arc<SlashCommand>>>,
    checks: RwLock<Registry<InjectableCheck>>,
    hooks: RwLock<Option<Arc<Hooks>>>,
    listeners: RwLock<Vec<ListenerEntry>>,
}

impl Component {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: next_id(),
            name: name.into(),
            started: AtomicBool::new(false),
            bound: AtomicBool::new(false),
            source: RwLock::new(None),
            self_ref: RwLock::new(Weak::new()),
            client: RwLock::new(Weak::new()),
            message_commands: RwLock::new(Registry::new()),
            slash_commands: RwLock::new(Registry::new()),
            checks: RwLock::new(Registry::new()),
            hooks: RwLock::new(None),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn key(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    // ─── Builders ────────────────────────────────────────────────────────────

    #[must_use]
    pub fn with_message_command(self, command: MessageCommand) -> Self {
        self.add_message_command(command);
        self
    }

    #[must_use]
    pub fn with_slash_command(self, command: SlashCommand) -> Self {
        self.add_slash_command(command);
        self
    }

    #[must_use]
    pub fn with_check(self, check: InjectableCheck) -> Self {
        self.add_check(check);
        self
    }

    #[must_use]
    pub fn with_hooks(self, hooks: Arc<Hooks>) -> Self {
        *self.hooks.write() = Some(hooks);
        self
    }

    #[must_use]
    pub fn with_listener(self, kind: EventKind, callback: ListenerFn) -> Self {
        self.add_listener(kind, callback);
        self
    }

    // ─── Registries ──────────────────────────────────────────────────────────

    pub fn add_message_command(&self, command: MessageCommand) -> Arc<MessageCommand> {
        let command = Arc::new(command);
        if let Some(this) = self.self_ref.read().upgrade() {
            command.bind_component(&this);
        }
        self.message_commands
            .write()
            .insert(command.id().raw(), Arc::clone(&command));
        command
    }

    pub fn remove_message_command(&self, id: CallbackId) -> Option<Arc<MessageCommand>> {
        let removed = self.message_commands.write().remove(id.raw())?;
        removed.unbind_component();
        Some(removed)
    }

    pub fn add_slash_command(&self, command: SlashCommand) -> Arc<SlashCommand> {
        let command = Arc::new(command);
        if let Some(this) = self.self_ref.read().upgrade() {
            command.bind_component(&this);
        }
        self.slash_commands
            .write()
            .insert(command.id().raw(), Arc::clone(&command));
        command
    }

    pub fn remove_slash_command(&self, id: CallbackId) -> Option<Arc<SlashCommand>> {
        let removed = self.slash_commands.write().remove(id.raw())?;
        removed.unbind_component();
        Some(removed)
    }

    pub fn add_check(&self, check: InjectableCheck) {
        self.checks.write().insert(check.id().raw(), check);
    }

    pub fn remove_check(&self, id: CallbackId) -> bool {
        self.checks.write().remove(id.raw()).is_some()
    }

    /// Registers an event listener. Subscribed immediately when the
    /// component is already started.
    pub fn add_listener(&self, kind: EventKind, callback: ListenerFn) {
        let mut entry = ListenerEntry {
            kind,
            callback,
            handle: None,
        };
        if self.is_started()
            && let Some(source) = self.source.read().as_ref()
        {
            entry.handle = Some(source.subscribe(kind, Arc::clone(&entry.callback)));
        }
        self.listeners.write().push(entry);
    }

    /// Every message command triggered by `name`; overlapping aliases across
    /// commands are allowed, so there can be more than one.
    pub fn check_message_name(&self, name: &str) -> Vec<Arc<MessageCommand>> {
        self.message_commands
            .read()
            .iter()
            .filter(|command| command.check_name(name))
            .cloned()
            .collect()
    }

    /// The slash command declared under `name`, if any.
    pub fn check_slash_name(&self, name: &str) -> Option<Arc<SlashCommand>> {
        self.slash_commands
            .read()
            .iter()
            .find(|command| command.name() == name)
            .cloned()
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Binds this component to a client. A component belongs to at most one
    /// client at a time; `source` is absent for clients without an event
    /// source.
    pub(crate) fn bind(&self, source: Option<SharedEventSource>) -> Result<(), ConfigError> {
        if self.bound.swap(true, Ordering::SeqCst) {
            return Err(ConfigError::ComponentAlreadyBound {
                name: self.name.clone(),
            });
        }
        *self.source.write() = source;
        Ok(())
    }

    /// Records the shared handles so this component and its commands can
    /// back-reference their owners, and back-fills the commands already
    /// registered.
    pub(crate) fn attach_self(self: &Arc<Self>, client: &Arc<Client>) {
        *self.self_ref.write() = Arc::downgrade(self);
        *self.client.write() = Arc::downgrade(client);
        for command in self.message_commands.read().iter() {
            command.bind_component(self);
        }
        for command in self.slash_commands.read().iter() {
            command.bind_component(self);
        }
    }

    /// The client this component is registered on, while one is alive.
    pub fn client(&self) -> Option<Arc<Client>> {
        self.client.read().upgrade()
    }

    pub(crate) fn unbind(&self) {
        *self.source.write() = None;
        *self.client.write() = Weak::new();
        self.bound.store(false, Ordering::SeqCst);
    }

    /// Starts the component, subscribing its listeners. Idempotent.
    pub(crate) fn open(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(source) = self.source.read().as_ref() {
            for entry in self.listeners.write().iter_mut() {
                if entry.handle.is_none() {
                    entry.handle = Some(source.subscribe(entry.kind, Arc::clone(&entry.callback)));
                }
            }
        }
        debug!(component = %self.name, "component started");
    }

    /// Stops the component, unsubscribing its listeners. Idempotent.
    /// Executions already in flight keep their snapshot and finish
    /// normally.
    pub(crate) fn close(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(source) = self.source.read().as_ref() {
            for entry in self.listeners.write().iter_mut() {
                if let Some(handle) = entry.handle.take() {
                    source.unsubscribe(handle);
                }
            }
        }
        debug!(component = %self.name, "component closed");
    }

    // ─── Dispatch ────────────────────────────────────────────────────────────

    /// Tries this component's message commands against the context.
    ///
    /// Returns `Ok(true)` once a command has been found and executed.
    /// A component that is not started, or whose own checks fail, yields
    /// zero candidates and returns `Ok(false)` so dispatch moves on.
    pub async fn execute_message(
        &self,
        injector: &Injector,
        ctx: Arc<MessageContext>,
        mut hooks: HookSet,
    ) -> DispatchResult<bool> {
        if !self.is_started() {
            return Ok(false);
        }

        let any: AnyContext = Arc::clone(&ctx) as AnyContext;
        let checks = self.checks.read().snapshot();
        if !gather_checks(injector, &any, checks).await? {
            return Ok(false);
        }

        let content = ctx.content();
        let commands = self.message_commands.read().snapshot();
        for command in commands {
            let Some(name) = command.match_content(&content).map(str::to_owned) else {
                continue;
            };
            if !command.check_context(injector, &ctx).await? {
                continue;
            }

            ctx.set_triggering_name(name.clone());
            ctx.set_content(content[name.len()..].trim_start().to_owned());
            ctx.set_command(Arc::clone(&command));
            hooks.push(self.hooks.read().as_ref());
            debug!(component = %self.name, command = %name, "executing message command");
            command.execute(injector, ctx, hooks).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Tries this component's slash commands against the context.
    ///
    /// On a match the execution is spawned as its own task so the caller can
    /// answer the transport without waiting for the command body; the
    /// returned handle resolves with the execution outcome.
    pub async fn execute_interaction(
        &self,
        injector: &Injector,
        ctx: Arc<SlashContext>,
        mut hooks: HookSet,
    ) -> DispatchResult<Option<JoinHandle<CommandResult>>> {
        if !self.is_started() {
            return Ok(None);
        }

        let Some(command) = self.check_slash_name(&ctx.event().command_name) else {
            return Ok(None);
        };

        let any: AnyContext = Arc::clone(&ctx) as AnyContext;
        let checks = self.checks.read().snapshot();
        if !gather_checks(injector, &any, checks).await? {
            return Ok(None);
        }
        if !command.check_context(injector, &ctx).await? {
            return Ok(None);
        }

        hooks.push(self.hooks.read().as_ref());
        ctx.set_command(Arc::clone(&command));
        debug!(component = %self.name, command = %command.name(), "executing slash command");
        let injector = injector.clone();
        Ok(Some(tokio::spawn(async move {
            command.execute(&injector, ctx, hooks).await
        })))
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("started", &self.is_started())
            .field("message_commands", &self.message_commands.read().len())
            .field("slash_commands", &self.slash_commands.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientBuilder, MessageAccepts};
    use crate::injectable::Context;
    use crate::testing::{MockEventSource, MockRest, interaction_event, message_event};
    use herald_core::SharedRestClient;
    use std::sync::atomic::AtomicUsize;

    fn message_ctx(content: &str) -> Arc<MessageContext> {
        Arc::new(MessageContext::new(
            Arc::new(MockRest::default()) as SharedRestClient,
            message_event(1, content),
            content.to_owned(),
            "!".into(),
        ))
    }

    fn started(component: Component) -> Component {
        component.open();
        component
    }

    #[tokio::test]
    async fn unstarted_component_yields_no_candidates() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let component = Component::new("general")
            .with_check(InjectableCheck::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }))
            .with_message_command(MessageCommand::new("ping", |_| async { Ok(()) }));

        let found = component
            .execute_message(&Injector::new(), message_ctx("ping"), HookSet::new())
            .await
            .unwrap();
        assert!(!found);
        // Not even the component checks ran.
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn matching_command_gets_the_stripped_remainder() {
        let seen = Arc::new(parking_lot::Mutex::new(String::new()));
        let sink = Arc::clone(&seen);
        let component = started(Component::new("general").with_message_command(
            MessageCommand::new("echo", move |ctx: Arc<MessageContext>| {
                let sink = Arc::clone(&sink);
                async move {
                    *sink.lock() = format!("{}:{}", ctx.triggering_name(), ctx.content());
                    Ok(())
                }
            }),
        ));

        let found = component
            .execute_message(&Injector::new(), message_ctx("echo  hello there"), HookSet::new())
            .await
            .unwrap();
        assert!(found);
        assert_eq!(*seen.lock(), "echo:hello there");
    }

    #[tokio::test]
    async fn component_check_failure_skips_every_command() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let component = started(
            Component::new("admin")
                .with_check(InjectableCheck::new(|_| false))
                .with_message_command(MessageCommand::new("ping", move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                })),
        );

        let found = component
            .execute_message(&Injector::new(), message_ctx("ping"), HookSet::new())
            .await
            .unwrap();
        assert!(!found);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn command_check_failure_falls_through_to_later_commands() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let first_sink = Arc::clone(&seen);
        let second_sink = Arc::clone(&seen);
        let component = started(
            Component::new("general")
                .with_message_command(
                    MessageCommand::new("ping", move |_| {
                        first_sink.lock().push("guarded");
                        async { Ok(()) }
                    })
                    .with_check(InjectableCheck::new(|_| false)),
                )
                .with_message_command(MessageCommand::new("ping", move |_| {
                    second_sink.lock().push("open");
                    async { Ok(()) }
                })),
        );

        let found = component
            .execute_message(&Injector::new(), message_ctx("ping"), HookSet::new())
            .await
            .unwrap();
        assert!(found);
        assert_eq!(*seen.lock(), vec!["open"]);
    }

    #[tokio::test]
    async fn slash_match_is_exact_and_spawned() {
        let component = started(Component::new("general").with_slash_command(
            SlashCommand::new("ping", |ctx: Arc<SlashContext>| async move {
                ctx.respond("pong".into()).await
            }),
        ));

        let rest = Arc::new(MockRest::default());
        let ctx = SlashContext::gateway(
            Arc::clone(&rest) as SharedRestClient,
            interaction_event("ping"),
        );
        let task = component
            .execute_interaction(&Injector::new(), ctx, HookSet::new())
            .await
            .unwrap()
            .unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(rest.initial_responses().len(), 1);

        let ctx = SlashContext::gateway(
            Arc::new(MockRest::default()) as SharedRestClient,
            interaction_event("pin"),
        );
        let task = component
            .execute_interaction(&Injector::new(), ctx, HookSet::new())
            .await
            .unwrap();
        assert!(task.is_none());
    }

    #[tokio::test]
    async fn duplicate_binding_is_rejected() {
        let source = Arc::new(MockEventSource::default());
        let component = Component::new("general");
        component
            .bind(Some(Arc::clone(&source) as SharedEventSource))
            .unwrap();
        let err = component
            .bind(Some(source as SharedEventSource))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ComponentAlreadyBound { .. }));

        component.unbind();
        assert!(component.bind(None).is_ok());
    }

    #[tokio::test]
    async fn listeners_follow_the_component_lifecycle() {
        let source = Arc::new(MockEventSource::default());
        let component = Component::new("general").with_listener(
            EventKind::GuildMessageCreate,
            Arc::new(|_| Box::pin(async {})),
        );
        component
            .bind(Some(Arc::clone(&source) as SharedEventSource))
            .unwrap();
        assert_eq!(source.subscription_count(), 0);

        component.open();
        assert_eq!(source.subscription_count(), 1);

        component.close();
        assert_eq!(source.subscription_count(), 0);
    }

    #[test]
    fn commands_back_reference_their_owners_once_registered() {
        let component = Component::new("general")
            .with_message_command(MessageCommand::new("ping", |_| async { Ok(()) }));
        let early = component.check_message_name("ping").pop().unwrap();
        assert!(early.component().is_none());

        let client = ClientBuilder::new(Arc::new(MockRest::default()) as SharedRestClient)
            .accepts(MessageAccepts::None)
            .build()
            .unwrap();
        let component = client.add_component(component).unwrap();
        assert!(component.client().is_some());
        assert!(early.component().is_some_and(|owner| owner.name() == "general"));

        let late = component.add_slash_command(SlashCommand::new("info", |_| async { Ok(()) }));
        assert!(late.component().is_some());

        component.remove_message_command(early.id());
        assert!(early.component().is_none());

        client.remove_component(&component);
        assert!(component.client().is_none());
    }

    #[test]
    fn overlapping_aliases_all_surface_in_name_lookups() {
        let component = Component::new("general")
            .with_message_command(MessageCommand::new("status", |_| async { Ok(()) }).with_alias("s"))
            .with_message_command(MessageCommand::new("stats", |_| async { Ok(()) }).with_alias("s"));

        assert_eq!(component.check_message_name("s").len(), 2);
        assert_eq!(component.check_message_name("status").len(), 1);
        assert!(component.check_message_name("missing").is_empty());
    }
}
