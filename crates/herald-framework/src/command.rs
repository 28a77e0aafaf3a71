//! Message and slash command objects.
//!
//! A command pairs a callback with the metadata matching needs: trigger
//! names for message commands, the declared name for slash commands, plus
//! per-command checks and hooks. Commands are immutable once registered
//! except for their check and hook registries, which stay editable at
//! runtime.
//!
//! # Example
//!
//! ```rust,ignore
//! let ping = MessageCommand::new("ping", |ctx: Arc<MessageContext>| async move {
//!     ctx.respond("pong".into()).await
//! })
//! .with_alias("p")
//! .with_check(InjectableCheck::new(|ctx| ctx.is_human()));
//! ```

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tracing::error;

use herald_core::{CommandError, DispatchError, DispatchResult};

use crate::component::Component;
use crate::context::{MessageContext, SlashContext};
use crate::hooks::{HookSet, Hooks};
use crate::injectable::{AnyContext, InjectableCheck, gather_checks};
use crate::injector::{CallbackDescriptor, CallbackId, Injector, ResolvedArgs};
use crate::registry::Registry;

/// Outcome of one command callback.
pub type CommandResult = DispatchResult<()>;

type MessageCallback =
    Arc<dyn Fn(Arc<MessageContext>, ResolvedArgs) -> BoxFuture<'static, CommandResult> + Send + Sync>;
type SlashCallback =
    Arc<dyn Fn(Arc<SlashContext>, ResolvedArgs) -> BoxFuture<'static, CommandResult> + Send + Sync>;

/// Argument parser run before a message command's callback.
///
/// Implementations read [`MessageContext::content`] and surface failures as
/// [`CommandError`]s, which dispatch relays to the user.
#[async_trait]
pub trait Parser: Send + Sync {
    async fn parse(&self, ctx: &MessageContext) -> Result<(), CommandError>;
}

// =============================================================================
// Message commands
// =============================================================================

/// A prefix-triggered command.
pub struct MessageCommand {
    id: CallbackId,
    names: Vec<String>,
    callback: MessageCallback,
    descriptor: CallbackDescriptor,
    checks: RwLock<Registry<InjectableCheck>>,
    hooks: RwLock<Option<Arc<Hooks>>>,
    parser: RwLock<Option<Arc<dyn Parser>>>,
    component: RwLock<Weak<Component>>,
}

impl MessageCommand {
    /// A command with no declared dependencies.
    pub fn new<F, Fut>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(Arc<MessageContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResult> + Send + 'static,
    {
        Self::with_dependencies(name, CallbackDescriptor::new(), move |ctx, _args| {
            callback(ctx)
        })
    }

    /// A command whose callback receives resolved dependencies.
    pub fn with_dependencies<F, Fut>(
        name: impl Into<String>,
        descriptor: CallbackDescriptor,
        callback: F,
    ) -> Self
    where
        F: Fn(Arc<MessageContext>, ResolvedArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResult> + Send + 'static,
    {
        Self {
            id: CallbackId::next(),
            names: vec![name.into()],
            callback: Arc::new(move |ctx, args| Box::pin(callback(ctx, args))),
            descriptor,
            checks: RwLock::new(Registry::new()),
            hooks: RwLock::new(None),
            parser: RwLock::new(None),
            component: RwLock::new(Weak::new()),
        }
    }

    /// Adds an alternative trigger name. Aliases are tried after the primary
    /// name, in the order they were added.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        if !self.names.contains(&alias) {
            self.names.push(alias);
        }
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
    pub fn with_parser(self, parser: Arc<dyn Parser>) -> Self {
        *self.parser.write() = Some(parser);
        self
    }

    pub fn id(&self) -> CallbackId {
        self.id
    }

    /// The primary name followed by any aliases.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn add_check(&self, check: InjectableCheck) {
        self.checks.write().insert(check.id().raw(), check);
    }

    pub fn remove_check(&self, id: CallbackId) -> bool {
        self.checks.write().remove(id.raw()).is_some()
    }

    /// Whether this command is triggered by `name` (primary or alias).
    pub fn check_name(&self, name: &str) -> bool {
        self.names.iter().any(|known| known == name)
    }

    /// The component this command is registered on, while one is alive.
    pub fn component(&self) -> Option<Arc<Component>> {
        self.component.read().upgrade()
    }

    pub(crate) fn bind_component(&self, component: &Arc<Component>) {
        *self.component.write() = Arc::downgrade(component);
    }

    pub(crate) fn unbind_component(&self) {
        *self.component.write() = Weak::new();
    }

    /// Matches `content` against the trigger names and returns the matched
    /// name. A name only matches at a word boundary: the content is the name
    /// alone, or the name followed by whitespace.
    pub fn match_content<'a>(&'a self, content: &str) -> Option<&'a str> {
        self.names.iter().map(String::as_str).find(|name| {
            content.starts_with(name)
                && content[name.len()..]
                    .chars()
                    .next()
                    .is_none_or(char::is_whitespace)
        })
    }

    /// Runs this command's own checks.
    pub async fn check_context(
        &self,
        injector: &Injector,
        ctx: &Arc<MessageContext>,
    ) -> DispatchResult<bool> {
        let any: AnyContext = Arc::clone(ctx) as AnyContext;
        let checks = self.checks.read().snapshot();
        gather_checks(injector, &any, checks).await
    }

    /// Parses arguments, runs the hook pipeline and invokes the callback.
    ///
    /// [`DispatchError::Command`] and [`DispatchError::Halt`] propagate to
    /// the caller; unexpected failures are logged, reported to error hooks
    /// and contained here.
    pub async fn execute(
        &self,
        injector: &Injector,
        ctx: Arc<MessageContext>,
        mut hooks: HookSet,
    ) -> CommandResult {
        hooks.push(self.hooks.read().as_ref());
        let any: AnyContext = Arc::clone(&ctx) as AnyContext;

        let parser = self.parser.read().clone();
        if let Some(parser) = parser {
            parser.parse(&ctx).await?;
        }

        hooks.trigger_pre_execution(&any).await?;

        let args = injector
            .resolve_descriptor(&self.descriptor)
            .await
            .map_err(DispatchError::unexpected)?;
        let result = (self.callback)(Arc::clone(&ctx), args).await;

        let outcome = match result {
            Ok(()) => {
                hooks.trigger_success(&any).await;
                Ok(())
            }
            Err(err @ (DispatchError::Command(_) | DispatchError::Halt(_))) => Err(err),
            Err(err) => {
                error!(command = %self.names[0], error = %err, "message command failed");
                hooks.trigger_error(&any, Arc::new(err)).await;
                Ok(())
            }
        };
        hooks.trigger_post_execution(&any).await;
        outcome
    }
}

impl std::fmt::Debug for MessageCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCommand")
            .field("names", &self.names)
            .field("checks", &self.checks.read().len())
            .finish()
    }
}

// =============================================================================
// Slash commands
// =============================================================================

/// A declared slash command, matched by exact name.
pub struct SlashCommand {
    id: CallbackId,
    name: String,
    callback: SlashCallback,
    descriptor: CallbackDescriptor,
    checks: RwLock<Registry<InjectableCheck>>,
    hooks: RwLock<Option<Arc<Hooks>>>,
    component: RwLock<Weak<Component>>,
}

impl SlashCommand {
    pub fn new<F, Fut>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(Arc<SlashContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResult> + Send + 'static,
    {
        Self::with_dependencies(name, CallbackDescriptor::new(), move |ctx, _args| {
            callback(ctx)
        })
    }

    pub fn with_dependencies<F, Fut>(
        name: impl Into<String>,
        descriptor: CallbackDescriptor,
        callback: F,
    ) -> Self
    where
        F: Fn(Arc<SlashContext>, ResolvedArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResult> + Send + 'static,
    {
        Self {
            id: CallbackId::next(),
            name: name.into(),
            callback: Arc::new(move |ctx, args| Box::pin(callback(ctx, args))),
            descriptor,
            checks: RwLock::new(Registry::new()),
            hooks: RwLock::new(None),
            component: RwLock::new(Weak::new()),
        }
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

    pub fn id(&self) -> CallbackId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_check(&self, check: InjectableCheck) {
        self.checks.write().insert(check.id().raw(), check);
    }

    pub fn remove_check(&self, id: CallbackId) -> bool {
        self.checks.write().remove(id.raw()).is_some()
    }

    /// The component this command is registered on, while one is alive.
    pub fn component(&self) -> Option<Arc<Component>> {
        self.component.read().upgrade()
    }

    pub(crate) fn bind_component(&self, component: &Arc<Component>) {
        *self.component.write() = Arc::downgrade(component);
    }

    pub(crate) fn unbind_component(&self) {
        *self.component.write() = Weak::new();
    }

    pub async fn check_context(
        &self,
        injector: &Injector,
        ctx: &Arc<SlashContext>,
    ) -> DispatchResult<bool> {
        let any: AnyContext = Arc::clone(ctx) as AnyContext;
        let checks = self.checks.read().snapshot();
        gather_checks(injector, &any, checks).await
    }

    /// Runs the hook pipeline and invokes the callback. Mirrors
    /// [`MessageCommand::execute`], without the parsing stage.
    pub async fn execute(
        &self,
        injector: &Injector,
        ctx: Arc<SlashContext>,
        mut hooks: HookSet,
    ) -> CommandResult {
        hooks.push(self.hooks.read().as_ref());
        let any: AnyContext = Arc::clone(&ctx) as AnyContext;

        hooks.trigger_pre_execution(&any).await?;

        let args = injector
            .resolve_descriptor(&self.descriptor)
            .await
            .map_err(DispatchError::unexpected)?;
        let result = (self.callback)(Arc::clone(&ctx), args).await;

        let outcome = match result {
            Ok(()) => {
                hooks.trigger_success(&any).await;
                Ok(())
            }
            Err(err @ (DispatchError::Command(_) | DispatchError::Halt(_))) => Err(err),
            Err(err) => {
                error!(command = %self.name, error = %err, "slash command failed");
                hooks.trigger_error(&any, Arc::new(err)).await;
                Ok(())
            }
        };
        hooks.trigger_post_execution(&any).await;
        outcome
    }
}

impl std::fmt::Debug for SlashCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlashCommand")
            .field("name", &self.name)
            .field("checks", &self.checks.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockRest, message_event};
    use herald_core::SharedRestClient;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn message_ctx(content: &str) -> Arc<MessageContext> {
        Arc::new(MessageContext::new(
            Arc::new(MockRest::default()) as SharedRestClient,
            message_event(1, content),
            content.to_owned(),
            "!".into(),
        ))
    }

    #[test]
    fn match_content_requires_a_word_boundary() {
        let cmd = MessageCommand::new("ping", |_| async { Ok(()) }).with_alias("p");
        assert_eq!(cmd.match_content("ping"), Some("ping"));
        assert_eq!(cmd.match_content("ping arg"), Some("ping"));
        assert_eq!(cmd.match_content("p x"), Some("p"));
        assert_eq!(cmd.match_content("pingx"), None);
        assert_eq!(cmd.match_content("pong"), None);
    }

    #[tokio::test]
    async fn execute_runs_hooks_around_the_callback() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let trace = |label: &'static str| {
            let order = Arc::clone(&order);
            move || order.lock().push(label)
        };

        let pre = trace("pre");
        let success = trace("success");
        let post = trace("post");
        let body = trace("body");
        let hooks = Arc::new(
            Hooks::new()
                .with_pre_execution(move |_| {
                    pre();
                    async { Ok(()) }
                })
                .with_on_success(move |_| {
                    success();
                    async {}
                })
                .with_post_execution(move |_| {
                    post();
                    async {}
                }),
        );

        let cmd = MessageCommand::new("ping", move |_| {
            body();
            async { Ok(()) }
        })
        .with_hooks(hooks);

        cmd.execute(&Injector::new(), message_ctx("ping"), HookSet::new())
            .await
            .unwrap();
        assert_eq!(*order.lock(), vec!["pre", "body", "success", "post"]);
    }

    #[tokio::test]
    async fn parser_failure_propagates_as_command_error() {
        struct Rejecting;

        #[async_trait]
        impl Parser for Rejecting {
            async fn parse(&self, _ctx: &MessageContext) -> Result<(), CommandError> {
                Err(CommandError::new("expected an argument"))
            }
        }

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let cmd = MessageCommand::new("echo", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .with_parser(Arc::new(Rejecting));

        let err = cmd
            .execute(&Injector::new(), message_ctx("echo"), HookSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Command(_)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unexpected_failures_are_contained_and_reported() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let hooks = Arc::new(Hooks::new().with_on_error(move |_, _| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let cmd = MessageCommand::new("boom", |_| async {
            Err(DispatchError::unexpected("database gone"))
        })
        .with_hooks(hooks);

        cmd.execute(&Injector::new(), message_ctx("boom"), HookSet::new())
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn own_checks_gate_the_context() {
        let injector = Injector::new();
        let cmd = MessageCommand::new("admin", |_| async { Ok(()) })
            .with_check(InjectableCheck::new(|ctx| ctx.author().id == 0));
        assert!(!cmd.check_context(&injector, &message_ctx("admin")).await.unwrap());

        assert!(cmd.remove_check(open_check_id(&cmd)));
        assert!(cmd.check_context(&injector, &message_ctx("admin")).await.unwrap());
    }

    fn open_check_id(cmd: &MessageCommand) -> CallbackId {
        cmd.checks
            .read()
            .iter()
            .next()
            .map(|check| check.id())
            .unwrap()
    }

    #[tokio::test]
    async fn dependencies_reach_the_callback() {
        let injector = Injector::new();
        injector.add_type_dependency::<String>(crate::injector::Provider::value(
            "pong".to_string(),
        ));

        let seen = Arc::new(parking_lot::Mutex::new(String::new()));
        let sink = Arc::clone(&seen);
        let cmd = MessageCommand::with_dependencies(
            "ping",
            CallbackDescriptor::new().require::<String>(),
            move |_ctx, args: ResolvedArgs| {
                let sink = Arc::clone(&sink);
                async move {
                    let reply = args.require::<String>().map_err(DispatchError::unexpected)?;
                    *sink.lock() = (*reply).clone();
                    Ok(())
                }
            },
        );

        cmd.execute(&injector, message_ctx("ping"), HookSet::new())
            .await
            .unwrap();
        assert_eq!(*seen.lock(), "pong");
    }
}
