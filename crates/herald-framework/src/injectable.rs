//! Injectable callbacks and check evaluation.
//!
//! An injectable callback pairs a user closure with the
//! [`CallbackDescriptor`] naming the dependencies it needs; invoking it
//! resolves the descriptor against the client's [`Injector`] first and hands
//! the values to the closure. [`InjectableCheck`] is the boolean flavour used
//! for command, component and client checks, and [`gather_checks`] is the
//! AND-gate the dispatch paths run before executing a command.

use std::any::Any;
use std::sync::Arc;

use futures::future::BoxFuture;
use herald_core::{DispatchError, DispatchResult, User};

use crate::injector::{CallbackDescriptor, CallbackId, Injector, ResolvedArgs};

/// The context surface shared by message and slash execution.
///
/// Checks and other generic callbacks see commands through this trait so one
/// check can guard both command flavours.
#[async_trait::async_trait]
pub trait Context: Send + Sync + 'static {
    /// The user who triggered the command.
    fn author(&self) -> &User;

    fn channel_id(&self) -> u64;

    /// `None` outside of a guild.
    fn guild_id(&self) -> Option<u64>;

    /// The name the command was triggered under, once matching has resolved
    /// it.
    fn triggering_name(&self) -> String;

    /// Sends a response: a channel message for message commands, the initial
    /// response or a followup for slash commands.
    async fn respond(&self, content: String) -> DispatchResult<()>;

    fn as_any(&self) -> &dyn Any;

    fn is_human(&self) -> bool {
        !self.author().is_bot
    }
}

/// A shared, type-erased execution context.
pub type AnyContext = Arc<dyn Context>;

type ValueFn<T> =
    Arc<dyn Fn(AnyContext, ResolvedArgs) -> BoxFuture<'static, DispatchResult<T>> + Send + Sync>;

/// A callback producing a `T`, with declared dependencies.
pub struct InjectableValue<T> {
    id: CallbackId,
    descriptor: CallbackDescriptor,
    callback: ValueFn<T>,
}

impl<T: Send + 'static> InjectableValue<T> {
    /// Wraps an async callback with no dependencies.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(AnyContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<T>> + Send + 'static,
    {
        Self {
            id: CallbackId::next(),
            descriptor: CallbackDescriptor::new(),
            callback: Arc::new(move |ctx, _args| Box::pin(f(ctx))),
        }
    }

    /// Wraps an async callback that receives resolved dependencies.
    pub fn with_dependencies<F, Fut>(descriptor: CallbackDescriptor, f: F) -> Self
    where
        F: Fn(AnyContext, ResolvedArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<T>> + Send + 'static,
    {
        Self {
            id: CallbackId::next(),
            descriptor,
            callback: Arc::new(move |ctx, args| Box::pin(f(ctx, args))),
        }
    }

    pub fn id(&self) -> CallbackId {
        self.id
    }

    /// Resolves the descriptor and invokes the callback.
    pub async fn call(&self, injector: &Injector, ctx: AnyContext) -> DispatchResult<T> {
        let args = self
            .resolve(injector)
            .await
            .map_err(DispatchError::unexpected)?;
        (self.callback)(ctx, args).await
    }

    async fn resolve(&self, injector: &Injector) -> Result<ResolvedArgs, crate::injector::InjectError> {
        if self.descriptor.is_empty() {
            Ok(ResolvedArgs::default())
        } else {
            injector.resolve_descriptor(&self.descriptor).await
        }
    }
}

impl<T> Clone for InjectableValue<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            descriptor: self.descriptor.clone(),
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<T> std::fmt::Debug for InjectableValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InjectableValue")
            .field("id", &self.id)
            .finish()
    }
}

/// A boolean check gating command execution.
///
/// Clones share the original's identity so a check registered on multiple
/// owners can still be removed by value.
#[derive(Clone)]
pub struct InjectableCheck {
    inner: InjectableValue<bool>,
}

impl InjectableCheck {
    /// A synchronous check.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&dyn Context) -> bool + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self {
            inner: InjectableValue::new(move |ctx: AnyContext| {
                let f = Arc::clone(&f);
                async move { Ok(f(ctx.as_ref())) }
            }),
        }
    }

    /// An asynchronous check. May fail with [`DispatchError::Command`] to
    /// respond with the error message, or [`DispatchError::Halt`] to stop
    /// dispatch silently.
    pub fn new_async<F, Fut>(f: F) -> Self
    where
        F: Fn(AnyContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<bool>> + Send + 'static,
    {
        Self {
            inner: InjectableValue::new(f),
        }
    }

    /// A check that receives resolved dependencies.
    pub fn with_dependencies<F, Fut>(descriptor: CallbackDescriptor, f: F) -> Self
    where
        F: Fn(AnyContext, ResolvedArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<bool>> + Send + 'static,
    {
        Self {
            inner: InjectableValue::with_dependencies(descriptor, f),
        }
    }

    pub fn id(&self) -> CallbackId {
        self.inner.id()
    }

    pub async fn call(&self, injector: &Injector, ctx: AnyContext) -> DispatchResult<bool> {
        self.inner.call(injector, ctx).await
    }
}

impl std::fmt::Debug for InjectableCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InjectableCheck")
            .field("id", &self.id())
            .finish()
    }
}

/// Evaluates `checks` in registration order, short-circuiting on the first
/// `false`. Errors propagate to the caller unchanged.
pub async fn gather_checks(
    injector: &Injector,
    ctx: &AnyContext,
    checks: impl IntoIterator<Item = InjectableCheck>,
) -> DispatchResult<bool> {
    for check in checks {
        if !check.call(injector, Arc::clone(ctx)).await? {
            return Ok(false);
        }
    }
    Ok(true)
}
