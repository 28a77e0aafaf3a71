//! Execution hooks.
//!
//! [`Hooks`] bundles the callbacks that run around a command invocation:
//! pre-execution (fallible, runs before the command callback), success,
//! error and post-execution. Client, component and command each carry an
//! optional hooks object; at dispatch time they are merged into a
//! [`HookSet`] and triggered together.

use std::sync::Arc;

use futures::future::{BoxFuture, join_all};
use herald_core::{DispatchError, DispatchResult};

use crate::injectable::AnyContext;

type PreHookFn =
    Arc<dyn Fn(AnyContext) -> BoxFuture<'static, DispatchResult<()>> + Send + Sync>;
type NotifyHookFn = Arc<dyn Fn(AnyContext) -> BoxFuture<'static, ()> + Send + Sync>;
type ErrorHookFn =
    Arc<dyn Fn(AnyContext, Arc<DispatchError>) -> BoxFuture<'static, ()> + Send + Sync>;

/// A set of callbacks run around command execution.
#[derive(Default)]
pub struct Hooks {
    pre_execution: Vec<PreHookFn>,
    on_success: Vec<NotifyHookFn>,
    on_error: Vec<ErrorHookFn>,
    post_execution: Vec<NotifyHookFn>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs before the command callback. An error here aborts execution and
    /// is handled like an error from the command itself.
    #[must_use]
    pub fn with_pre_execution<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(AnyContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<()>> + Send + 'static,
    {
        self.pre_execution.push(Arc::new(move |ctx| Box::pin(f(ctx))));
        self
    }

    /// Runs after the command callback returned successfully.
    #[must_use]
    pub fn with_on_success<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(AnyContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_success.push(Arc::new(move |ctx| Box::pin(f(ctx))));
        self
    }

    /// Runs when the command callback failed unexpectedly. Expected
    /// outcomes ([`DispatchError::Command`] and [`DispatchError::Halt`]) do
    /// not reach error hooks.
    #[must_use]
    pub fn with_on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(AnyContext, Arc<DispatchError>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_error
            .push(Arc::new(move |ctx, error| Box::pin(f(ctx, error))));
        self
    }

    /// Runs after every execution, regardless of outcome.
    #[must_use]
    pub fn with_post_execution<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(AnyContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.post_execution.push(Arc::new(move |ctx| Box::pin(f(ctx))));
        self
    }
}

/// The hooks objects that apply to one invocation, outermost first.
///
/// Duplicate objects (the same `Arc` registered at several levels) are
/// triggered once.
#[derive(Default, Clone)]
pub struct HookSet {
    sets: Vec<Arc<Hooks>>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hooks: Option<&Arc<Hooks>>) {
        if let Some(hooks) = hooks
            && !self.sets.iter().any(|known| Arc::ptr_eq(known, hooks))
        {
            self.sets.push(Arc::clone(hooks));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Runs all pre-execution hooks sequentially, stopping at the first
    /// error.
    pub async fn trigger_pre_execution(&self, ctx: &AnyContext) -> DispatchResult<()> {
        for hooks in &self.sets {
            for hook in &hooks.pre_execution {
                hook(Arc::clone(ctx)).await?;
            }
        }
        Ok(())
    }

    pub async fn trigger_success(&self, ctx: &AnyContext) {
        join_all(
            self.sets
                .iter()
                .flat_map(|hooks| &hooks.on_success)
                .map(|hook| hook(Arc::clone(ctx))),
        )
        .await;
    }

    pub async fn trigger_error(&self, ctx: &AnyContext, error: Arc<DispatchError>) {
        join_all(
            self.sets
                .iter()
                .flat_map(|hooks| &hooks.on_error)
                .map(|hook| hook(Arc::clone(ctx), Arc::clone(&error))),
        )
        .await;
    }

    pub async fn trigger_post_execution(&self, ctx: &AnyContext) {
        join_all(
            self.sets
                .iter()
                .flat_map(|hooks| &hooks.post_execution)
                .map(|hook| hook(Arc::clone(ctx))),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injectable::Context;
    use herald_core::{CommandError, User};
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullContext(User);

    #[async_trait::async_trait]
    impl Context for NullContext {
        fn author(&self) -> &User {
            &self.0
        }

        fn channel_id(&self) -> u64 {
            0
        }

        fn guild_id(&self) -> Option<u64> {
            None
        }

        fn triggering_name(&self) -> String {
            String::new()
        }

        async fn respond(&self, _content: String) -> DispatchResult<()> {
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn ctx() -> AnyContext {
        Arc::new(NullContext(User {
            id: 1,
            username: "u".into(),
            is_bot: false,
        }))
    }

    #[tokio::test]
    async fn merged_sets_trigger_in_order_without_duplicates() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let shared = Arc::new(Hooks::new().with_on_success(move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let mut set = HookSet::new();
        set.push(Some(&shared));
        set.push(Some(&shared));
        set.push(None);
        set.trigger_success(&ctx()).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pre_execution_error_stops_remaining_hooks() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let hooks = Arc::new(
            Hooks::new()
                .with_pre_execution(|_| async { Err(CommandError::new("denied").into()) })
                .with_pre_execution(move |_| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
        );

        let mut set = HookSet::new();
        set.push(Some(&hooks));
        let err = set.trigger_pre_execution(&ctx()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Command(_)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn error_hooks_see_the_error() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let hooks = Arc::new(Hooks::new().with_on_error(move |_, error| {
            let counter = Arc::clone(&counter);
            async move {
                if matches!(*error, DispatchError::Unexpected(_)) {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }
        }));

        let mut set = HookSet::new();
        set.push(Some(&hooks));
        set.trigger_error(&ctx(), Arc::new(DispatchError::unexpected("boom")))
            .await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
