//! Dependency-injection container.
//!
//! The [`Injector`] maps abstract types to [`Provider`]s and resolves the
//! declared dependencies of a callback before it is invoked. Unlike
//! reflection-based containers, every injectable callback carries an explicit
//! [`CallbackDescriptor`] built at registration time listing the dependency
//! keys it needs; resolution walks that list, recursing into providers that
//! declare dependencies of their own.
//!
//! Providers are invoked fresh on every resolution. The container never
//! caches resolved values; a provider that wants caching implements it
//! itself.
//!
//! # Example
//!
//! ```rust,ignore
//! let injector = Injector::new();
//! injector.add_type_dependency::<Database>(Provider::new(|| Database::connect()));
//!
//! let descriptor = CallbackDescriptor::new().require::<Database>();
//! let args = injector.resolve_descriptor(&descriptor).await?;
//! let db: Arc<Database> = args.require::<Database>()?;
//! ```

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use parking_lot::RwLock;
use thiserror::Error;

/// A type-erased resolved value.
pub type BoxedValue = Arc<dyn Any + Send + Sync>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Errors raised during dependency resolution.
///
/// Both variants are configuration errors: they are raised at the first
/// resolution attempt, not at registration time, and are fatal to the call
/// that triggered them.
#[derive(Debug, Clone, Error)]
pub enum InjectError {
    /// A required dependency has no registered provider.
    #[error("no provider registered for dependency '{type_name}'")]
    MissingDependency { type_name: &'static str },

    /// Provider dependencies form a cycle.
    #[error("dependency cycle detected while resolving '{type_name}'")]
    DependencyCycle { type_name: &'static str },

    /// A provider produced a value of a different type than it was
    /// registered for.
    #[error("provider for '{type_name}' produced a mismatched type")]
    ProvidedTypeMismatch { type_name: &'static str },
}

/// Result type for injection operations.
pub type InjectResult<T> = Result<T, InjectError>;

// =============================================================================
// Dependency keys and descriptors
// =============================================================================

/// Identifies one dependency by its abstract type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DependencyKey {
    type_id: TypeId,
    type_name: &'static str,
}

impl DependencyKey {
    pub fn of<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// The explicit dependency list of an injectable callback, built once at
/// registration time and consulted at resolution time.
#[derive(Debug, Clone, Default)]
pub struct CallbackDescriptor {
    dependencies: Vec<DependencyKey>,
}

impl CallbackDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a dependency on a value of type `T`.
    #[must_use]
    pub fn require<T: 'static>(mut self) -> Self {
        self.dependencies.push(DependencyKey::of::<T>());
        self
    }

    pub fn dependencies(&self) -> &[DependencyKey] {
        &self.dependencies
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}

// =============================================================================
// Resolved arguments
// =============================================================================

/// The dependency values resolved for one callback invocation.
#[derive(Default, Clone)]
pub struct ResolvedArgs {
    values: HashMap<TypeId, BoxedValue>,
}

impl ResolvedArgs {
    fn insert_raw(&mut self, key: DependencyKey, value: BoxedValue) {
        self.values.insert(key.type_id, value);
    }

    /// Returns the resolved value of type `T`, if it was declared.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| Arc::clone(value).downcast::<T>().ok())
    }

    /// Like [`get`](Self::get) but failing with [`InjectError::MissingDependency`].
    pub fn require<T: Send + Sync + 'static>(&self) -> InjectResult<Arc<T>> {
        self.get::<T>().ok_or(InjectError::MissingDependency {
            type_name: type_name::<T>(),
        })
    }
}

impl std::fmt::Debug for ResolvedArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedArgs")
            .field("len", &self.values.len())
            .finish()
    }
}

// =============================================================================
// Providers
// =============================================================================

/// Identity of a registered provider, used for callback overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderId(u64);

/// Identity of an injectable callback. Shared by clones so registered
/// callbacks can be removed by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

impl CallbackId {
    pub(crate) fn next() -> Self {
        Self(next_id())
    }

    pub(crate) fn raw(self) -> u64 {
        self.0
    }
}

type ProviderFn = Arc<dyn Fn(ResolvedArgs) -> BoxFuture<'static, BoxedValue> + Send + Sync>;

/// A provider callable registered for an abstract type key.
///
/// Providers may declare dependencies of their own, which are resolved
/// recursively before the provider runs.
#[derive(Clone)]
pub struct Provider {
    id: ProviderId,
    descriptor: CallbackDescriptor,
    call: ProviderFn,
}

impl Provider {
    /// A provider computed synchronously with no dependencies.
    pub fn new<T, F>(f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            id: ProviderId(next_id()),
            descriptor: CallbackDescriptor::new(),
            call: Arc::new(move |_args| {
                let value: BoxedValue = Arc::new(f());
                Box::pin(async move { value })
            }),
        }
    }

    /// A provider that always yields a clone of `value`.
    pub fn value<T>(value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        Self::new(move || value.clone())
    }

    /// An asynchronous provider with no dependencies.
    pub fn new_async<T, F, Fut>(f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        Self {
            id: ProviderId(next_id()),
            descriptor: CallbackDescriptor::new(),
            call: Arc::new(move |_args| {
                let fut = f();
                Box::pin(async move { Arc::new(fut.await) as BoxedValue })
            }),
        }
    }

    /// A provider that itself declares dependencies; the resolved values are
    /// handed to `f`.
    pub fn with_dependencies<T, F>(descriptor: CallbackDescriptor, f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ResolvedArgs) -> T + Send + Sync + 'static,
    {
        Self {
            id: ProviderId(next_id()),
            descriptor,
            call: Arc::new(move |args| {
                let value: BoxedValue = Arc::new(f(&args));
                Box::pin(async move { value })
            }),
        }
    }

    pub fn id(&self) -> ProviderId {
        self.id
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.id)
            .field("dependencies", &self.descriptor.dependencies().len())
            .finish()
    }
}

// =============================================================================
// Injector
// =============================================================================

#[derive(Default)]
struct InjectorInner {
    type_dependencies: RwLock<HashMap<TypeId, Provider>>,
    callback_overrides: RwLock<HashMap<ProviderId, Provider>>,
}

/// The dependency-injection container.
///
/// Cheap to clone; all clones share the same registrations. Resolution is
/// read-heavy and safe to run concurrently: providers are invoked fresh per
/// call with no shared mutable resolution state.
#[derive(Default, Clone)]
pub struct Injector {
    inner: Arc<InjectorInner>,
}

impl Injector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or overwrites) the provider for the abstract type `T`.
    pub fn add_type_dependency<T: Send + Sync + 'static>(&self, provider: Provider) {
        self.inner
            .type_dependencies
            .write()
            .insert(TypeId::of::<T>(), provider);
    }

    /// Removes the provider for `T`, if any.
    pub fn remove_type_dependency<T: Send + Sync + 'static>(&self) -> Option<Provider> {
        self.inner.type_dependencies.write().remove(&TypeId::of::<T>())
    }

    /// Substitutes `replacement` wherever the provider identified by
    /// `original` would be invoked. Used to mock a dependency in tests.
    pub fn add_callback_override(&self, original: ProviderId, replacement: Provider) {
        self.inner
            .callback_overrides
            .write()
            .insert(original, replacement);
    }

    /// Removes a previously installed override.
    pub fn remove_callback_override(&self, original: ProviderId) -> Option<Provider> {
        self.inner.callback_overrides.write().remove(&original)
    }

    /// Resolves every dependency declared by `descriptor`.
    pub async fn resolve_descriptor(
        &self,
        descriptor: &CallbackDescriptor,
    ) -> InjectResult<ResolvedArgs> {
        let mut args = ResolvedArgs::default();
        let mut visiting = Vec::new();
        for key in descriptor.dependencies() {
            let value = self.resolve_key(*key, &mut visiting).await?;
            args.insert_raw(*key, value);
        }
        Ok(args)
    }

    /// Resolves a single value of type `T`.
    pub async fn resolve<T: Send + Sync + 'static>(&self) -> InjectResult<Arc<T>> {
        let key = DependencyKey::of::<T>();
        let mut visiting = Vec::new();
        let value = self.resolve_key(key, &mut visiting).await?;
        value
            .downcast::<T>()
            .map_err(|_| InjectError::ProvidedTypeMismatch {
                type_name: key.type_name,
            })
    }

    fn resolve_key<'a>(
        &'a self,
        key: DependencyKey,
        visiting: &'a mut Vec<TypeId>,
    ) -> BoxFuture<'a, InjectResult<BoxedValue>> {
        Box::pin(async move {
            if visiting.contains(&key.type_id) {
                return Err(InjectError::DependencyCycle {
                    type_name: key.type_name,
                });
            }

            let mut provider = self
                .inner
                .type_dependencies
                .read()
                .get(&key.type_id)
                .cloned()
                .ok_or(InjectError::MissingDependency {
                    type_name: key.type_name,
                })?;

            if let Some(replacement) = self.inner.callback_overrides.read().get(&provider.id).cloned()
            {
                provider = replacement;
            }

            visiting.push(key.type_id);
            let mut args = ResolvedArgs::default();
            for dep in provider.descriptor.dependencies() {
                let value = self.resolve_key(*dep, &mut *visiting).await?;
                args.insert_raw(*dep, value);
            }
            visiting.pop();

            Ok((provider.call)(args).await)
        })
    }
}

impl std::fmt::Debug for Injector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Injector")
            .field(
                "type_dependencies",
                &self.inner.type_dependencies.read().len(),
            )
            .field(
                "callback_overrides",
                &self.inner.callback_overrides.read().len(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, PartialEq)]
    struct Greeting(String);

    #[derive(Debug, Clone, PartialEq)]
    struct Name(&'static str);

    #[tokio::test]
    async fn missing_dependency_errors() {
        let injector = Injector::new();
        let err = injector.resolve::<Greeting>().await.unwrap_err();
        assert!(matches!(err, InjectError::MissingDependency { .. }));
    }

    #[tokio::test]
    async fn providers_are_invoked_fresh_per_resolution() {
        let injector = Injector::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        injector.add_type_dependency::<usize>(Provider::new(move || {
            counter.fetch_add(1, Ordering::SeqCst)
        }));

        let first = injector.resolve::<usize>().await.unwrap();
        let second = injector.resolve::<usize>().await.unwrap();
        assert_eq!(*first, 0);
        assert_eq!(*second, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn recursive_providers_resolve_their_dependencies() {
        let injector = Injector::new();
        injector.add_type_dependency::<Name>(Provider::new(|| Name("herald")));
        injector.add_type_dependency::<Greeting>(Provider::with_dependencies(
            CallbackDescriptor::new().require::<Name>(),
            |args| Greeting(format!("hello {}", args.require::<Name>().unwrap().0)),
        ));

        let greeting = injector.resolve::<Greeting>().await.unwrap();
        assert_eq!(*greeting, Greeting("hello herald".into()));
    }

    #[tokio::test]
    async fn dependency_cycle_is_fatal_at_resolution() {
        #[derive(Debug)]
        struct A;
        #[derive(Debug)]
        struct B;

        let injector = Injector::new();
        injector.add_type_dependency::<A>(Provider::with_dependencies(
            CallbackDescriptor::new().require::<B>(),
            |_| A,
        ));
        injector.add_type_dependency::<B>(Provider::with_dependencies(
            CallbackDescriptor::new().require::<A>(),
            |_| B,
        ));

        let err = injector.resolve::<A>().await.unwrap_err();
        assert!(matches!(err, InjectError::DependencyCycle { .. }));
    }

    #[tokio::test]
    async fn callback_override_replaces_provider() {
        let injector = Injector::new();
        let provider = Provider::new(|| Name("real"));
        let id = provider.id();
        injector.add_type_dependency::<Name>(provider);
        injector.add_callback_override(id, Provider::new(|| Name("mock")));

        let name = injector.resolve::<Name>().await.unwrap();
        assert_eq!(*name, Name("mock"));

        injector.remove_callback_override(id);
        let name = injector.resolve::<Name>().await.unwrap();
        assert_eq!(*name, Name("real"));
    }

    #[tokio::test]
    async fn descriptor_resolution_collects_all_values() {
        let injector = Injector::new();
        injector.add_type_dependency::<Name>(Provider::value(Name("herald")));
        injector.add_type_dependency::<u32>(Provider::new(|| 7u32));

        let descriptor = CallbackDescriptor::new().require::<Name>().require::<u32>();
        let args = injector.resolve_descriptor(&descriptor).await.unwrap();
        assert_eq!(args.require::<Name>().unwrap().0, "herald");
        assert_eq!(*args.require::<u32>().unwrap(), 7);
        assert!(args.get::<String>().is_none());
    }
}
