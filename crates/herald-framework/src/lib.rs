//! # Herald Framework
//!
//! The dispatch layer of the Herald command framework.
//!
//! This layer provides:
//! - [`Client`], the dispatcher owning components, global checks, prefixes
//!   and the lifecycle
//! - [`Component`], runtime-swappable groups of commands, checks, hooks and
//!   listeners
//! - Message and slash command objects with per-command checks and hooks
//! - An explicit-descriptor dependency-injection container
//! - Execution contexts, including the once-only slash response state
//!   machine
//!
//! Transport and REST collaborators stay behind the traits defined in
//! `herald-core`; in-memory doubles for all of them live in [`testing`].

pub mod client;
pub mod command;
pub mod component;
pub mod context;
pub mod hooks;
pub mod injectable;
pub mod injector;
pub mod testing;

mod registry;

pub use client::{
    CallbackArgs, Client, ClientBuilder, ClientCallback, Loader, MessageAccepts, PrefixGetter,
    callbacks,
};
pub use command::{CommandResult, MessageCommand, Parser, SlashCommand};
pub use component::Component;
pub use context::{MessageContext, SlashContext};
pub use hooks::{HookSet, Hooks};
pub use injectable::{AnyContext, Context, InjectableCheck, InjectableValue, gather_checks};
pub use injector::{
    BoxedValue, CallbackDescriptor, CallbackId, DependencyKey, InjectError, InjectResult,
    Injector, Provider, ProviderId, ResolvedArgs,
};
