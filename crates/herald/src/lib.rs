//! # Herald
//!
//! A type-safe command dispatch framework for chat-platform bots.
//!
//! ## Overview
//!
//! Herald sits between a platform transport and your command callbacks. The
//! transport delivers raw events; the client matches them against the
//! commands registered on its components and runs the matched callback with
//! its declared dependencies injected.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────┐     ┌──────────────────────────────────────┐
//! │ Event source │────▶│ Client │────▶│ Component "general"  (commands, ...) │──▶ callbacks
//! │ / server     │     │        │────▶│ Component "admin"    (commands, ...) │──▶ callbacks
//! └──────────────┘     └────────┘────▶│ Component ...                        │──▶ callbacks
//!                                     └──────────────────────────────────────┘
//! ```
//!
//! - **Client**: owns the lifecycle, global checks, prefixes and the
//!   dependency-injection container
//! - **Components**: runtime-swappable groups of commands, checks, hooks and
//!   listeners
//! - **Commands**: prefix-triggered message commands and name-matched slash
//!   commands
//! - **Checks and hooks**: gate and surround every execution, merged from
//!   client, component and command
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use herald::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ClientBuilder::new(rest)
//!         .event_source(events)
//!         .prefix("!")
//!         .build()?;
//!
//!     client.add_component(Component::new("general").with_message_command(
//!         MessageCommand::new("ping", |ctx: Arc<MessageContext>| async move {
//!             ctx.respond("pong".into()).await
//!         }),
//!     ))?;
//!
//!     herald::runtime::run_until_shutdown(client).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use herald_core as core;
pub use herald_framework as framework;
pub use herald_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use herald::prelude::*;
/// ```
pub mod prelude {
    // Client - main entry point
    pub use herald_framework::{Client, ClientBuilder, MessageAccepts, callbacks};

    // Components and commands - primary units of dispatch
    pub use herald_framework::{Component, MessageCommand, Parser, SlashCommand};

    // Contexts - handed to callbacks
    pub use herald_framework::{Context, MessageContext, SlashContext};

    // Checks and hooks
    pub use herald_framework::{Hooks, InjectableCheck, gather_checks};

    // Dependency injection
    pub use herald_framework::{CallbackDescriptor, Injector, Provider, ResolvedArgs};

    // Error and event types surfaced through callbacks
    pub use herald_core::{
        CommandError, DispatchError, DispatchResult, Event, EventKind, HaltExecution,
        InteractionEvent, InteractionResponse, MessageEvent, User,
    };

    // Runtime - configuration and logging
    pub use herald_runtime::{ConfigLoader, HeraldConfig, LoggingBuilder};
}
