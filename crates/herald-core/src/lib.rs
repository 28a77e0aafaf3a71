//! # Herald Core
//!
//! Boundary types for the Herald command-dispatch framework.
//!
//! This crate defines everything the dispatch engine shares with its external
//! collaborators and nothing else:
//!
//! - **Event model** ([`event`]): message and interaction events as delivered
//!   by the transport collaborator.
//! - **Inbound boundary** ([`gateway`]): the [`EventSource`] and
//!   [`InteractionServer`] traits the transport implements.
//! - **Outbound boundary** ([`rest`]): the [`RestClient`] and [`Cache`]
//!   traits the REST collaborator implements, plus response types.
//! - **Error taxonomy** ([`error`]): user-facing command errors, halt
//!   signals, configuration errors, and transient REST failures.
//!
//! The dispatch engine itself lives in `herald-framework`.

pub mod error;
pub mod event;
pub mod gateway;
pub mod rest;

pub use error::{
    BoxError, CommandError, ConfigError, DispatchError, DispatchResult, HaltExecution,
    LifecycleError, RestError, RestResult,
};
pub use event::{CommandOption, Event, EventKind, InteractionEvent, MessageEvent, User};
pub use gateway::{
    EventSource, InteractionRequestHandler, InteractionServer, ListenerFn, ListenerHandle,
    SharedEventSource, SharedInteractionServer,
};
pub use rest::{Cache, InteractionResponse, RestClient, SharedCache, SharedRestClient};
