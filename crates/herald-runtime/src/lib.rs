//! # Herald Runtime
//!
//! Orchestration layer for Herald bots: layered configuration loading,
//! tracing setup and a small lifecycle driver.
//!
//! ```rust,ignore
//! let config = ConfigLoader::new().load()?;
//! logging::init_from_config(&config.logging);
//!
//! let client = config
//!     .client
//!     .apply(ClientBuilder::new(rest).event_source(events))
//!     .build()?;
//! herald_runtime::run_until_shutdown(client).await?;
//! ```

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    AcceptsLevel, ClientConfig, ConfigLoader, HeraldConfig, LogFormat, LogLevel, LogOutput,
    LoggingConfig, SpanEventConfig,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents, init_from_config};

use std::sync::Arc;

use tracing::{error, info};

use herald_framework::Client;

/// Opens the client, waits for a shutdown signal, then closes it.
///
/// Intended for clients that are not event managed; an event-managed client
/// is opened and closed by its event source instead.
pub async fn run_until_shutdown(client: Arc<Client>) -> RuntimeResult<()> {
    client.open().await?;
    info!("running until shutdown signal");
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
    client.close().await?;
    Ok(())
}
