//! Configuration schema and loader.
//!
//! Configuration is layered with figment; later sources override earlier
//! ones:
//!
//! 1. Built-in defaults
//! 2. Config file (`herald.toml` by default, with the `toml-config` feature)
//! 3. Environment variables (`HERALD_*`, `__` as the section separator)
//!
//! # Environment Variable Mapping
//!
//! - `HERALD_CLIENT__MENTION_PREFIX=true` → `client.mention_prefix = true`
//! - `HERALD_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//!
//! # Example
//!
//! ```rust,ignore
//! let config = ConfigLoader::new().load()?;
//! herald_runtime::logging::init_from_config(&config.logging);
//! let builder = config.client.apply(ClientBuilder::new(rest).event_source(events));
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use figment::Figment;
#[cfg(any(feature = "toml-config", feature = "yaml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use serde::{Deserialize, Serialize};
use tracing::debug;

use herald_framework::{ClientBuilder, MessageAccepts};

use crate::error::RuntimeResult;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HeraldConfig {
    /// Dispatcher settings.
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// =============================================================================
// Client configuration
// =============================================================================

/// Which message channels the client listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AcceptsLevel {
    #[default]
    All,
    DmOnly,
    GuildOnly,
    None,
}

impl From<AcceptsLevel> for MessageAccepts {
    fn from(level: AcceptsLevel) -> Self {
        match level {
            AcceptsLevel::All => MessageAccepts::All,
            AcceptsLevel::DmOnly => MessageAccepts::DmOnly,
            AcceptsLevel::GuildOnly => MessageAccepts::GuildOnly,
            AcceptsLevel::None => MessageAccepts::None,
        }
    }
}

/// Dispatcher settings applied to a [`ClientBuilder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Static command prefixes, tried in order.
    #[serde(default)]
    pub prefixes: Vec<String>,

    /// Also accept `@bot`-mention prefixes, resolved at startup.
    #[serde(default)]
    pub mention_prefix: bool,

    /// Message channels to listen to.
    #[serde(default)]
    pub accepts: AcceptsLevel,

    /// Tie the client lifecycle to the event source's start and stop
    /// events.
    #[serde(default)]
    pub event_managed: bool,

    /// Milliseconds before a pending slash response is auto-deferred.
    /// `null` disables the timer.
    #[serde(default = "default_auto_defer_ms")]
    pub auto_defer_ms: Option<u64>,

    /// Response content for unmatched interactions.
    #[serde(default = "default_interaction_not_found")]
    pub interaction_not_found: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            prefixes: Vec::new(),
            mention_prefix: false,
            accepts: AcceptsLevel::default(),
            event_managed: false,
            auto_defer_ms: default_auto_defer_ms(),
            interaction_not_found: default_interaction_not_found(),
        }
    }
}

fn default_auto_defer_ms() -> Option<u64> {
    Some(2600)
}

fn default_interaction_not_found() -> Option<String> {
    Some("Command not found".to_string())
}

impl ClientConfig {
    /// Applies these settings to a builder.
    pub fn apply(&self, mut builder: ClientBuilder) -> ClientBuilder {
        for prefix in &self.prefixes {
            builder = builder.prefix(prefix.clone());
        }
        builder
            .mention_prefix(self.mention_prefix)
            .accepts(self.accepts.into())
            .event_managed(self.event_managed)
            .auto_defer_after(self.auto_defer_ms.map(Duration::from_millis))
            .interaction_not_found(self.interaction_not_found.clone())
    }
}

// =============================================================================
// Logging configuration
// =============================================================================

/// Log level for the root filter and per-module overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to compact otherwise.
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Root log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Line format.
    #[serde(default)]
    pub format: LogFormat,

    /// Destination.
    #[serde(default)]
    pub output: LogOutput,

    /// Log file path, used with `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Include thread IDs in log output.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line number in log output.
    #[serde(default)]
    pub file_location: bool,

    /// Span lifecycle events to log.
    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Per-module level overrides, e.g. `herald_framework = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

// =============================================================================
// Loader
// =============================================================================

/// Layered configuration loader.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    skip_env: bool,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads from a specific file instead of the default locations.
    #[must_use]
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Skips the environment variable layer.
    #[must_use]
    pub fn without_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Loads and merges all configured sources.
    pub fn load(self) -> RuntimeResult<HeraldConfig> {
        let mut figment = Figment::from(Serialized::defaults(HeraldConfig::default()));

        #[cfg(feature = "toml-config")]
        {
            let path = self.file.clone().unwrap_or_else(|| "herald.toml".into());
            figment = figment.merge(Toml::file(&path));
            debug!(path = %path.display(), "merged toml configuration");
        }
        #[cfg(feature = "yaml-config")]
        {
            let path = self.file.clone().unwrap_or_else(|| "herald.yaml".into());
            figment = figment.merge(Yaml::file(&path));
            debug!(path = %path.display(), "merged yaml configuration");
        }

        if !self.skip_env {
            figment = figment.merge(Env::prefixed("HERALD_").split("__"));
        }

        Ok(figment.extract::<HeraldConfig>()?)
    }
}
