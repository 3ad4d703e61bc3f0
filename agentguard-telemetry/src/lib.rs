//! Observability bootstrap for AgentGuard.
//!
//! The library crates only emit `tracing` events. Binaries and test harnesses
//! call [`init_tracing`] once to install a formatted subscriber.

#![warn(missing_docs, clippy::pedantic)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Directive applied when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Result alias for telemetry setup.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Filter directive could not be parsed.
    #[error("invalid log filter `{directive}`: {reason}")]
    InvalidFilter {
        /// Offending directive.
        directive: String,
        /// Parser message.
        reason: String,
    },

    /// A global subscriber is already installed.
    #[error("tracing subscriber already installed: {reason}")]
    AlreadyInitialized {
        /// Message from the subscriber registry.
        reason: String,
    },
}

/// Subscriber settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelemetryConfig {
    directive: String,
    with_target: bool,
    honor_env: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            directive: DEFAULT_DIRECTIVE.to_owned(),
            with_target: false,
            honor_env: true,
        }
    }
}

impl TelemetryConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fallback filter directive, e.g. `agentguard_webhook=debug`.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directive = directive.into();
        self
    }

    /// Shows event targets in formatted output.
    #[must_use]
    pub fn with_target(mut self, with_target: bool) -> Self {
        self.with_target = with_target;
        self
    }

    /// Controls whether `RUST_LOG` overrides the configured directive.
    #[must_use]
    pub fn honor_env(mut self, honor_env: bool) -> Self {
        self.honor_env = honor_env;
        self
    }

    /// Returns the fallback directive.
    #[must_use]
    pub fn directive(&self) -> &str {
        &self.directive
    }

    /// Builds the filter, preferring `env_directive` when it is set and
    /// honored.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::InvalidFilter`] when the selected directive
    /// does not parse.
    pub fn filter(&self, env_directive: Option<&str>) -> TelemetryResult<EnvFilter> {
        let directive = match env_directive {
            Some(raw) if self.honor_env && !raw.trim().is_empty() => raw,
            _ => self.directive.as_str(),
        };
        EnvFilter::try_new(directive).map_err(|err| TelemetryError::InvalidFilter {
            directive: directive.to_owned(),
            reason: err.to_string(),
        })
    }
}

/// Installs the global `fmt` subscriber.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidFilter`] for a bad directive and
/// [`TelemetryError::AlreadyInitialized`] when another subscriber is active.
pub fn init_tracing(config: &TelemetryConfig) -> TelemetryResult<()> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = config.filter(env.as_deref())?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_level(true)
        .try_init()
        .map_err(|err| TelemetryError::AlreadyInitialized {
            reason: err.to_string(),
        })
}

/// Installs the subscriber unless one is already active.
///
/// Returns `true` when this call installed it. Safe to call from every test.
#[must_use]
pub fn try_init_tracing(config: &TelemetryConfig) -> bool {
    match init_tracing(config) {
        Ok(()) => true,
        Err(err) => {
            tracing::debug!(error = %err, "tracing subscriber not installed");
            false
        }
    }
}
