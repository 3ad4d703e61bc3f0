//! Connection settings for the governance server.

use std::env;
use std::fmt;
use std::time::Duration;

use tracing::debug;
use url::Url;

use crate::{GuardError, GuardResult};

/// Environment variable holding the governance server base URL.
pub const ENV_BASE_URL: &str = "AGENTGUARD_URL";
/// Environment variable holding the agent API key.
pub const ENV_API_KEY: &str = "AGENTGUARD_API_KEY";
/// Environment variable holding the public webhook URL.
pub const ENV_WEBHOOK_URL: &str = "AGENTGUARD_WEBHOOK_URL";
/// Environment variable holding the webhook signing secret.
pub const ENV_WEBHOOK_SECRET: &str = "AGENTGUARD_WEBHOOK_SECRET";
/// Environment variable holding the request timeout in whole seconds.
pub const ENV_TIMEOUT_SECS: &str = "AGENTGUARD_TIMEOUT_SECS";

/// Base URL used when `AGENTGUARD_URL` is unset.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
/// Request timeout used when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings shared by every AgentGuard client.
///
/// The base URL and API key are validated at construction; a config that
/// exists is always usable.
#[derive(Clone, PartialEq, Eq)]
pub struct GovernanceConfig {
    base: Url,
    base_url: String,
    api_key: String,
    webhook_url: Option<String>,
    webhook_secret: Option<String>,
    request_timeout: Duration,
}

impl GovernanceConfig {
    /// Creates a configuration for the supplied server and API key.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Configuration`] if the base URL does not parse as
    /// an `http://`/`https://` URL with a host, carries a query or fragment, or
    /// if the API key is empty.
    pub fn new(base_url: impl AsRef<str>, api_key: impl Into<String>) -> GuardResult<Self> {
        let base = parse_base_url(base_url.as_ref())?;
        let base_url = base.as_str().trim_end_matches('/').to_owned();
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(GuardError::configuration("api key is required"));
        }

        Ok(Self {
            base,
            base_url,
            api_key,
            webhook_url: None,
            webhook_secret: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Loads the configuration from `AGENTGUARD_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Configuration`] when the API key is missing or any
    /// value is invalid.
    pub fn from_env() -> GuardResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads the configuration through an arbitrary key lookup.
    ///
    /// Uses the same keys and defaults as [`GovernanceConfig::from_env`].
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Configuration`] when the API key is missing or any
    /// value is invalid.
    pub fn from_lookup<F>(lookup: F) -> GuardResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup(ENV_BASE_URL).unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        let api_key = lookup(ENV_API_KEY).unwrap_or_default();
        let mut config = Self::new(base_url, api_key)?;

        if let Some(url) = lookup(ENV_WEBHOOK_URL).filter(|v| !v.trim().is_empty()) {
            config = config.with_webhook_url(url);
        }
        if let Some(secret) = lookup(ENV_WEBHOOK_SECRET).filter(|v| !v.is_empty()) {
            config = config.with_webhook_secret(secret);
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            let secs = raw.trim().parse::<u64>().map_err(|err| {
                GuardError::configuration(format!("invalid {ENV_TIMEOUT_SECS} `{raw}`: {err}"))
            })?;
            config = config.with_request_timeout(Duration::from_secs(secs));
        }

        debug!(
            base_url = %config.base_url,
            webhook = config.webhook_url.is_some(),
            "loaded governance config"
        );
        Ok(config)
    }

    /// Sets the public URL the governance server should call back.
    #[must_use]
    pub fn with_webhook_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    /// Sets the shared secret used to sign webhook payloads.
    #[must_use]
    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    /// Sets the per-request timeout. Also forwarded to the server as a budget hint.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Returns the base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the agent API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Returns the webhook URL, if configured.
    #[must_use]
    pub fn webhook_url(&self) -> Option<&str> {
        self.webhook_url.as_deref()
    }

    /// Returns the webhook secret, if configured.
    #[must_use]
    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref()
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Joins an absolute path (starting with `/`) onto the base URL.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Appends path segments to the base URL, percent-encoding each one.
    ///
    /// Use this when a segment carries caller data such as an approval id.
    #[must_use]
    pub fn endpoint_url<'a, I>(&self, segments: I) -> Url
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut url = self.base.clone();
        // http(s) URLs always have a hierarchical path.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

impl fmt::Debug for GovernanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GovernanceConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("webhook_url", &self.webhook_url)
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

fn parse_base_url(input: &str) -> GuardResult<Url> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(GuardError::configuration("base url is required"));
    }
    let url = Url::parse(trimmed.trim_end_matches('/'))
        .map_err(|err| GuardError::configuration(format!("invalid base url `{trimmed}`: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(GuardError::configuration(
            "base url must start with http:// or https://",
        ));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(GuardError::configuration(format!(
            "base url `{trimmed}` has no host"
        )));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(GuardError::configuration(format!(
            "base url `{trimmed}` must not carry a query or fragment"
        )));
    }
    Ok(url)
}
