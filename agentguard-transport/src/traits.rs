//! Shared transport trait, error type, and the hyper-backed implementation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use agentguard_primitives::GuardError;
use async_trait::async_trait;
use hyper::{Body, Request, Response};
use thiserror::Error;
use tokio::time::timeout;

use crate::http_client::{HyperClient, build_https_client};

/// Result alias used by transports.
pub type TransportResult<T> = Result<T, TransportError>;

/// Error type shared by transport implementations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Transport is misconfigured.
    #[error("transport not configured: {reason}")]
    Configuration {
        /// Additional context for the failure.
        reason: String,
    },

    /// The outbound request could not be built or rewritten.
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// Reason describing why the request could not be processed.
        reason: String,
    },

    /// Network or protocol failure.
    #[error("transport error: {reason}")]
    Transport {
        /// Additional context about the error.
        reason: String,
    },

    /// No response arrived within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The server answered with an error status or an unusable body.
    #[error("response error: {reason}")]
    Response {
        /// Additional context about the response failure.
        reason: String,
    },
}

impl TransportError {
    /// Convenience constructor for configuration issues.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for invalid requests.
    #[must_use]
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for transport failures.
    #[must_use]
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for response failures.
    #[must_use]
    pub fn response(reason: impl Into<String>) -> Self {
        Self::Response {
            reason: reason.into(),
        }
    }
}

impl From<GuardError> for TransportError {
    fn from(value: GuardError) -> Self {
        match value {
            GuardError::Configuration { reason } => Self::Configuration { reason },
            other => Self::transport(other.to_string()),
        }
    }
}

impl From<TransportError> for GuardError {
    fn from(value: TransportError) -> Self {
        match value {
            TransportError::Configuration { reason } => Self::Configuration { reason },
            other => Self::governance(other.to_string()),
        }
    }
}

/// Pluggable request path for HTTP clients.
///
/// Interceptors implement this trait and wrap another implementation, so
/// they can be stacked and handed to any client that accepts a transport.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends the request and returns the response head with a lazily read body.
    async fn send(&self, request: Request<Body>) -> TransportResult<Response<Body>>;
}

#[async_trait]
impl<T> HttpTransport for Arc<T>
where
    T: HttpTransport + ?Sized,
{
    async fn send(&self, request: Request<Body>) -> TransportResult<Response<Body>> {
        self.as_ref().send(request).await
    }
}

#[async_trait]
impl<T> HttpTransport for Box<T>
where
    T: HttpTransport + ?Sized,
{
    async fn send(&self, request: Request<Body>) -> TransportResult<Response<Body>> {
        self.as_ref().send(request).await
    }
}

/// Transport that performs real HTTP(S) calls through hyper and rustls.
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient,
    timeout: Duration,
}

impl fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HyperTransport")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HyperTransport {
    /// Creates a transport that waits at most `timeout` for response headers.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: build_https_client(),
            timeout,
        }
    }

    /// Returns the configured timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl HttpTransport for HyperTransport {
    async fn send(&self, request: Request<Body>) -> TransportResult<Response<Body>> {
        timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(|err| TransportError::transport(format!("request failed: {err}")))
    }
}
