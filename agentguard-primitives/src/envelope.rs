//! Response envelope used by the governance proxy.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope code signalling that the proxy call itself succeeded.
///
/// It says nothing about whether the governed operation ran, was blocked, or
/// is waiting for approval.
pub const SUCCESS_CODE: i64 = 200;

/// JSON wrapper returned by governance server endpoints.
///
/// `D` is the endpoint-specific payload; proxy endpoints use [`EnvelopeData`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProxyEnvelope<D = EnvelopeData> {
    /// Proxy-level status code.
    pub code: i64,
    /// Optional human-readable message, usually set on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Endpoint payload.
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<D>,
}

impl<D> ProxyEnvelope<D> {
    /// Returns `true` when the envelope code is [`SUCCESS_CODE`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }

    /// Returns the message or a generic placeholder.
    #[must_use]
    pub fn message_or_default(&self) -> &str {
        self.message.as_deref().unwrap_or("Unknown error")
    }
}

/// Outcome of a governed call inside a proxy envelope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeData {
    /// Whether the call completed or is held for review.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProxyStatus>,
    /// Upstream payload when the call completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    /// Approval identifier when the call is held for review.
    #[serde(
        default,
        rename = "approvalRequestId",
        skip_serializing_if = "Option::is_none"
    )]
    pub approval_request_id: Option<String>,
}

/// Governed-call status reported inside [`EnvelopeData`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProxyStatus {
    /// The upstream call ran and `response` carries its payload.
    Success,
    /// The call is held until a reviewer decides.
    PendingApproval,
    /// Any status this client does not know about.
    Other(String),
}

impl From<String> for ProxyStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "SUCCESS" => Self::Success,
            "PENDING_APPROVAL" => Self::PendingApproval,
            _ => Self::Other(value),
        }
    }
}

impl From<ProxyStatus> for String {
    fn from(value: ProxyStatus) -> Self {
        match value {
            ProxyStatus::Success => "SUCCESS".to_owned(),
            ProxyStatus::PendingApproval => "PENDING_APPROVAL".to_owned(),
            ProxyStatus::Other(other) => other,
        }
    }
}

/// Result of matching a response body against the proxy envelope schema.
#[derive(Clone, Debug, PartialEq)]
pub enum Unwrapped {
    /// The body was an envelope carrying `data.response`; holds the inner payload.
    Envelope(Value),
    /// The body is not an envelope. Callers must forward it unchanged.
    Passthrough,
}

impl Unwrapped {
    /// Classifies a raw response body.
    ///
    /// Anything that fails to parse as a [`ProxyEnvelope`], or parses without
    /// a `data.response` payload, is [`Unwrapped::Passthrough`].
    #[must_use]
    pub fn from_body(body: &[u8]) -> Self {
        match serde_json::from_slice::<ProxyEnvelope>(body) {
            Ok(ProxyEnvelope {
                data:
                    Some(EnvelopeData {
                        response: Some(inner),
                        ..
                    }),
                ..
            }) => Self::Envelope(inner),
            _ => Self::Passthrough,
        }
    }
}
