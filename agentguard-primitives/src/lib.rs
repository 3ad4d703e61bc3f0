//! Core shared types for the AgentGuard governance SDK.

#![warn(missing_docs, clippy::pedantic)]

mod approval;
mod config;
mod envelope;
mod error;
mod ids;

/// Approval status values and the status query result.
pub use approval::{ApprovalState, ApprovalStatus, ApprovalStatusResult};
/// Connection settings for the governance server.
pub use config::{
    DEFAULT_BASE_URL, DEFAULT_REQUEST_TIMEOUT, ENV_API_KEY, ENV_BASE_URL, ENV_TIMEOUT_SECS,
    ENV_WEBHOOK_SECRET, ENV_WEBHOOK_URL, GovernanceConfig,
};
/// Wire envelope returned by the governance proxy.
pub use envelope::{EnvelopeData, ProxyEnvelope, ProxyStatus, SUCCESS_CODE, Unwrapped};
/// Error type and result alias shared across the SDK.
pub use error::{GuardError, GuardResult};
/// Opaque approval identifier issued by the governance server.
pub use ids::ApprovalId;
