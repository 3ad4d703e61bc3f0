//! Shared error definitions for the AgentGuard SDK.

use thiserror::Error;

/// Result alias used throughout the SDK.
pub type GuardResult<T> = std::result::Result<T, GuardError>;

/// Errors raised while configuring or talking to the governance server.
///
/// Rejection and expiry of an approval are not errors; they surface as
/// [`crate::ApprovalStatus`] values.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Missing or invalid base URL or API key. Raised at construction time only.
    #[error("invalid configuration: {reason}")]
    Configuration {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Transport failure, non-2xx status, or a non-200 envelope code from the
    /// governance server.
    #[error("governance request failed: {reason}")]
    Governance {
        /// Additional context about the failure.
        reason: String,
    },

    /// Approval identifier failed validation.
    #[error("invalid approval id: {reason}")]
    InvalidApprovalId {
        /// Human-readable reason for rejection.
        reason: String,
    },
}

impl GuardError {
    /// Convenience constructor for configuration issues.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for governance server failures.
    #[must_use]
    pub fn governance(reason: impl Into<String>) -> Self {
        Self::Governance {
            reason: reason.into(),
        }
    }
}
