use agentguard_primitives::ApprovalId;
use thiserror::Error;

/// Result alias for webhook operations.
pub type WebhookResult<T> = Result<T, WebhookError>;

/// Errors raised by the webhook receiver and waiter.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// A waiter is already registered for the approval.
    #[error("a waiter is already registered for approval `{approval_id}`")]
    AlreadyRegistered {
        /// Approval that already has a waiter.
        approval_id: ApprovalId,
    },

    /// Delivery signature did not match the shared secret.
    #[error("invalid webhook signature")]
    InvalidSignature,

    /// Listener could not be bound.
    #[error("failed to bind webhook listener: {reason}")]
    Bind {
        /// Human-readable failure description.
        reason: String,
    },

    /// Server terminated abnormally.
    #[error("webhook server failed: {reason}")]
    Server {
        /// Human-readable failure description.
        reason: String,
    },
}

impl WebhookError {
    /// Creates a bind error from the supplied reason.
    #[must_use]
    pub fn bind(reason: impl Into<String>) -> Self {
        Self::Bind {
            reason: reason.into(),
        }
    }

    /// Creates a server error from the supplied reason.
    #[must_use]
    pub fn server(reason: impl Into<String>) -> Self {
        Self::Server {
            reason: reason.into(),
        }
    }
}
