//! AgentGuard governance SDK facade.
//!
//! Depend on this crate via `cargo add agentguard`. It bundles the workspace
//! crates behind feature flags so agents only compile the pieces they use:
//! the governed transports, the approval client and tools, the webhook
//! receiver, and tracing bootstrap.

#![warn(missing_docs, clippy::pedantic)]

/// Re-export shared primitives for convenience.
pub use agentguard_primitives as primitives;

/// Governed HTTP transports and interceptors (enabled by `transport` feature).
#[cfg(feature = "transport")]
pub use agentguard_transport as transport;

/// Approval client and LLM tools (enabled by `approvals` feature).
#[cfg(feature = "approvals")]
pub use agentguard_approvals as approvals;

/// Webhook receiver and approval waiter (enabled by `webhook` feature).
#[cfg(feature = "webhook")]
pub use agentguard_webhook as webhook;

/// Tracing bootstrap (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use agentguard_telemetry as telemetry;

/// Commonly used items.
pub mod prelude {
    pub use agentguard_primitives::{
        ApprovalId, ApprovalState, ApprovalStatus, ApprovalStatusResult, GovernanceConfig,
        GuardError, GuardResult,
    };

    #[cfg(feature = "approvals")]
    pub use agentguard_approvals::{ApprovalClient, ApprovalTools};
    #[cfg(feature = "transport")]
    pub use agentguard_transport::api::{ApiOutcome, ApiRequest, GovernedHttpClient};
    #[cfg(feature = "transport")]
    pub use agentguard_transport::governed::GovernedTransport;
    #[cfg(feature = "transport")]
    pub use agentguard_transport::intercept::{ApiInterceptor, InterceptPatterns};
    #[cfg(feature = "transport")]
    pub use agentguard_transport::traits::HttpTransport;
    #[cfg(feature = "webhook")]
    pub use agentguard_webhook::{ApprovalWait, CallbackRegistry, WebhookServer};
}
