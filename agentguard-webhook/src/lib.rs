//! Push-based approval notifications for AgentGuard.
//!
//! The governance server POSTs a JSON payload to the agent when an approval is
//! decided. [`server::WebhookServer`] receives those deliveries, checks their
//! signature, and hands each payload to whoever is waiting on that approval
//! through the [`registry::CallbackRegistry`].

#![warn(missing_docs, clippy::pedantic)]

mod error;
pub mod registry;
pub mod server;
pub mod signature;

pub use error::{WebhookError, WebhookResult};
pub use registry::{ApprovalWait, CallbackRegistry, DispatchOutcome};
pub use server::{
    HEALTH_PATH, SIGNATURE_HEADER, WEBHOOK_PATH, WebhookHandler, WebhookReply, WebhookServer,
};
pub use signature::{check_signature, sign, verify_signature};
