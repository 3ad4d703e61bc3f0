//! HTTP transports that route outbound calls through the AgentGuard proxy.
//!
//! Every component implements [`traits::HttpTransport`], so they compose: an
//! LLM client is handed a [`governed::GovernedTransport`], a generic HTTP
//! caller an [`intercept::ApiInterceptor`], and both sit on top of the
//! hyper-backed [`traits::HyperTransport`] or a [`mock::MockTransport`] in tests.

#![warn(missing_docs, clippy::pedantic)]

pub mod api;
pub mod governed;
pub mod intercept;
pub mod mock;
pub mod traits;

mod http_client;
