//! Approval workflow client for AgentGuard.
//!
//! [`client::ApprovalClient`] queries and justifies approvals held by the
//! governance server. [`tools::ApprovalTools`] exposes the same operations as
//! function-calling tools an LLM can invoke.

#![warn(missing_docs, clippy::pedantic)]

pub mod client;
pub mod tools;

pub use client::{API_KEY_HEADER, ApprovalClient, SubmitReceipt};
pub use tools::{
    ApprovalTools, CHECK_APPROVAL_STATUS, SUBMIT_APPROVAL_REASON, ToolDefinition, ToolError,
    ToolResult, extract_content, tool_definitions,
};
