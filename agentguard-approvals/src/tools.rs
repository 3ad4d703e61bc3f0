//! Function-calling tools that let an LLM drive the approval workflow.
//!
//! The tools never fail at the call site: failures are folded into the JSON
//! result so the model can read them and react.

use std::num::FpCategory;

use agentguard_primitives::{ApprovalId, ApprovalState};
use agentguard_transport::traits::{HttpTransport, HyperTransport};
use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::client::ApprovalClient;

/// Name of the justification tool.
pub const SUBMIT_APPROVAL_REASON: &str = "submit_approval_reason";
/// Name of the status tool.
pub const CHECK_APPROVAL_STATUS: &str = "check_approval_status";

/// Result alias for tool dispatch.
pub type ToolResult<T> = Result<T, ToolError>;

/// Errors raised while dispatching a tool call.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Requested tool does not exist.
    #[error("tool `{name}` is not registered")]
    UnknownTool {
        /// Name of the missing tool.
        name: String,
    },

    /// Arguments did not match the tool's parameter schema.
    #[error("invalid arguments for `{tool}`: {reason}")]
    InvalidArguments {
        /// Tool being invoked.
        tool: String,
        /// Human-readable reason for rejection.
        reason: String,
    },
}

impl ToolError {
    fn invalid_arguments(tool: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Declaration of a callable tool in OpenAI function-calling form.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionSpec,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
struct FunctionSpec {
    name: &'static str,
    description: &'static str,
    parameters: Value,
}

impl ToolDefinition {
    fn function(name: &'static str, description: &'static str, parameters: Value) -> Self {
        Self {
            kind: "function",
            function: FunctionSpec {
                name,
                description,
                parameters,
            },
        }
    }

    /// Returns the tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.function.name
    }

    /// Returns the natural-language description shown to the model.
    #[must_use]
    pub fn description(&self) -> &str {
        self.function.description
    }

    /// Returns the JSON schema of the parameters.
    #[must_use]
    pub fn parameters(&self) -> &Value {
        &self.function.parameters
    }

    /// Renders the definition as JSON.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "type": self.kind,
            "function": {
                "name": self.function.name,
                "description": self.function.description,
                "parameters": self.function.parameters,
            }
        })
    }
}

/// Returns the definitions of both approval tools.
#[must_use]
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::function(
            SUBMIT_APPROVAL_REASON,
            "Submit a justification for an approval request. Use this when a high-risk \
             operation has been held by AgentGuard and needs a reason before a reviewer \
             can decide.",
            json!({
                "type": "object",
                "properties": {
                    "approval_id": {
                        "type": "string",
                        "description": "Approval request ID (taken from the interception message)"
                    },
                    "reason": {
                        "type": "string",
                        "description": "Detailed explanation of why the operation needs to run"
                    }
                },
                "required": ["approval_id", "reason"]
            }),
        ),
        ToolDefinition::function(
            CHECK_APPROVAL_STATUS,
            "Check the status of an approval request. Use this when the user says the \
             approval went through, to fetch the decision and the execution result.",
            json!({
                "type": "object",
                "properties": {
                    "approval_id": {
                        "type": "string",
                        "description": "Approval request ID"
                    }
                },
                "required": ["approval_id"]
            }),
        ),
    ]
}

/// Extracts displayable text from an execution result.
///
/// Understands chat-completion responses (`choices[0].message.content`) and
/// simple `{"content": ...}` objects; any other object is pretty-printed and
/// any other value is rendered as-is.
#[must_use]
pub fn extract_content(execution_result: &Value) -> String {
    match execution_result {
        Value::Object(map) => {
            if let Some(first) = map
                .get("choices")
                .and_then(Value::as_array)
                .and_then(|choices| choices.first())
            {
                return first
                    .get("message")
                    .and_then(|message| message.get("content"))
                    .map(render_text)
                    .unwrap_or_default();
            }
            if let Some(content) = map.get("content") {
                return render_text(content);
            }
            serde_json::to_string_pretty(execution_result)
                .unwrap_or_else(|_| execution_result.to_string())
        }
        other => render_text(other),
    }
}

fn render_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Results the proxy reports before execution finishes: any falsy value or an
/// empty container.
fn is_empty_result(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n.classify() == FpCategory::Zero),
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// Tool surface backed by an [`ApprovalClient`].
#[derive(Debug)]
pub struct ApprovalTools<T = HyperTransport> {
    client: ApprovalClient<T>,
}

impl<T> ApprovalTools<T>
where
    T: HttpTransport,
{
    /// Wraps an approval client.
    #[must_use]
    pub fn new(client: ApprovalClient<T>) -> Self {
        Self { client }
    }

    /// Returns the underlying client.
    #[must_use]
    pub fn client(&self) -> &ApprovalClient<T> {
        &self.client
    }

    /// Returns the definitions to advertise to the model.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        tool_definitions()
    }

    /// Submits a justification and reports the outcome as JSON.
    pub async fn submit_approval_reason(&self, approval_id: &str, reason: &str) -> Value {
        let outcome = match ApprovalId::new(approval_id) {
            Ok(id) => self.client.submit_reason(&id, reason).await,
            Err(err) => Err(err),
        };
        match outcome {
            Ok(_) => json!({
                "success": true,
                "message": "Approval reason submitted, waiting for a reviewer",
                "approval_id": approval_id,
                "reason": reason,
            }),
            Err(err) => {
                warn!(approval_id, error = %err, "approval reason submission failed");
                json!({
                    "success": false,
                    "message": format!("Failed to submit approval reason: {err}"),
                })
            }
        }
    }

    /// Fetches an approval's status and reports it as JSON.
    pub async fn check_approval_status(&self, approval_id: &str) -> Value {
        let outcome = match ApprovalId::new(approval_id) {
            Ok(id) => self.client.get_status(&id).await,
            Err(err) => Err(err),
        };
        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                warn!(approval_id, error = %err, "approval status check failed");
                return json!({
                    "status": "error",
                    "message": format!("Failed to check approval status: {err}"),
                });
            }
        };

        match result.state() {
            ApprovalState::ApprovedWithResult(execution) if !is_empty_result(execution) => {
                json!({
                    "status": "approved",
                    "execution_status": "success",
                    "message": "Approved and executed successfully",
                    "content": extract_content(execution),
                    "executionResult": execution,
                })
            }
            ApprovalState::ApprovedWithResult(_) | ApprovalState::ApprovedExecuting => json!({
                "status": "approved",
                "execution_status": "pending",
                "message": "Approved and still executing, check again shortly",
            }),
            ApprovalState::Rejected(remark) => json!({
                "status": "rejected",
                "message": format!("Approval rejected: {}", remark.unwrap_or("no remark given")),
            }),
            ApprovalState::Expired => json!({
                "status": "expired",
                "message": "Approval request has expired",
            }),
            ApprovalState::Pending => json!({
                "status": "pending",
                "message": "Approval is still pending, check again later",
            }),
        }
    }

    /// Dispatches a tool call by name.
    ///
    /// `arguments` may be a JSON object or a string containing one, as models
    /// usually emit them.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::UnknownTool`] for names other than the two approval
    /// tools and [`ToolError::InvalidArguments`] when a required string
    /// argument is missing.
    pub async fn invoke(&self, name: &str, arguments: &Value) -> ToolResult<Value> {
        let parsed;
        let arguments = match arguments {
            Value::String(raw) => {
                parsed = serde_json::from_str::<Value>(raw)
                    .map_err(|err| ToolError::invalid_arguments(name, err.to_string()))?;
                &parsed
            }
            other => other,
        };
        let arguments = arguments
            .as_object()
            .ok_or_else(|| ToolError::invalid_arguments(name, "arguments must be an object"))?;

        debug!(tool = name, "invoking approval tool");
        match name {
            SUBMIT_APPROVAL_REASON => {
                let approval_id = required_str(name, arguments, "approval_id")?;
                let reason = required_str(name, arguments, "reason")?;
                Ok(self.submit_approval_reason(approval_id, reason).await)
            }
            CHECK_APPROVAL_STATUS => {
                let approval_id = required_str(name, arguments, "approval_id")?;
                Ok(self.check_approval_status(approval_id).await)
            }
            other => Err(ToolError::UnknownTool {
                name: other.to_owned(),
            }),
        }
    }
}

fn required_str<'a>(
    tool: &str,
    arguments: &'a Map<String, Value>,
    key: &str,
) -> ToolResult<&'a str> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::invalid_arguments(tool, format!("missing string `{key}`")))
}
