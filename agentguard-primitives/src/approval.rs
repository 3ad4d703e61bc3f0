//! Approval status values observed from the governance server.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{GuardError, GuardResult};

/// Server-side state of an approval request.
///
/// The client never transitions an approval itself; it only observes the
/// state the server reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    /// Waiting for a reviewer. The only non-terminal state.
    Pending,
    /// A reviewer approved the held operation.
    Approved,
    /// A reviewer rejected the held operation.
    Rejected,
    /// Nobody decided before the approval window closed.
    Expired,
}

impl ApprovalStatus {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        }
    }

    /// Returns `true` for every state except [`ApprovalStatus::Pending`].
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(GuardError::governance(format!(
                "unknown approval status `{other}`"
            ))),
        }
    }
}

/// Result of an approval status query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStatusResult")]
pub struct ApprovalStatusResult {
    status: ApprovalStatus,
    #[serde(
        default,
        rename = "executionResult",
        skip_serializing_if = "Option::is_none"
    )]
    execution_result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    remark: Option<String>,
}

#[derive(Deserialize)]
struct RawStatusResult {
    status: ApprovalStatus,
    #[serde(default, rename = "executionResult")]
    execution_result: Option<Value>,
    #[serde(default)]
    remark: Option<String>,
}

impl TryFrom<RawStatusResult> for ApprovalStatusResult {
    type Error = GuardError;

    fn try_from(raw: RawStatusResult) -> GuardResult<Self> {
        Self::new(raw.status, raw.execution_result, raw.remark)
    }
}

impl ApprovalStatusResult {
    /// Creates a status result.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Governance`] when an execution result accompanies
    /// any status other than [`ApprovalStatus::Approved`].
    pub fn new(
        status: ApprovalStatus,
        execution_result: Option<Value>,
        remark: Option<String>,
    ) -> GuardResult<Self> {
        if execution_result.is_some() && status != ApprovalStatus::Approved {
            return Err(GuardError::governance(format!(
                "execution result reported for non-approved status {status}"
            )));
        }
        Ok(Self {
            status,
            execution_result,
            remark,
        })
    }

    /// Returns the reported status.
    #[must_use]
    pub const fn status(&self) -> ApprovalStatus {
        self.status
    }

    /// Returns the execution result, present only once an approved call has
    /// finished running server-side.
    #[must_use]
    pub fn execution_result(&self) -> Option<&Value> {
        self.execution_result.as_ref()
    }

    /// Returns the reviewer remark, typically set on rejection.
    #[must_use]
    pub fn remark(&self) -> Option<&str> {
        self.remark.as_deref()
    }

    /// Returns `true` while the approval awaits a decision.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    /// Returns `true` once the approval was granted.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.status == ApprovalStatus::Approved
    }

    /// Returns `true` once the approval was rejected.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.status == ApprovalStatus::Rejected
    }

    /// Returns `true` once the approval expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.status == ApprovalStatus::Expired
    }

    /// Returns the refined state, separating "approved and still executing"
    /// from "approved with a result".
    #[must_use]
    pub fn state(&self) -> ApprovalState<'_> {
        match (self.status, self.execution_result.as_ref()) {
            (ApprovalStatus::Pending, _) => ApprovalState::Pending,
            (ApprovalStatus::Approved, None) => ApprovalState::ApprovedExecuting,
            (ApprovalStatus::Approved, Some(result)) => ApprovalState::ApprovedWithResult(result),
            (ApprovalStatus::Rejected, _) => ApprovalState::Rejected(self.remark.as_deref()),
            (ApprovalStatus::Expired, _) => ApprovalState::Expired,
        }
    }

    /// Consumes the result, returning the execution payload if any.
    #[must_use]
    pub fn into_execution_result(self) -> Option<Value> {
        self.execution_result
    }
}

/// Caller-facing view of an approval, borrowed from an [`ApprovalStatusResult`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ApprovalState<'a> {
    /// Still waiting for a reviewer.
    Pending,
    /// Approved, but the server has not finished executing the held call.
    /// Query again later.
    ApprovedExecuting,
    /// Approved and executed; carries the execution result.
    ApprovedWithResult(&'a Value),
    /// Rejected, with the reviewer remark when given.
    Rejected(Option<&'a str>),
    /// Expired without a decision.
    Expired,
}
