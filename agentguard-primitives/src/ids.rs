//! Approval identifier type.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::GuardError;

/// Identifier issued by the governance server when a call is held for review.
///
/// The value is opaque: the client only uses it as a map key and as a URL
/// path segment.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApprovalId(String);

impl ApprovalId {
    /// Creates an identifier after checking it is not blank.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::InvalidApprovalId`] when the identifier is empty or
    /// whitespace only.
    pub fn new(id: impl Into<String>) -> Result<Self, GuardError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(GuardError::InvalidApprovalId {
                reason: "identifier cannot be empty".into(),
            });
        }
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

}

impl Display for ApprovalId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ApprovalId {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ApprovalId {
    type Error = GuardError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ApprovalId> for String {
    fn from(value: ApprovalId) -> Self {
        value.0
    }
}

impl AsRef<str> for ApprovalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_identifier() {
        let err = ApprovalId::new("  ").expect_err("blank id should fail");
        assert!(matches!(err, GuardError::InvalidApprovalId { .. }));
    }

    #[test]
    fn deserialization_checks_blank_identifiers() {
        let id: ApprovalId = serde_json::from_str("\"apr-7\"").unwrap();
        assert_eq!(id.as_str(), "apr-7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"apr-7\"");

        assert!(serde_json::from_str::<ApprovalId>("\"\"").is_err());
        assert!(serde_json::from_str::<ApprovalId>("\"   \"").is_err());
    }
}
