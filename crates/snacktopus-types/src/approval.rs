//! Human approval payload raised against the snack saga.

use serde::{Deserialize, Serialize};

/// Event name the saga waits on for a reviewer decision.
pub const HUMAN_APPROVAL_EVENT: &str = "humanApproval";

/// Outcome reported by a human reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalVerdict {
    Approved,
    Rejected,
    Timeout,
}

impl ApprovalVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ApprovalVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApprovalVerdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "timeout" => Ok(Self::Timeout),
            other => Err(format!(
                "invalid verdict '{other}' (expected approved, rejected, or timeout)"
            )),
        }
    }
}

/// Body of a `humanApproval` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanApproval {
    pub verdict: ApprovalVerdict,
    /// Optional context from the reviewer.
    #[serde(default)]
    pub notes: Option<String>,
}
