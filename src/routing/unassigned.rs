use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a shard copy became unassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnassignedReason {
    IndexCreated,
    NodeLeft,
    AllocationFailed,
    PrimaryFailed,
    RelocationFailed,
}

impl fmt::Display for UnassignedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::IndexCreated => "INDEX_CREATED",
            Self::NodeLeft => "NODE_LEFT",
            Self::AllocationFailed => "ALLOCATION_FAILED",
            Self::PrimaryFailed => "PRIMARY_FAILED",
            Self::RelocationFailed => "RELOCATION_FAILED",
        };
        write!(f, "{label}")
    }
}

/// Outcome of the last attempt to place an unassigned copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    NoAttempt,
    DecidersNo,
    DecidersThrottled,
}

/// Bookkeeping attached to a copy while it is unassigned or initializing.
/// A started copy whose relocation target failed also carries one, so that
/// repeated relocation failures count against the retry limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnassignedInfo {
    reason: UnassignedReason,
    message: Option<String>,
    failed_allocations: u32,
    last_allocation_status: AllocationStatus,
    explanation: Option<String>,
}

impl UnassignedInfo {
    pub fn new(reason: UnassignedReason, message: Option<String>) -> Self {
        Self {
            reason,
            message,
            failed_allocations: 0,
            last_allocation_status: AllocationStatus::NoAttempt,
            explanation: None,
        }
    }

    pub fn with_failed_allocations(mut self, failed_allocations: u32) -> Self {
        self.failed_allocations = failed_allocations;
        self
    }

    pub fn with_allocation_status(
        mut self,
        status: AllocationStatus,
        explanation: Option<String>,
    ) -> Self {
        self.last_allocation_status = status;
        self.explanation = explanation;
        self
    }

    pub fn reason(&self) -> UnassignedReason {
        self.reason
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn failed_allocations(&self) -> u32 {
        self.failed_allocations
    }

    pub fn last_allocation_status(&self) -> AllocationStatus {
        self.last_allocation_status
    }

    /// Why the copy is still unassigned, recorded by the last reroute.
    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }
}

impl fmt::Display for UnassignedInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unassigned_info[[reason={}]", self.reason)?;
        if self.failed_allocations > 0 {
            write!(f, ", failed_attempts[{}]", self.failed_allocations)?;
        }
        if let Some(message) = &self.message {
            write!(f, ", details[{message}]")?;
        }
        write!(f, "]")
    }
}
