// ============================================================================
// Version Conflict Policy
// ============================================================================
//
// Optimistic concurrency for single documents. Every write or read carries an
// expected version; the policy compares it with the stored version and either
// accepts (yielding the version to store next) or reports a conflict.
//
//   internal      versions are assigned by the store, +1 per write
//   external      the client owns versions, each write must go strictly up
//   external_gte  like external, but an equal version is also accepted
//
// ============================================================================

use super::versions::{MATCH_ANY, MATCH_DELETED, NOT_FOUND};
use crate::core::{ClusterError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionType {
    #[default]
    Internal,
    External,
    ExternalGte,
}

/// Outcome of checking an expected version against the stored one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum VersionDecision {
    Accept {
        next_version: i64,
    },
    Conflict {
        current: i64,
        expected: i64,
        message: String,
    },
}

impl VersionDecision {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl VersionType {
    pub const ALL: [VersionType; 3] = [Self::Internal, Self::External, Self::ExternalGte];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
            Self::ExternalGte => "external_gte",
        }
    }

    /// Stable code used when the strategy travels inside a replicated operation.
    pub fn as_byte(&self) -> u8 {
        match self {
            Self::Internal => 0,
            Self::External => 1,
            Self::ExternalGte => 2,
        }
    }

    pub fn from_byte(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Internal),
            1 => Ok(Self::External),
            2 => Ok(Self::ExternalGte),
            other => Err(ClusterError::Validation(format!(
                "no version type matches byte [{other}]"
            ))),
        }
    }

    /// Whether a write expecting `expected` conflicts with the stored `current`.
    pub fn is_version_conflict_for_writes(&self, current: i64, expected: i64, deleted: bool) -> bool {
        match self {
            Self::Internal => {
                if expected == MATCH_ANY {
                    return false;
                }
                if expected == MATCH_DELETED {
                    return !deleted;
                }
                if current == NOT_FOUND {
                    return true;
                }
                current != expected
            }
            Self::External => {
                if current == NOT_FOUND {
                    return false;
                }
                if expected == MATCH_ANY {
                    return true;
                }
                current >= expected
            }
            Self::ExternalGte => {
                if current == NOT_FOUND {
                    return false;
                }
                if expected == MATCH_ANY {
                    return true;
                }
                current > expected
            }
        }
    }

    /// Reads compare the same way for every strategy.
    pub fn is_version_conflict_for_reads(&self, current: i64, expected: i64) -> bool {
        if expected == MATCH_ANY {
            return false;
        }
        if current == NOT_FOUND {
            return true;
        }
        current != expected
    }

    /// Version to store after an accepted write.
    pub fn update_version(&self, current: i64, expected: i64) -> i64 {
        match self {
            Self::Internal => {
                if current == NOT_FOUND {
                    1
                } else {
                    current + 1
                }
            }
            Self::External | Self::ExternalGte => expected,
        }
    }

    pub fn validate_version_for_writes(&self, version: i64) -> bool {
        match self {
            Self::Internal => version == MATCH_ANY || version == MATCH_DELETED || version >= 0,
            Self::External | Self::ExternalGte => version > 0,
        }
    }

    pub fn validate_version_for_reads(&self, version: i64) -> bool {
        version == MATCH_ANY || version >= 0
    }

    pub fn explain_conflict_for_writes(&self, current: i64, expected: i64, deleted: bool) -> String {
        if *self == Self::Internal && expected == MATCH_DELETED && !deleted {
            return format!("document already exists (current version [{current}])");
        }
        explain_mismatch(current, expected)
    }

    pub fn explain_conflict_for_reads(&self, current: i64, expected: i64) -> String {
        explain_mismatch(current, expected)
    }

    /// Evaluates a write without validating `expected`.
    pub fn evaluate(&self, expected: i64, current: i64, deleted: bool) -> VersionDecision {
        if self.is_version_conflict_for_writes(current, expected, deleted) {
            VersionDecision::Conflict {
                current,
                expected,
                message: self.explain_conflict_for_writes(current, expected, deleted),
            }
        } else {
            VersionDecision::Accept {
                next_version: self.update_version(current, expected),
            }
        }
    }

    /// Validates and evaluates a write, returning the version to store.
    pub fn check_write(&self, expected: i64, current: i64, deleted: bool) -> Result<i64> {
        if !self.validate_version_for_writes(expected) {
            return Err(ClusterError::Validation(format!(
                "illegal version value [{expected}] for version type [{}]",
                self.as_str()
            )));
        }
        match self.evaluate(expected, current, deleted) {
            VersionDecision::Accept { next_version } => Ok(next_version),
            VersionDecision::Conflict {
                current,
                expected,
                message,
            } => Err(ClusterError::VersionConflict {
                current,
                expected,
                message,
            }),
        }
    }

    /// Validates a read's expected version against the stored one.
    pub fn check_read(&self, expected: i64, current: i64) -> Result<()> {
        if !self.validate_version_for_reads(expected) {
            return Err(ClusterError::Validation(format!(
                "illegal version value [{expected}] for version type [{}]",
                self.as_str()
            )));
        }
        if self.is_version_conflict_for_reads(current, expected) {
            return Err(ClusterError::VersionConflict {
                current,
                expected,
                message: self.explain_conflict_for_reads(current, expected),
            });
        }
        Ok(())
    }
}

fn explain_mismatch(current: i64, expected: i64) -> String {
    if current == NOT_FOUND {
        format!("document does not exist (expected version [{expected}])")
    } else {
        format!("current version [{current}] is different than the one provided [{expected}]")
    }
}

impl fmt::Display for VersionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VersionType {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "internal" => Ok(Self::Internal),
            "external" => Ok(Self::External),
            "external_gte" => Ok(Self::ExternalGte),
            other => Err(ClusterError::Validation(format!(
                "no version type match [{other}]"
            ))),
        }
    }
}
