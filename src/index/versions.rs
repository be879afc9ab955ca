//! Sentinel document versions.
//!
//! Real versions are non-negative; the negative values below carry special
//! meaning in requests and lookups.

/// The document has no version on record.
pub const NOT_FOUND: i64 = -1;

/// No version was supplied or resolved yet.
pub const NOT_SET: i64 = -2;

/// Accept whatever version is stored.
pub const MATCH_ANY: i64 = -3;

/// Only accept the operation if the document is currently deleted.
pub const MATCH_DELETED: i64 = -4;

/// Short label for a version value, used in logs.
pub fn describe(version: i64) -> String {
    match version {
        NOT_FOUND => "not_found".to_string(),
        NOT_SET => "not_set".to_string(),
        MATCH_ANY => "match_any".to_string(),
        MATCH_DELETED => "match_deleted".to_string(),
        other => other.to_string(),
    }
}
