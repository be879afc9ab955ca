// ============================================================================
// Index Write-Path Guards
// ============================================================================
//
// What the document write path consults before applying an operation:
// the per-document version policy and the primary-term fence.
//
// ============================================================================

pub mod fencing;
pub mod version_type;
pub mod versions;

pub use fencing::{PrimaryRoute, ensure_primary_term, is_stale_term};
pub use version_type::{VersionDecision, VersionType};
