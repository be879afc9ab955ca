pub mod error;
pub mod types;

pub use error::{ClusterError, ErrorKind, Result};
pub use types::{AllocationId, NodeId, ShardId};
