//! Local cache boundary

use crate::error::Result;
use crate::models::Thought;

/// On-device storage for the full thought set.
///
/// It's a "cache" because it is not the source of truth: the remote record
/// store holds that. The engine treats every failure here as recoverable;
/// errors are logged by the caller and the in-memory set stays
/// authoritative regardless of persistence outcome.
pub trait LocalCache: Send + Sync {
    /// Read the cached thought set. Order is unspecified for callers;
    /// implementations preserve insertion order where they can.
    fn read(&self) -> Result<Vec<Thought>>;

    /// Atomically replace the entire cached set.
    fn write_all(&self, thoughts: &[Thought]) -> Result<()>;

    /// Remove all cached thought data. Idempotent.
    fn clear(&self) -> Result<()>;
}
