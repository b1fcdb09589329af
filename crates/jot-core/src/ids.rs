//! Injectable thought ID generation

use crate::models::ThoughtId;

/// Source of fresh thought identifiers.
///
/// Injectable so that tests can replay a known sequence of ids.
pub trait IdService: Send + Sync {
    /// Produce the id for the next newly created thought.
    fn next_id(&self) -> ThoughtId;
}

/// Production id source backed by UUID v7.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIds;

impl IdService for UuidIds {
    fn next_id(&self) -> ThoughtId {
        ThoughtId::new()
    }
}
