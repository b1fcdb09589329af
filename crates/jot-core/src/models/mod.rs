//! Domain models

mod thought;

pub use thought::{Thought, ThoughtId};
