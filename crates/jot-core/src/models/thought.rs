//! Thought model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A unique identifier for a thought, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThoughtId(Uuid);

impl ThoughtId {
    /// Create a new unique thought ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ThoughtId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ThoughtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ThoughtId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// One user-visible thought.
///
/// The id is assigned client-side and never changes. The timestamps are
/// assigned by the remote store: a thought that has only ever existed
/// locally carries `None` for both until the first successful save echoes
/// the server-confirmed record back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thought {
    /// Unique identifier, stable for the thought's lifetime
    pub id: ThoughtId,
    /// Title text, may be empty
    pub title: String,
    /// Body text, may be empty
    pub body: String,
    /// Set by the remote store on first successful save
    pub created_at: Option<DateTime<Utc>>,
    /// Updated by the remote store on every successful save
    pub modified_at: Option<DateTime<Utc>>,
}

impl Thought {
    /// Create a thought that exists only locally, with no remote timestamps.
    #[must_use]
    pub fn new(id: ThoughtId, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            body: body.into(),
            created_at: None,
            modified_at: None,
        }
    }

    /// Replace title and body, keeping the id and the pre-edit timestamps.
    ///
    /// The carried-forward `modified_at` is provisional: the remote store
    /// supersedes it when the edit is confirmed.
    #[must_use]
    pub fn edited(&self, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: self.id,
            title: title.into(),
            body: body.into(),
            created_at: self.created_at,
            modified_at: self.modified_at,
        }
    }
}
