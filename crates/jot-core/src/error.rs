//! Error types for jot-core

use thiserror::Error;

/// Result type alias using jot-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while syncing thoughts.
///
/// Variants carry rendered messages rather than source errors so that the
/// type stays `Clone + PartialEq`, which the UI-facing transaction status
/// relies on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Network, quota or other transient remote-store failure. Retriable.
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    /// A remote record could not be mapped back to a thought.
    #[error("Could not convert record: {0}")]
    RecordConversion(String),

    /// The current remote user identity could not be determined.
    #[error("Remote identity unavailable: {0}")]
    IdentityUnavailable(String),

    /// Local cache or preferences read/write failed. Recovered locally,
    /// never surfaced to the UI.
    #[error("Local persistence failed: {0}")]
    LocalPersistence(String),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::LocalPersistence(err.to_string())
    }
}
