//! Wire-level types shared between the transport and the adapter

use crate::error::Error;
use crate::models::{Thought, ThoughtId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Availability of the remote account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountState {
    /// Account is operational and available.
    Available,

    /// Not yet checked, but optimistically assumed available.
    ///
    /// Avoids UI flickering on the happy path while the first real status
    /// is still in flight.
    ProvisionalAvailable,

    /// No account, or a restricted one.
    NoAccount,

    /// Undetermined account state.
    Unknown,
}

/// Outcome of one change fetch from the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    /// Changes were fetched and pushed onto the change feed.
    NewData,
    /// Nothing new on the remote side.
    NoData,
    /// The fetch did not complete.
    Failed(Error),
}

/// One change made in the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudChange {
    /// Thought was modified or added.
    Modified(Thought),
    /// Thought was deleted.
    Deleted(ThoughtId),
}

/// One thought as represented in the remote record store.
///
/// The record name carries the thought id. Title and body travel in the
/// record's encrypted field payload and are opaque to the server; the
/// timestamps are server-assigned and read-only for clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub name: String,
    pub title: String,
    pub body: String,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl RemoteRecord {
    /// Build the record to upload for a thought.
    ///
    /// Timestamps are left empty: the server owns them.
    #[must_use]
    pub fn from_thought(thought: &Thought) -> Self {
        Self {
            name: thought.id.to_string(),
            title: thought.title.clone(),
            body: thought.body.clone(),
            created_at: None,
            modified_at: None,
        }
    }
}

impl TryFrom<&RemoteRecord> for Thought {
    type Error = Error;

    fn try_from(record: &RemoteRecord) -> Result<Self, Self::Error> {
        let id: ThoughtId = record.name.parse().map_err(|_| {
            Error::RecordConversion(format!("record name is not a thought id: {}", record.name))
        })?;
        Ok(Self {
            id,
            title: record.title.clone(),
            body: record.body.clone(),
            created_at: record.created_at,
            modified_at: record.modified_at,
        })
    }
}

/// Database-level change summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseChanges {
    /// Zones with record changes since the supplied token.
    pub changed_zones: Vec<String>,
    /// Continuation token for the next database-level fetch.
    pub change_token: Option<String>,
}

/// Record-level changes within one zone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneChanges {
    pub changed_records: Vec<RemoteRecord>,
    pub deleted_record_names: Vec<String>,
    /// Continuation token for the next zone-level fetch.
    pub change_token: Option<String>,
}

/// Outcome of a record modification batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifyRecordsResult {
    pub saved_records: Vec<RemoteRecord>,
    pub deleted_record_names: Vec<String>,
}

/// Envelope of a push notification delivered by the platform.
///
/// Only database-change notifications for this app's container trigger a
/// fetch; anything else is acknowledged as no-data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub notification_type: String,
    pub container: String,
    pub scope: String,
}

impl PushEnvelope {
    pub const DATABASE_CHANGE: &'static str = "database-change";
    pub const PRIVATE_SCOPE: &'static str = "private";

    /// A well-formed database-change notification for the given container.
    #[must_use]
    pub fn database_change(container: impl Into<String>) -> Self {
        Self {
            notification_type: Self::DATABASE_CHANGE.to_string(),
            container: container.into(),
            scope: Self::PRIVATE_SCOPE.to_string(),
        }
    }

    #[must_use]
    pub fn is_database_change_for(&self, container: &str) -> bool {
        self.notification_type == Self::DATABASE_CHANGE
            && self.scope == Self::PRIVATE_SCOPE
            && self.container == container
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_round_trip() {
        let thought = Thought::new(ThoughtId::new(), "title", "body");
        let record = RemoteRecord::from_thought(&thought);
        assert_eq!(record.name, thought.id.to_string());
        assert!(record.created_at.is_none());

        let back = Thought::try_from(&record).unwrap();
        assert_eq!(back, thought);
    }

    #[test]
    fn test_bad_record_name_is_conversion_error() {
        let record = RemoteRecord {
            name: "not-a-uuid".to_string(),
            title: String::new(),
            body: String::new(),
            created_at: None,
            modified_at: None,
        };
        let err = Thought::try_from(&record).unwrap_err();
        assert!(matches!(err, Error::RecordConversion(_)));
    }

    #[test]
    fn test_push_envelope_validation() {
        let envelope = PushEnvelope::database_change("app.jot");
        assert!(envelope.is_database_change_for("app.jot"));
        assert!(!envelope.is_database_change_for("app.other"));

        let wrong_scope = PushEnvelope {
            scope: "public".to_string(),
            ..PushEnvelope::database_change("app.jot")
        };
        assert!(!wrong_scope.is_database_change_for("app.jot"));
    }
}
