//! Raw remote record-store transport contract

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::remote::types::{
    AccountState, DatabaseChanges, ModifyRecordsResult, RemoteRecord, ZoneChanges,
};

/// The remote record store as the engine sees it.
///
/// Implementations speak the actual cloud protocol; the
/// [`crate::testing::ReplayingRemoteStore`] replays queued responses for
/// deterministic tests. All failures surface as
/// [`crate::Error::RemoteUnavailable`].
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Ensure the given zones exist. Idempotent on the server side.
    async fn modify_zones(&self, saving: Vec<String>) -> Result<()>;

    /// Ensure the given database subscriptions exist. Idempotent on the
    /// server side.
    async fn modify_subscriptions(&self, saving: Vec<String>) -> Result<()>;

    /// Fetch the database-level change summary since the given token.
    async fn fetch_database_changes(&self, since: Option<String>) -> Result<DatabaseChanges>;

    /// Fetch record-level changes for one zone since the given token.
    async fn fetch_zone_changes(&self, zone: String, since: Option<String>) -> Result<ZoneChanges>;

    /// Upsert and delete records in one batch. Saved records come back
    /// with server-assigned timestamps.
    async fn modify_records(
        &self,
        saving: Vec<RemoteRecord>,
        deleting: Vec<String>,
    ) -> Result<ModifyRecordsResult>;

    /// The record name identifying the currently authenticated user.
    async fn user_record_name(&self) -> Result<String>;

    /// Live feed of account availability transitions.
    ///
    /// Single consumer; the feed stays open for the transport's lifetime.
    fn account_states(&self) -> mpsc::UnboundedReceiver<AccountState>;
}
