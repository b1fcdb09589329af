//! Remote record-store boundary
//!
//! [`transport::RemoteStore`] is the raw transport contract (zone and
//! subscription management, token-based delta fetch, record CRUD).
//! [`adapter::RemoteStoreAdapter`] wraps a transport and owns everything
//! domain-shaped: record conversion, idempotent setup, the change feed,
//! bounded retry, and push-notification ingestion.

mod adapter;
mod retry;
mod transport;
mod types;

pub use adapter::{AdapterConfig, RemoteStoreAdapter};
pub use retry::RetryPolicy;
pub use transport::RemoteStore;
pub use types::{
    AccountState, CloudChange, DatabaseChanges, FetchResult, ModifyRecordsResult, PushEnvelope,
    RemoteRecord, ZoneChanges,
};
