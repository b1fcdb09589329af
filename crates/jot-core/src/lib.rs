//! jot-core - Sync engine for jot
//!
//! This crate owns the authoritative in-memory set of thoughts and keeps it
//! reconciled against a remote record store and a local on-device cache.
//! The UI layers (desktop, mobile) only read published snapshots and send
//! actions; all mutation runs through the [`store::Store`].

pub mod cache;
pub mod db;
pub mod error;
pub mod ids;
pub mod models;
pub mod prefs;
pub mod remote;
pub mod store;
pub mod testing;

pub use error::{Error, Result};
pub use models::{Thought, ThoughtId};
pub use remote::{AccountState, FetchResult};
pub use store::{Action, Behavior, Store, TransactionStatus};
