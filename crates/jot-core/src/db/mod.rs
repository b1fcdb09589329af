//! Local persistence layer for jot

mod connection;
mod local_cache;
mod migrations;
mod preferences;

pub use connection::Database;
pub use local_cache::SqliteLocalCache;
pub use preferences::SqlitePreferences;
