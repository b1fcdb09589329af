//! SQLite-backed preferences and sync-token storage

use crate::prefs::{Preferences, TokenStore};
use rusqlite::params;
use std::sync::Arc;
use tracing::error;

use super::Database;

const REMOTE_SETUP_DONE_KEY: &str = "remote_setup_done";
const REMOTE_USER_ID_KEY: &str = "remote_user_id";
const SIMULATE_SEND_FAILURE_KEY: &str = "simulate_send_failure";
const SIMULATE_FETCH_FAILURE_KEY: &str = "simulate_fetch_failure";
const DATABASE_TOKEN_KEY: &str = "token.database";
const ZONE_TOKEN_PREFIX: &str = "token.zone.";

/// `SQLite` implementation of [`Preferences`] and [`TokenStore`].
///
/// Both live in the same `settings` key-value table; tokens use a `token.`
/// key prefix so they can be cleared independently of the preferences.
/// Storage failures are logged and reads fall back to defaults, per the
/// preferences contract.
pub struct SqlitePreferences {
    db: Arc<Database>,
}

impl SqlitePreferences {
    /// Create a new preferences store backed by the given database
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn get(&self, key: &str) -> Option<String> {
        let conn = self.db.conn();
        match conn.query_row(
            "SELECT value FROM settings WHERE key = ?",
            params![key],
            |row| row.get::<_, String>(0),
        ) {
            Ok(value) => Some(value),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(err) => {
                error!(key, %err, "failed to read setting");
                None
            }
        }
    }

    fn set(&self, key: &str, value: Option<&str>) {
        let conn = self.db.conn();
        let result = match value {
            Some(value) => conn.execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
                params![key, value],
            ),
            None => conn.execute("DELETE FROM settings WHERE key = ?", params![key]),
        };
        if let Err(err) = result {
            error!(key, %err, "failed to write setting");
        }
    }

    fn get_bool(&self, key: &str) -> bool {
        self.get(key).is_some_and(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }

    fn set_bool(&self, key: &str, value: bool) {
        self.set(key, Some(if value { "true" } else { "false" }));
    }
}

impl Preferences for SqlitePreferences {
    fn remote_setup_done(&self) -> bool {
        self.get_bool(REMOTE_SETUP_DONE_KEY)
    }

    fn set_remote_setup_done(&self, done: bool) {
        self.set_bool(REMOTE_SETUP_DONE_KEY, done);
    }

    fn remote_user_id(&self) -> Option<String> {
        self.get(REMOTE_USER_ID_KEY)
    }

    fn set_remote_user_id(&self, user_id: Option<&str>) {
        self.set(REMOTE_USER_ID_KEY, user_id);
    }

    fn simulate_send_failure(&self) -> bool {
        self.get_bool(SIMULATE_SEND_FAILURE_KEY)
    }

    fn set_simulate_send_failure(&self, simulate: bool) {
        self.set_bool(SIMULATE_SEND_FAILURE_KEY, simulate);
    }

    fn simulate_fetch_failure(&self) -> bool {
        self.get_bool(SIMULATE_FETCH_FAILURE_KEY)
    }

    fn set_simulate_fetch_failure(&self, simulate: bool) {
        self.set_bool(SIMULATE_FETCH_FAILURE_KEY, simulate);
    }

    fn clear(&self) {
        for key in [
            REMOTE_SETUP_DONE_KEY,
            REMOTE_USER_ID_KEY,
            SIMULATE_SEND_FAILURE_KEY,
            SIMULATE_FETCH_FAILURE_KEY,
        ] {
            self.set(key, None);
        }
    }
}

impl TokenStore for SqlitePreferences {
    fn database_token(&self) -> Option<String> {
        self.get(DATABASE_TOKEN_KEY)
    }

    fn set_database_token(&self, token: Option<&str>) {
        self.set(DATABASE_TOKEN_KEY, token);
    }

    fn zone_token(&self, zone: &str) -> Option<String> {
        self.get(&format!("{ZONE_TOKEN_PREFIX}{zone}"))
    }

    fn set_zone_token(&self, zone: &str, token: Option<&str>) {
        self.set(&format!("{ZONE_TOKEN_PREFIX}{zone}"), token);
    }

    fn clear(&self) {
        let conn = self.db.conn();
        if let Err(err) = conn.execute(
            "DELETE FROM settings WHERE key = ? OR key LIKE ?",
            params![DATABASE_TOKEN_KEY, format!("{ZONE_TOKEN_PREFIX}%")],
        ) {
            error!(%err, "failed to clear sync tokens");
        }
    }
}
