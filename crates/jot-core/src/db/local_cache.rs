//! SQLite-backed local cache of the thought set

use crate::cache::LocalCache;
use crate::error::{Error, Result};
use crate::models::Thought;
use chrono::{DateTime, Utc};
use rusqlite::params;
use std::sync::Arc;

use super::Database;

/// `SQLite` implementation of [`LocalCache`].
///
/// Stores the full thought set; `write_all` replaces it atomically so the
/// cache always mirrors the in-memory set at rest. Timestamps round-trip
/// as RFC 3339 text for cross-platform stability.
pub struct SqliteLocalCache {
    db: Arc<Database>,
}

impl SqliteLocalCache {
    /// Create a new cache backed by the given database
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn parse_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, Thought)> {
        let id: String = row.get(0)?;
        let thought = Thought {
            id: Default::default(), // replaced below once the id string parses
            title: row.get(1)?,
            body: row.get(2)?,
            created_at: parse_timestamp(row.get::<_, Option<String>>(3)?),
            modified_at: parse_timestamp(row.get::<_, Option<String>>(4)?),
        };
        Ok((id, thought))
    }
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn encode_timestamp(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|t| t.to_rfc3339())
}

impl LocalCache for SqliteLocalCache {
    fn read(&self) -> Result<Vec<Thought>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, title, body, created_at, modified_at FROM thoughts ORDER BY rowid",
        )?;

        let rows = stmt
            .query_map([], Self::parse_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut thoughts = Vec::with_capacity(rows.len());
        for (id, mut thought) in rows {
            thought.id = id
                .parse()
                .map_err(|_| Error::LocalPersistence(format!("invalid cached thought id: {id}")))?;
            thoughts.push(thought);
        }
        Ok(thoughts)
    }

    fn write_all(&self, thoughts: &[Thought]) -> Result<()> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM thoughts", [])?;
        for thought in thoughts {
            tx.execute(
                "INSERT INTO thoughts (id, title, body, created_at, modified_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    thought.id.to_string(),
                    thought.title,
                    thought.body,
                    encode_timestamp(thought.created_at),
                    encode_timestamp(thought.modified_at),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.db.conn().execute("DELETE FROM thoughts", [])?;
        Ok(())
    }
}
