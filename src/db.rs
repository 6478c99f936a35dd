use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::models::{EntityKind, PersistedEventRecord};
use crate::utils;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event ({event_id}, {event_type}) is already recorded")]
    DuplicateKey { event_id: String, event_type: String },
    #[error("event ({event_id}, {event_type}) is not recorded")]
    NotFound { event_id: String, event_type: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Durable `(event_id, event_type) -> tickets_available` map. All mutations
/// in a run accumulate in one transaction; `commit` makes them visible to the
/// next run atomically.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        utils::ensure_parent(&path.to_path_buf());
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self { conn };
        store.init_schema()?;
        store.begin()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events(
                event_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                tickets_available INTEGER NOT NULL,
                first_seen_utc TEXT NOT NULL,
                PRIMARY KEY (event_id, event_type)
            );",
        )?;
        Ok(())
    }

    fn begin(&self) -> Result<(), StoreError> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    pub fn lookup(
        &self,
        event_id: &str,
        event_type: EntityKind,
    ) -> Result<Option<PersistedEventRecord>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT tickets_available FROM events WHERE event_id = ?1 AND event_type = ?2",
                params![event_id, event_type.as_str()],
                |row| row.get::<_, bool>(0),
            )
            .optional()?;

        Ok(row.map(|tickets_available| PersistedEventRecord {
            event_id: event_id.to_string(),
            event_type,
            tickets_available,
        }))
    }

    pub fn insert(
        &self,
        event_id: &str,
        event_type: EntityKind,
        tickets_available: bool,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let result = self.conn.execute(
            "INSERT INTO events (event_id, event_type, tickets_available, first_seen_utc)
             VALUES (?1, ?2, ?3, ?4)",
            params![event_id, event_type.as_str(), tickets_available, now],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateKey {
                    event_id: event_id.to_string(),
                    event_type: event_type.as_str().to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn update(
        &self,
        event_id: &str,
        event_type: EntityKind,
        tickets_available: bool,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE events SET tickets_available = ?3 WHERE event_id = ?1 AND event_type = ?2",
            params![event_id, event_type.as_str(), tickets_available],
        )?;

        if changed == 0 {
            return Err(StoreError::NotFound {
                event_id: event_id.to_string(),
                event_type: event_type.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// Persists everything since the last commit and opens a fresh
    /// transaction for any following run.
    pub fn commit(&self) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT")?;
        self.begin()
    }
}
