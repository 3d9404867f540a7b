//! SQLite document store
//!
//! Conditional writes are a single `UPDATE ... WHERE version = ?`, so separate
//! processes sharing one database file still get compare-and-swap semantics.
//! Change notification only reaches watchers in the same process.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::{debug, instrument};

use super::migrations;
use super::parse::{parse_body, parse_body_opt, version_from_i64, OptionalExt};
use super::watch::WatchHub;
use super::{CasResult, CollectionWatch, DocumentStore, DocumentWatch, Snapshot};
use crate::error::Result;
use crate::ids;

/// How long a writer waits for another connection's lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Main database handle
pub struct SqliteStore {
    conn: Mutex<Connection>,
    hub: WatchHub,
}

impl SqliteStore {
    /// Open or create database at the given path
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        Self::init(conn)
    }

    /// Open in-memory database (for testing)
    #[instrument]
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            hub: WatchHub::default(),
        })
    }

    /// Get current schema version
    pub fn schema_version(&self) -> u32 {
        migrations::get_current_version(&self.conn()).unwrap_or(0)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_with(conn: &Connection, collection: &str, id: &str) -> Result<Snapshot> {
        let snapshot = conn
            .query_row(
                "SELECT version, body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| {
                    Ok(Snapshot {
                        version: version_from_i64(row.get(0)?),
                        value: parse_body_opt(row.get(1)?)?,
                    })
                },
            )
            .optional()?;

        Ok(snapshot.unwrap_or_else(Snapshot::absent))
    }

    fn list_with(conn: &Connection, collection: &str) -> Result<Vec<(String, Value)>> {
        let mut stmt = conn.prepare(
            "SELECT id, body FROM documents
             WHERE collection = ?1 AND body IS NOT NULL
             ORDER BY id",
        )?;

        let docs = stmt
            .query_map(params![collection], |row| {
                Ok((row.get::<_, String>(0)?, parse_body(&row.get::<_, String>(1)?)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(docs)
    }

    fn publish(&self, collection: &str, id: &str) -> Result<()> {
        self.hub.publish_document(collection, id, || {
            Ok(Self::read_with(&self.conn(), collection, id)?.value)
        })?;
        self.hub
            .publish_collection(collection, || Self::list_with(&self.conn(), collection))
    }
}

impl DocumentStore for SqliteStore {
    fn generate_id(&self, _collection: &str) -> String {
        ids::push_id()
    }

    fn read(&self, collection: &str, id: &str) -> Result<Snapshot> {
        Self::read_with(&self.conn(), collection, id)
    }

    #[instrument(skip(self, value))]
    fn write(&self, collection: &str, id: &str, value: &Value) -> Result<u64> {
        let body = serde_json::to_string(value)?;
        let version: i64 = self.conn().query_row(
            "INSERT INTO documents (collection, id, version, body, updated_at)
             VALUES (?1, ?2, 1, ?3, ?4)
             ON CONFLICT(collection, id) DO UPDATE SET
                version = version + 1,
                body = excluded.body,
                updated_at = excluded.updated_at
             RETURNING version",
            params![collection, id, body, Utc::now().to_rfc3339()],
            |row| row.get(0),
        )?;

        self.publish(collection, id)?;
        Ok(version_from_i64(version))
    }

    #[instrument(skip(self))]
    fn remove(&self, collection: &str, id: &str) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE documents SET version = version + 1, body = NULL, updated_at = ?3
             WHERE collection = ?1 AND id = ?2 AND body IS NOT NULL",
            params![collection, id, Utc::now().to_rfc3339()],
        )?;

        if changed > 0 {
            self.publish(collection, id)?;
        }
        Ok(())
    }

    fn compare_and_swap(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
        value: Option<&Value>,
    ) -> Result<CasResult> {
        let body = value.map(serde_json::to_string).transpose()?;
        let now = Utc::now().to_rfc3339();

        let result = {
            let conn = self.conn();
            let changed = if expected_version == 0 {
                conn.execute(
                    "INSERT INTO documents (collection, id, version, body, updated_at)
                     VALUES (?1, ?2, 1, ?3, ?4)
                     ON CONFLICT(collection, id) DO NOTHING",
                    params![collection, id, body, now],
                )?
            } else {
                conn.execute(
                    "UPDATE documents SET version = version + 1, body = ?3, updated_at = ?4
                     WHERE collection = ?1 AND id = ?2 AND version = ?5",
                    params![collection, id, body, now, expected_version as i64],
                )?
            };

            if changed == 1 {
                CasResult::Committed(expected_version + 1)
            } else {
                let actual = Self::read_with(&conn, collection, id)?.version;
                debug!(collection, id, expected_version, actual, "Conditional write rejected");
                CasResult::Conflict { actual }
            }
        };

        if matches!(result, CasResult::Committed(_)) {
            self.publish(collection, id)?;
        }
        Ok(result)
    }

    fn list(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        Self::list_with(&self.conn(), collection)
    }

    fn watch(&self, collection: &str, id: &str) -> Result<DocumentWatch> {
        self.hub.subscribe_document(collection, id, || {
            Ok(Self::read_with(&self.conn(), collection, id)?.value)
        })
    }

    fn watch_collection(&self, collection: &str) -> Result<CollectionWatch> {
        self.hub
            .subscribe_collection(collection, || Self::list_with(&self.conn(), collection))
    }
}
