//! Document store for relayed submissions.
//!
//! Records live in a `messages` collection inside an `SQLite` database. Each
//! row holds one record serialized as a JSON document. Records are only ever
//! inserted and read; there is no update or delete path.
//!
//! A single long-lived connection is shared behind a mutex. Every operation
//! acquires it for the duration of one call and releases it on return,
//! whether the call succeeds or fails.

pub mod migrations;
pub mod schema;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::submission::{Record, DATE_FIELD};

/// In-memory store URI.
pub const MEMORY_URI: &str = ":memory:";

/// Storage engine for records.
#[derive(Debug)]
pub struct Storage {
    /// URI the store was opened with.
    uri: String,
    /// Shared connection.
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open or create a store at the given `SQLite` URI.
    ///
    /// Accepts `file:` URIs, plain paths and `:memory:`. Parent directories of
    /// a file-backed store are created if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or schema initialization fails.
    pub fn open(uri: impl Into<String>) -> Result<Self> {
        let uri = uri.into();

        if let Some(path) = file_path_of(&uri) {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                if !parent.exists() {
                    std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
            }
        }

        debug!(uri = %uri, "opening store");
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let mut conn =
            Connection::open_with_flags(&uri, flags).map_err(|source| Error::DatabaseOpen {
                uri: uri.clone(),
                source,
            })?;

        if uri != MEMORY_URI {
            let _mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
        }

        migrations::initialize_schema(&mut conn)?;

        info!(uri = %uri, "store opened");
        Ok(Self {
            uri,
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(MEMORY_URI)
    }

    /// The URI this store was opened with.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Acquire the connection for one operation.
    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::StorePoisoned)
    }

    /// Insert a record as a new document and return its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the record has no `date` field, cannot be
    /// serialized, or the insert fails.
    pub fn insert(&self, record: &Record) -> Result<i64> {
        let date = record
            .date()
            .ok_or_else(|| Error::internal("record is missing its date field"))?;
        let document = serde_json::to_string(&record.fields)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO messages (date, document) VALUES (?1, ?2)",
            params![date, document],
        )?;
        let id = conn.last_insert_rowid();

        debug!(id, fields = record.len(), "record inserted");
        Ok(id)
    }

    /// Get a record by its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored document is corrupt.
    pub fn get(&self, id: i64) -> Result<Option<Record>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT id, document FROM messages WHERE id = ?1",
                [id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        row.map(|(id, document)| row_to_record(id, &document))
            .transpose()
    }

    /// Get the most recently inserted records, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored document is corrupt.
    pub fn get_recent(&self, limit: usize) -> Result<Vec<Record>> {
        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = {
            let conn = self.conn()?;
            let mut stmt =
                conn.prepare("SELECT id, document FROM messages ORDER BY id DESC LIMIT ?1")?;
            let rows = stmt
                .query_map([limit_i64], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        rows.iter()
            .map(|(id, document)| row_to_record(*id, document))
            .collect()
    }

    /// Count stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Get store statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let conn = self.conn()?;
        let (total_records, oldest_date, newest_date): (i64, Option<String>, Option<String>) =
            conn.query_row(
                "SELECT COUNT(*), MIN(date), MAX(date) FROM messages",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

        let db_size_bytes = file_path_of(&self.uri)
            .and_then(|path| std::fs::metadata(path).ok())
            .map_or(0, |m| m.len());

        Ok(StorageStats {
            total_records,
            oldest_date,
            newest_date,
            db_size_bytes,
        })
    }
}

/// Statistics about the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Total number of records stored.
    pub total_records: i64,
    /// `date` of the oldest record.
    pub oldest_date: Option<String>,
    /// `date` of the newest record.
    pub newest_date: Option<String>,
    /// Size of the database file in bytes, 0 for in-memory stores.
    pub db_size_bytes: u64,
}

fn row_to_record(id: i64, document: &str) -> Result<Record> {
    let fields: BTreeMap<String, String> = serde_json::from_str(document)?;
    if !fields.contains_key(DATE_FIELD) {
        return Err(Error::internal(format!("record {id} has no date field")));
    }
    Ok(Record {
        id: Some(id),
        fields,
    })
}

/// File backing a store URI, if any.
fn file_path_of(uri: &str) -> Option<PathBuf> {
    if uri == MEMORY_URI || uri.is_empty() {
        return None;
    }
    let path = match uri.strip_prefix("file:") {
        Some(rest) => {
            let rest = rest.split(['?', '#']).next().unwrap_or_default();
            if rest.is_empty() || rest == MEMORY_URI || uri.contains("mode=memory") {
                return None;
            }
            rest.strip_prefix("//localhost").or_else(|| rest.strip_prefix("//")).unwrap_or(rest)
        }
        None => uri,
    };
    Some(PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn create_test_storage() -> Storage {
        Storage::open_in_memory().expect("failed to create test storage")
    }

    fn record_at(body: &str, second: u32) -> Record {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, second).unwrap();
        Record::from_submission(body, &at).unwrap()
    }

    #[test]
    fn test_open_in_memory() {
        let storage = create_test_storage();
        assert_eq!(storage.uri(), ":memory:");
    }

    #[test]
    fn test_insert_and_get() {
        let storage = create_test_storage();
        let id = storage.insert(&record_at("name=Alice&text=Hi", 0)).unwrap();

        let record = storage.get(id).unwrap().unwrap();
        assert_eq!(record.id, Some(id));
        assert_eq!(record.get("name"), Some("Alice"));
        assert_eq!(record.get("text"), Some("Hi"));
        assert_eq!(record.date(), Some("2024-05-01 12:00:00"));
    }

    #[test]
    fn test_identical_records_are_not_deduplicated() {
        let storage = create_test_storage();
        let record = record_at("a=1", 0);

        let first = storage.insert(&record).unwrap();
        let second = storage.insert(&record).unwrap();

        assert_ne!(first, second);
        assert_eq!(storage.count().unwrap(), 2);
    }

    #[test]
    fn test_insert_requires_date() {
        let storage = create_test_storage();
        let record = Record {
            id: None,
            fields: BTreeMap::from([("a".to_string(), "1".to_string())]),
        };

        assert!(storage.insert(&record).is_err());
        assert_eq!(storage.count().unwrap(), 0);
    }

    #[test]
    fn test_get_nonexistent() {
        let storage = create_test_storage();
        assert!(storage.get(99_999).unwrap().is_none());
    }

    #[test]
    fn test_get_recent_newest_first() {
        let storage = create_test_storage();
        for i in 0..5 {
            storage.insert(&record_at(&format!("n={i}"), i)).unwrap();
        }

        let recent = storage.get_recent(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].get("n"), Some("4"));
        assert_eq!(recent[2].get("n"), Some("2"));
    }

    #[test]
    fn test_corrupt_document_is_an_error() {
        let storage = create_test_storage();
        storage
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO messages (date, document) VALUES ('x', 'not json')",
                [],
            )
            .unwrap();

        assert!(storage.get_recent(10).is_err());
    }

    #[test]
    fn test_stats_empty() {
        let stats = create_test_storage().stats().unwrap();

        assert_eq!(stats.total_records, 0);
        assert!(stats.oldest_date.is_none());
        assert!(stats.newest_date.is_none());
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[test]
    fn test_stats_with_data() {
        let storage = create_test_storage();
        storage.insert(&record_at("a=1", 5)).unwrap();
        storage.insert(&record_at("a=2", 9)).unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.oldest_date.as_deref(), Some("2024-05-01 12:00:05"));
        assert_eq!(stats.newest_date.as_deref(), Some("2024-05-01 12:00:09"));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("file:{}", dir.path().join("nested/messages.db").display());

        let id = {
            let storage = Storage::open(uri.clone()).unwrap();
            storage.insert(&record_at("k=v", 0)).unwrap()
        };

        let storage = Storage::open(uri).unwrap();
        assert_eq!(storage.get(id).unwrap().unwrap().get("k"), Some("v"));
        assert!(storage.stats().unwrap().db_size_bytes > 0);
    }

    #[test]
    fn test_file_path_of() {
        assert_eq!(file_path_of(":memory:"), None);
        assert_eq!(file_path_of("file::memory:"), None);
        assert_eq!(file_path_of("file:mem?mode=memory&cache=shared"), None);
        assert_eq!(
            file_path_of("file:/var/lib/x.db?mode=rwc"),
            Some(PathBuf::from("/var/lib/x.db"))
        );
        assert_eq!(
            file_path_of("file:///var/lib/x.db"),
            Some(PathBuf::from("/var/lib/x.db"))
        );
        assert_eq!(file_path_of("data/x.db"), Some(PathBuf::from("data/x.db")));
    }
}
