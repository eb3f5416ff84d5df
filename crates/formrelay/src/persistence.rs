//! Turning relayed text into stored records.

use std::sync::Arc;

use chrono::Local;

use crate::error::Result;
use crate::storage::Storage;
use crate::submission::Record;

/// Parses decoded submissions and inserts them into the store.
///
/// Cloning is cheap; all clones share one [`Storage`].
#[derive(Debug, Clone)]
pub struct Persistence {
    storage: Arc<Storage>,
}

impl Persistence {
    /// Create a persistence step writing to `storage`.
    #[must_use]
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// The backing store.
    #[must_use]
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Parse `text`, stamp it with the current server time and insert it.
    ///
    /// Returns the new record's id. On error nothing has been inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if a segment is malformed or the insert fails.
    pub fn persist(&self, text: &str) -> Result<i64> {
        let record = Record::from_submission(text, &Local::now())?;
        self.storage.insert(&record)
    }
}
