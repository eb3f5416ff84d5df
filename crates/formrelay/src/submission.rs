//! Submission decoding and record construction.
//!
//! A submission is the raw form-encoded body a client posted. It is decoded as
//! a whole (`+` becomes a space, `%XX` escapes are expanded), then split into
//! `key=value` pairs. The resulting [`Record`] always carries a server-assigned
//! `date` field.

use std::collections::BTreeMap;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of the server-assigned timestamp field.
pub const DATE_FIELD: &str = "date";

/// Format of the `date` field, fixed width with second precision.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One persisted document: a flat string mapping plus the identifier the
/// store assigned to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Store-assigned identifier, `None` until inserted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Field name to field value, including `date`.
    pub fields: BTreeMap<String, String>,
}

impl Record {
    /// Build a record from a decoded-to-text submission, stamping it with `now`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedSegment`] if any segment lacks `=`. No partial
    /// record is produced in that case.
    pub fn from_submission<Tz: TimeZone>(text: &str, now: &DateTime<Tz>) -> Result<Self>
    where
        Tz::Offset: std::fmt::Display,
    {
        let decoded = decode(text);
        let mut fields = parse_fields(&decoded)?;
        fields.insert(DATE_FIELD.to_string(), now.format(DATE_FORMAT).to_string());
        Ok(Self { id: None, fields })
    }

    /// Build a record stamped with the current local time.
    ///
    /// # Errors
    ///
    /// See [`Record::from_submission`].
    pub fn stamped_now(text: &str) -> Result<Self> {
        Self::from_submission(text, &Local::now())
    }

    /// The raw `date` field.
    #[must_use]
    pub fn date(&self) -> Option<&str> {
        self.fields.get(DATE_FIELD).map(String::as_str)
    }

    /// The `date` field parsed back into a timestamp.
    #[must_use]
    pub fn date_time(&self) -> Option<NaiveDateTime> {
        self.date()
            .and_then(|d| NaiveDateTime::parse_from_str(d, DATE_FORMAT).ok())
    }

    /// Look up a field by name.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Number of fields, including `date`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Decode form encoding over the whole string.
///
/// Invalid escapes are kept verbatim and invalid UTF-8 in the decoded bytes is
/// replaced with U+FFFD.
#[must_use]
pub fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Split decoded text into fields.
///
/// Segments are separated by `&` and split on their first `=`. Later duplicate
/// keys overwrite earlier ones.
///
/// # Errors
///
/// Returns [`Error::MalformedSegment`] for the first segment without `=`.
pub fn parse_fields(decoded: &str) -> Result<BTreeMap<String, String>> {
    let mut fields = BTreeMap::new();
    for segment in decoded.split('&') {
        let (key, value) = segment
            .split_once('=')
            .ok_or_else(|| Error::malformed_segment(segment))?;
        fields.insert(key.to_string(), value.to_string());
    }
    Ok(fields)
}
