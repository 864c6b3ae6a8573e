//! Checkpoint identifiers.

use crate::error::{CkptError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A sortable, globally unique checkpoint identifier.
///
/// The textual form is `YYYYMMDDTHHMMSSmmmZ-xxxxxxxx`: a UTC timestamp with
/// millisecond precision followed by eight hex characters of a random v4 UUID.
/// Lexicographic order equals chronological order, so external tooling can
/// sort ref names without consulting metadata.
///
/// # Examples
///
/// ```
/// use ckpt_core::CheckpointId;
///
/// let id: CheckpointId = "20260101T120000123Z-0a1b2c3d".parse().unwrap();
/// assert_eq!(id.timestamp_ms(), 1767268800123);
/// assert_eq!(id.suffix(), "0a1b2c3d");
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CheckpointId {
    text: String,
    timestamp_ms: i64,
}

impl CheckpointId {
    /// Length of the timestamp prefix.
    const STAMP_LEN: usize = 19;

    /// Length of the random suffix.
    const SUFFIX_LEN: usize = 8;

    /// Generates a new id for `now_ms`.
    ///
    /// When `last` is given the new id is strictly greater than it, even if
    /// the clock went backwards or two ids land in the same millisecond.
    pub fn generate(now_ms: i64, last: Option<&CheckpointId>) -> Self {
        let timestamp_ms = match last {
            Some(prev) if prev.timestamp_ms >= now_ms => prev.timestamp_ms + 1,
            _ => now_ms,
        };
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self::from_parts(timestamp_ms, &suffix[..Self::SUFFIX_LEN])
    }

    fn from_parts(timestamp_ms: i64, suffix: &str) -> Self {
        let stamp = DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
            .unwrap_or_default()
            .format("%Y%m%dT%H%M%S%3fZ");
        Self {
            text: format!("{}-{}", stamp, suffix),
            timestamp_ms,
        }
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Unix timestamp in milliseconds encoded in the id.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    /// The creation time encoded in the id.
    pub fn created_at(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp_ms).unwrap_or_default()
    }

    /// The random suffix.
    pub fn suffix(&self) -> &str {
        &self.text[Self::STAMP_LEN + 1..]
    }

    fn parse(s: &str) -> Result<Self> {
        let invalid = |reason: &str| CkptError::CheckpointNotFound(format!("{} ({})", s, reason));

        if s.len() != Self::STAMP_LEN + 1 + Self::SUFFIX_LEN || !s.is_ascii() {
            return Err(invalid("malformed id"));
        }
        let (stamp, rest) = s.split_at(Self::STAMP_LEN);
        let suffix = &rest[1..];
        if !rest.starts_with('-') || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid("malformed suffix"));
        }
        if !stamp.ends_with('Z') {
            return Err(invalid("missing UTC marker"));
        }

        let seconds = NaiveDateTime::parse_from_str(&stamp[..15], "%Y%m%dT%H%M%S")
            .map_err(|_| invalid("malformed timestamp"))?;
        let millis: i64 = stamp[15..18]
            .parse()
            .map_err(|_| invalid("malformed milliseconds"))?;

        Ok(Self {
            text: s.to_string(),
            timestamp_ms: seconds.and_utc().timestamp_millis() + millis,
        })
    }
}

impl FromStr for CheckpointId {
    type Err = CkptError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s.trim())
    }
}

impl TryFrom<String> for CheckpointId {
    type Error = CkptError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<CheckpointId> for String {
    fn from(id: CheckpointId) -> Self {
        id.text
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CheckpointId({})", self.text)
    }
}
