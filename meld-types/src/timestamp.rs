//! Fixed-width ISO-8601 UTC timestamps.
//!
//! Every timestamp in the system comes from this one helper so the format
//! cannot drift: UTC, microsecond precision, `Z` suffix (never `+00:00`).
//! Well-formed timestamps are fixed-width, which makes their lexicographic
//! order equal to their temporal order — the LWW engine relies on plain
//! string comparison.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// An ISO-8601 UTC timestamp with microsecond precision.
///
/// Ordering is lexicographic on the underlying string, which for timestamps
/// produced by this type is identical to temporal ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IsoTimestamp(String);

impl IsoTimestamp {
    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Converts a filesystem modification time.
    #[must_use]
    pub fn from_system_time(time: SystemTime) -> Self {
        Self::from_datetime(DateTime::<Utc>::from(time))
    }

    fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    /// Parses and canonicalises a timestamp string.
    ///
    /// Accepts any RFC 3339 offset; the result is re-normalised to UTC with
    /// the canonical fixed-width format.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|e| crate::Error::InvalidTimestamp(format!("{s}: {e}")))?;
        Ok(Self::from_datetime(dt.with_timezone(&Utc)))
    }

    /// Returns the timestamp as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Converts back to a [`SystemTime`], if the string is well-formed.
    #[must_use]
    pub fn to_system_time(&self) -> Option<SystemTime> {
        DateTime::parse_from_rfc3339(&self.0)
            .ok()
            .map(|dt| SystemTime::from(dt.with_timezone(&Utc)))
    }
}

impl fmt::Display for IsoTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
