//! Stream identity and versioning.
//!
//! Every aggregate instance owns one stream. Stream ids are built as
//! `{aggregate}-{id}` so that they stay readable in logs and metadata.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for `StreamId` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid stream ID: {0}")]
pub struct ParseStreamIdError(String);

/// Identifier of one event stream (one aggregate instance).
///
/// `FromStr` validates input and rejects empty strings; `new` and `From`
/// trust the caller.
///
/// ```
/// use roomledger_core::stream::StreamId;
///
/// let id = StreamId::for_aggregate("reservation", "42");
/// assert_eq!(id.as_str(), "reservation-42");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(String);

impl StreamId {
    /// Create a new `StreamId` from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Stream id for an instance of the given aggregate kind.
    #[must_use]
    pub fn for_aggregate(aggregate: &str, id: impl fmt::Display) -> Self {
        Self(format!("{aggregate}-{id}"))
    }

    /// Get the stream ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert the `StreamId` into its inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StreamId {
    type Err = ParseStreamIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ParseStreamIdError("Stream ID cannot be empty".to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for StreamId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for StreamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Number of events in a stream.
///
/// A fresh stream is at [`Version::INITIAL`]; appending `n` events moves it to
/// `version + n`. The event appended at version `v` is stamped with `v + 1`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// Version of a stream with no events.
    pub const INITIAL: Self = Self(0);

    /// Create a version from a raw count.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw count.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The version after one more event.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The version after `count` more events.
    #[must_use]
    pub const fn advance(self, count: u64) -> Self {
        Self(self.0 + count)
    }

    /// Whether the stream is empty at this version.
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_stream_ids_are_prefixed() {
        let id = StreamId::for_aggregate("reservation", 7);
        assert_eq!(id.as_str(), "reservation-7");
        assert_eq!(id.to_string(), "reservation-7");
        assert_eq!(id.into_inner(), "reservation-7");
    }

    #[test]
    fn parse_rejects_blank() {
        assert!("".parse::<StreamId>().is_err());
        assert!("   ".parse::<StreamId>().is_err());
        assert_eq!("a-1".parse::<StreamId>().ok(), Some(StreamId::new("a-1")));
    }

    #[test]
    fn versions_advance() {
        assert!(Version::INITIAL.is_initial());
        assert_eq!(Version::INITIAL.next(), Version::new(1));
        assert_eq!(Version::new(2).advance(3), Version::new(5));
        assert!(Version::new(1) < Version::new(2));
        assert_eq!(u64::from(Version::from(9_u64)), 9);
    }
}
