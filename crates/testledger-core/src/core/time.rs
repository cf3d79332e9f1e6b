// crates/testledger-core/src/core/time.rs
// ============================================================================
// Module: Test Ledger Time Model
// Description: Millisecond timestamps with RFC 3339 wire formatting.
// Purpose: Give every persisted instant one canonical, comparable form.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Timestamps are stored as unix epoch milliseconds so SQL comparisons stay
//! integer comparisons. On the wire they are RFC 3339 strings; integer
//! milliseconds are also accepted on input. The core never reads wall-clock
//! time directly: hosts inject a [`crate::Clock`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Milliseconds in one UTC day.
pub const DAY_MILLIS: i64 = 86_400_000;

/// Nanoseconds per millisecond.
const NANOS_PER_MILLI: i128 = 1_000_000;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Errors raised while parsing timestamps.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimestampError {
    /// Input is not valid RFC 3339.
    #[error("invalid rfc3339 timestamp: {0}")]
    Parse(String),
    /// Input is outside the representable millisecond range.
    #[error("timestamp out of range: {0}")]
    OutOfRange(String),
}

/// Instant in time with millisecond precision.
///
/// # Invariants
/// - Ordering matches chronological ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Parses an RFC 3339 timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`TimestampError`] when the input is malformed or out of range.
    pub fn parse_rfc3339(value: &str) -> Result<Self, TimestampError> {
        let parsed = OffsetDateTime::parse(value, &Rfc3339)
            .map_err(|err| TimestampError::Parse(format!("{value}: {err}")))?;
        let millis = parsed.unix_timestamp_nanos() / NANOS_PER_MILLI;
        i64::try_from(millis)
            .map(Self)
            .map_err(|_| TimestampError::OutOfRange(value.to_string()))
    }

    /// Formats the timestamp as RFC 3339 in UTC.
    ///
    /// Falls back to the raw millisecond value when the instant cannot be
    /// represented by the calendar implementation.
    #[must_use]
    pub fn to_rfc3339(self) -> String {
        self.to_datetime()
            .and_then(|datetime| datetime.format(&Rfc3339).ok())
            .unwrap_or_else(|| self.0.to_string())
    }

    /// Returns the UTC calendar day as `YYYY-MM-DD`.
    #[must_use]
    pub fn utc_day(self) -> String {
        self.to_datetime().map_or_else(
            || format!("day-{}", self.0.div_euclid(DAY_MILLIS)),
            |datetime| {
                let date = datetime.date();
                format!("{:04}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day())
            },
        )
    }

    /// Returns this timestamp moved forward by `millis`, saturating.
    #[must_use]
    pub const fn saturating_add_millis(self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Returns this timestamp moved back by `days` whole days, saturating.
    #[must_use]
    pub const fn saturating_sub_days(self, days: u32) -> Self {
        Self(self.0.saturating_sub(DAY_MILLIS.saturating_mul(days as i64)))
    }

    /// Converts to an [`OffsetDateTime`] when representable.
    fn to_datetime(self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.0) * NANOS_PER_MILLI).ok()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

/// Accepted wire forms for timestamps.
#[derive(Deserialize)]
#[serde(untagged)]
enum TimestampRepr {
    /// RFC 3339 text.
    Text(String),
    /// Unix epoch milliseconds.
    Millis(i64),
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match TimestampRepr::deserialize(deserializer)? {
            TimestampRepr::Text(text) => {
                Self::parse_rfc3339(&text).map_err(serde::de::Error::custom)
            }
            TimestampRepr::Millis(millis) => Ok(Self(millis)),
        }
    }
}
