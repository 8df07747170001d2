//! Core types for electricity meter data.

use core::fmt;
use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::error::{ParseError, ParseResult};

/// Name of the payload field carrying the source-reported timestamp.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Name of the envelope field some endpoints wrap their payload in.
pub const ENVELOPE_FIELD: &str = "data";

/// A single electricity metering point.
///
/// Meters are immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Meter {
    /// Identifier used by the billing API.
    pub id: String,
    /// Human-readable label for display.
    pub label: String,
}

impl Meter {
    /// Create a new meter.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }

    /// The label, falling back to the identifier when the label is blank.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.label.trim().is_empty() {
            &self.id
        } else {
            &self.label
        }
    }
}

impl fmt::Display for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.display_name() == self.id {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{} ({})", self.display_name(), self.id)
        }
    }
}

/// Identity of a reading: at most one reading is stored per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReadingKey {
    /// Meter the reading belongs to.
    pub meter_id: String,
    /// Source-reported timestamp (UTC, millisecond precision).
    pub timestamp: OffsetDateTime,
}

/// One timestamped measurement record for a meter.
///
/// Timestamps are normalized to UTC and truncated to millisecond precision
/// so that the identity key survives a round trip through storage.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// Meter identifier.
    pub meter_id: String,
    /// Source-reported timestamp.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
    /// Numeric measurement fields keyed by their API name
    /// (for example `kwh`, `current_reading`, `balance_unit`).
    pub measurements: BTreeMap<String, f64>,
    /// The payload exactly as the API returned it.
    pub raw: Value,
}

impl Reading {
    /// Build a reading from a decoded API response body.
    ///
    /// If the body carries an object under `"data"`, that object is the
    /// payload; otherwise the body itself is.
    ///
    /// # Examples
    ///
    /// ```
    /// use meterwatch_types::Reading;
    ///
    /// let body = serde_json::json!({
    ///     "data": { "timestamp": "2024-01-01T00:00:00Z", "kwh": 123.4 }
    /// });
    /// let reading = Reading::from_response("M1", &body).unwrap();
    /// assert_eq!(reading.measurement("kwh"), Some(123.4));
    /// ```
    #[must_use = "parsing returns a Result that should be handled"]
    pub fn from_response(meter_id: &str, body: &Value) -> ParseResult<Self> {
        let payload = match body.get(ENVELOPE_FIELD) {
            Some(inner @ Value::Object(_)) => inner,
            _ => body,
        };
        Self::from_payload(meter_id, payload)
    }

    /// Build a reading from an unwrapped payload object.
    ///
    /// The payload must contain a `timestamp` (RFC 3339 string or integer
    /// Unix seconds) and at least one numeric field. Every numeric
    /// top-level field other than `timestamp` becomes a measurement.
    #[must_use = "parsing returns a Result that should be handled"]
    pub fn from_payload(meter_id: &str, payload: &Value) -> ParseResult<Self> {
        let object = payload
            .as_object()
            .ok_or_else(|| ParseError::NotAnObject(json_kind(payload)))?;

        let timestamp = object
            .get(TIMESTAMP_FIELD)
            .ok_or(ParseError::MissingField(TIMESTAMP_FIELD))
            .and_then(parse_timestamp)?;

        let measurements: BTreeMap<String, f64> = object
            .iter()
            .filter(|(name, _)| name.as_str() != TIMESTAMP_FIELD)
            .filter_map(|(name, value)| match value {
                Value::Number(n) => n.as_f64().map(|v| (name.clone(), v)),
                _ => None,
            })
            .collect();

        if measurements.is_empty() {
            return Err(ParseError::NoMeasurements);
        }

        Ok(Self {
            meter_id: meter_id.to_string(),
            timestamp,
            measurements,
            raw: payload.clone(),
        })
    }

    /// Identity key of this reading.
    #[must_use]
    pub fn key(&self) -> ReadingKey {
        ReadingKey {
            meter_id: self.meter_id.clone(),
            timestamp: self.timestamp,
        }
    }

    /// Look up a single measurement by field name.
    #[must_use]
    pub fn measurement(&self, name: &str) -> Option<f64> {
        self.measurements.get(name).copied()
    }
}

/// Parse a timestamp value into a normalized UTC instant.
///
/// Accepts RFC 3339 strings (any offset) and integer Unix seconds.
pub fn parse_timestamp(value: &Value) -> ParseResult<OffsetDateTime> {
    let parsed = match value {
        Value::String(s) => OffsetDateTime::parse(s, &Rfc3339)
            .map_err(|e| ParseError::InvalidTimestamp(format!("'{}': {}", s, e)))?,
        Value::Number(n) => {
            let secs = n
                .as_i64()
                .ok_or_else(|| ParseError::InvalidTimestamp(format!("'{}' is not an integer", n)))?;
            OffsetDateTime::from_unix_timestamp(secs)
                .map_err(|e| ParseError::InvalidTimestamp(format!("{}: {}", secs, e)))?
        }
        other => {
            return Err(ParseError::InvalidTimestamp(format!(
                "expected string or integer, got {}",
                json_kind(other)
            )));
        }
    };

    normalize_timestamp(parsed)
}

/// Convert to UTC and truncate to millisecond precision.
pub fn normalize_timestamp(ts: OffsetDateTime) -> ParseResult<OffsetDateTime> {
    let utc = ts.to_offset(UtcOffset::UTC);
    let millis = utc.nanosecond() / 1_000_000;
    utc.replace_nanosecond(millis * 1_000_000)
        .map_err(|e| ParseError::InvalidTimestamp(e.to_string()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Classification of a failed attempt to obtain or persist a reading.
///
/// Every failure observed by the poller maps to exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FailureKind {
    /// The API refused the credential (HTTP 401/403).
    AuthRejected,
    /// Connection, timeout, or transport failure.
    NetworkFailure,
    /// The API asked the client to slow down.
    RateLimited,
    /// The response did not have the expected shape.
    MalformedResponse,
    /// The local store could not be written.
    StorageFailure,
}

impl FailureKind {
    /// Transient failures are retried with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, FailureKind::NetworkFailure | FailureKind::RateLimited)
    }

    /// Fatal failures terminate the run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, FailureKind::AuthRejected | FailureKind::StorageFailure)
    }

    /// Stable snake_case name used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::AuthRejected => "auth_rejected",
            FailureKind::NetworkFailure => "network_failure",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::MalformedResponse => "malformed_response",
            FailureKind::StorageFailure => "storage_failure",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
