//! Data models for stored data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use meterwatch_types::{Meter, Reading};

/// Result of appending a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppendOutcome {
    /// A new row was written.
    Inserted,
    /// A reading with the same meter and timestamp already existed.
    DuplicateIgnored,
}

/// A meter stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMeter {
    /// Meter identifier.
    pub id: String,
    /// Human-readable label, if one was ever recorded.
    pub label: Option<String>,
    /// First time this meter was seen.
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen: OffsetDateTime,
    /// Last time this meter was seen.
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
}

impl StoredMeter {
    /// Convert to a [`Meter`], using the id as label when none is stored.
    pub fn to_meter(&self) -> Meter {
        Meter::new(
            self.id.clone(),
            self.label.clone().unwrap_or_else(|| self.id.clone()),
        )
    }
}

/// A reading stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    /// Database row ID.
    pub id: i64,
    /// Meter identifier.
    pub meter_id: String,
    /// Source-reported timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// When this row was written.
    #[serde(with = "time::serde::rfc3339")]
    pub stored_at: OffsetDateTime,
    /// Numeric measurement fields.
    pub measurements: BTreeMap<String, f64>,
    /// The payload as received from the API.
    pub raw: Value,
}

impl StoredReading {
    /// Convert back to a [`Reading`].
    pub fn to_reading(&self) -> Reading {
        Reading {
            meter_id: self.meter_id.clone(),
            timestamp: self.timestamp,
            measurements: self.measurements.clone(),
            raw: self.raw.clone(),
        }
    }

    pub fn measurement(&self, name: &str) -> Option<f64> {
        self.measurements.get(name).copied()
    }
}

/// Aggregate view of one meter's stored readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterSummary {
    pub meter_id: String,
    pub label: Option<String>,
    /// Number of stored readings.
    pub reading_count: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub first_timestamp: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_timestamp: OffsetDateTime,
    /// Measurements of the most recent reading.
    pub latest_measurements: BTreeMap<String, f64>,
}
