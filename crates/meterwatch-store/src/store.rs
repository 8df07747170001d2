//! Main store implementation.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info};

use meterwatch_types::{Meter, Reading};

use crate::error::{Error, Result};
use crate::models::{AppendOutcome, MeterSummary, StoredMeter, StoredReading};
use crate::queries::{to_millis, ReadingQuery, READING_COLUMNS};
use crate::schema;

/// SQLite-based store for meter readings.
///
/// Readings are keyed by `(meter_id, timestamp)` at millisecond resolution.
/// Appending the same key twice is a no-op.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }
}

// Meter operations
impl Store {
    /// Record a meter, updating its label and last-seen time if it exists.
    pub fn upsert_meter(&self, meter: &Meter) -> Result<StoredMeter> {
        let label = if meter.label.trim().is_empty() {
            None
        } else {
            Some(meter.label.as_str())
        };

        self.conn.execute(
            "INSERT INTO meters (id, label, first_seen, last_seen) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(id) DO UPDATE SET
                label = COALESCE(?2, label),
                last_seen = ?3",
            rusqlite::params![meter.id, label, now_unix()],
        )?;

        self.get_meter(&meter.id)?
            .ok_or_else(|| Error::MeterNotFound(meter.id.clone()))
    }

    /// Get a meter by ID.
    pub fn get_meter(&self, meter_id: &str) -> Result<Option<StoredMeter>> {
        let meter = self
            .conn
            .query_row(
                "SELECT id, label, first_seen, last_seen FROM meters WHERE id = ?",
                [meter_id],
                row_to_meter,
            )
            .optional()?;

        Ok(meter)
    }

    /// List all meters, most recently seen first.
    pub fn list_meters(&self) -> Result<Vec<StoredMeter>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, label, first_seen, last_seen FROM meters ORDER BY last_seen DESC, id")?;

        let meters = stmt
            .query_map([], row_to_meter)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(meters)
    }
}

// Reading operations
impl Store {
    /// Persist a reading.
    ///
    /// Returns [`AppendOutcome::DuplicateIgnored`] when a reading with the
    /// same meter and timestamp is already stored; the stored row is left
    /// untouched. Unknown meters are registered on the fly.
    pub fn append(&self, reading: &Reading) -> Result<AppendOutcome> {
        let measurements = serde_json::to_string(&reading.measurements)?;
        let raw = serde_json::to_string(&reading.raw)?;
        let now = now_unix();

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO meters (id, label, first_seen, last_seen) VALUES (?1, NULL, ?2, ?2)
             ON CONFLICT(id) DO UPDATE SET last_seen = ?2",
            rusqlite::params![reading.meter_id, now],
        )?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO readings (meter_id, timestamp_ms, stored_at, measurements, raw)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                reading.meter_id,
                to_millis(reading.timestamp),
                now,
                measurements,
                raw
            ],
        )?;
        tx.commit()?;

        let outcome = if inserted > 0 {
            AppendOutcome::Inserted
        } else {
            AppendOutcome::DuplicateIgnored
        };
        debug!(meter = %reading.meter_id, timestamp = %reading.timestamp, ?outcome, "Appended reading");
        Ok(outcome)
    }

    /// Readings for a meter with `from <= timestamp <= to`, oldest first.
    pub fn query_range(
        &self,
        meter_id: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<StoredReading>> {
        let query = ReadingQuery::new()
            .meter(meter_id)
            .since(from)
            .until(to)
            .oldest_first();
        self.query_readings(&query)
    }

    /// Query readings with filters.
    pub fn query_readings(&self, query: &ReadingQuery) -> Result<Vec<StoredReading>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let readings = stmt
            .query_map(params_ref.as_slice(), row_to_reading)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(readings)
    }

    /// Get the latest reading for a meter.
    pub fn latest_reading(&self, meter_id: &str) -> Result<Option<StoredReading>> {
        let query = ReadingQuery::new().meter(meter_id).limit(1);
        let mut readings = self.query_readings(&query)?;
        Ok(readings.pop())
    }

    /// Count readings, optionally for one meter.
    pub fn count_readings(&self, meter_id: Option<&str>) -> Result<u64> {
        let count: i64 = match meter_id {
            Some(id) => self.conn.query_row(
                "SELECT COUNT(*) FROM readings WHERE meter_id = ?",
                [id],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?,
        };

        Ok(count as u64)
    }

    /// Summarize a meter's stored readings. `None` if it has none.
    pub fn meter_summary(&self, meter_id: &str) -> Result<Option<MeterSummary>> {
        let (count, first_ms, last_ms): (i64, Option<i64>, Option<i64>) = self.conn.query_row(
            "SELECT COUNT(*), MIN(timestamp_ms), MAX(timestamp_ms) FROM readings WHERE meter_id = ?",
            [meter_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let (Some(first_ms), Some(last_ms)) = (first_ms, last_ms) else {
            return Ok(None);
        };

        let latest_measurements = self
            .latest_reading(meter_id)?
            .map(|r| r.measurements)
            .unwrap_or_default();
        let label = self.get_meter(meter_id)?.and_then(|m| m.label);

        Ok(Some(MeterSummary {
            meter_id: meter_id.to_string(),
            label,
            reading_count: count as u64,
            first_timestamp: from_millis(first_ms)?,
            last_timestamp: from_millis(last_ms)?,
            latest_measurements,
        }))
    }
}

// Run metadata
impl Store {
    /// Store a JSON value under `key`, replacing any previous value.
    pub fn set_metadata(&self, key: &str, value: &Value) -> Result<()> {
        let encoded = serde_json::to_string(value)?;
        self.conn.execute(
            "INSERT INTO system_metadata (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            rusqlite::params![key, encoded, now_unix()],
        )?;
        Ok(())
    }

    /// Read the value stored under `key`.
    pub fn get_metadata(&self, key: &str) -> Result<Option<Value>> {
        let encoded: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM system_metadata WHERE key = ?",
                [key],
                |row| row.get(0),
            )
            .optional()?;

        match encoded {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn from_millis(ms: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .map_err(|e| Error::InvalidTimestamp(format!("{} ms: {}", ms, e)))
}

fn column_time(row: &Row<'_>, idx: usize, scale_nanos: i128) -> rusqlite::Result<OffsetDateTime> {
    let value: i64 = row.get(idx)?;
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(value) * scale_nanos)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn column_json<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

const SECONDS: i128 = 1_000_000_000;
const MILLISECONDS: i128 = 1_000_000;

fn row_to_meter(row: &Row<'_>) -> rusqlite::Result<StoredMeter> {
    Ok(StoredMeter {
        id: row.get(0)?,
        label: row.get(1)?,
        first_seen: column_time(row, 2, SECONDS)?,
        last_seen: column_time(row, 3, SECONDS)?,
    })
}

fn row_to_reading(row: &Row<'_>) -> rusqlite::Result<StoredReading> {
    let measurements: BTreeMap<String, f64> = column_json(row, 4)?;
    Ok(StoredReading {
        id: row.get(0)?,
        meter_id: row.get(1)?,
        timestamp: column_time(row, 2, MILLISECONDS)?,
        stored_at: column_time(row, 3, SECONDS)?,
        measurements,
        raw: column_json(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn reading(meter_id: &str, timestamp: OffsetDateTime, kwh: f64) -> Reading {
        let payload = json!({
            "timestamp": timestamp.unix_timestamp(),
            "kwh": kwh,
        });
        let mut reading = Reading::from_payload(meter_id, &payload).unwrap();
        reading.timestamp = timestamp;
        reading
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.count_readings(None).unwrap(), 0);
    }

    #[test]
    fn test_upsert_meter() {
        let store = Store::open_in_memory().unwrap();

        let meter = store.upsert_meter(&Meter::new("M1", "Unit A")).unwrap();
        assert_eq!(meter.id, "M1");
        assert_eq!(meter.label, Some("Unit A".to_string()));

        // A blank label does not erase the stored one.
        let meter = store.upsert_meter(&Meter::new("M1", "")).unwrap();
        assert_eq!(meter.label, Some("Unit A".to_string()));

        let meter = store.upsert_meter(&Meter::new("M1", "Unit A2")).unwrap();
        assert_eq!(meter.label, Some("Unit A2".to_string()));
        assert_eq!(store.list_meters().unwrap().len(), 1);
    }

    #[test]
    fn test_append_scenario_single_row() {
        let store = Store::open_in_memory().unwrap();
        let body = json!({ "timestamp": "2024-01-01T00:00:00Z", "kwh": 123.4 });
        let reading = Reading::from_payload("M1", &body).unwrap();

        assert_eq!(store.append(&reading).unwrap(), AppendOutcome::Inserted);

        let rows = store
            .query_range(
                "M1",
                datetime!(2024-01-01 00:00:00 UTC),
                datetime!(2024-01-01 00:00:00 UTC),
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].measurement("kwh"), Some(123.4));
        assert_eq!(rows[0].raw, body);
        assert_eq!(rows[0].to_reading(), reading);
    }

    #[test]
    fn test_append_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let ts = datetime!(2024-01-01 00:00:00 UTC);

        assert_eq!(
            store.append(&reading("M1", ts, 1.0)).unwrap(),
            AppendOutcome::Inserted
        );
        assert_eq!(
            store.append(&reading("M1", ts, 1.0)).unwrap(),
            AppendOutcome::DuplicateIgnored
        );
        // Same key with different values still keeps the first row.
        assert_eq!(
            store.append(&reading("M1", ts, 99.0)).unwrap(),
            AppendOutcome::DuplicateIgnored
        );

        assert_eq!(store.count_readings(Some("M1")).unwrap(), 1);
        let latest = store.latest_reading("M1").unwrap().unwrap();
        assert_eq!(latest.measurement("kwh"), Some(1.0));
    }

    #[test]
    fn test_same_timestamp_different_meters() {
        let store = Store::open_in_memory().unwrap();
        let ts = datetime!(2024-01-01 00:00:00 UTC);

        store.append(&reading("M1", ts, 1.0)).unwrap();
        store.append(&reading("M2", ts, 2.0)).unwrap();

        assert_eq!(store.count_readings(None).unwrap(), 2);
        assert_eq!(store.count_readings(Some("M2")).unwrap(), 1);
    }

    #[test]
    fn test_millisecond_precision_is_part_of_identity() {
        let store = Store::open_in_memory().unwrap();

        store
            .append(&reading("M1", datetime!(2024-01-01 00:00:00.001 UTC), 1.0))
            .unwrap();
        store
            .append(&reading("M1", datetime!(2024-01-01 00:00:00.002 UTC), 2.0))
            .unwrap();

        let rows = store.query_readings(&ReadingQuery::new().oldest_first()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, datetime!(2024-01-01 00:00:00.001 UTC));
    }

    #[test]
    fn test_query_range_ordered_and_inclusive() {
        let store = Store::open_in_memory().unwrap();

        // Appended out of order on purpose.
        for (ts, kwh) in [
            (datetime!(2024-01-01 03:00:00 UTC), 3.0),
            (datetime!(2024-01-01 01:00:00 UTC), 1.0),
            (datetime!(2024-01-01 04:00:00 UTC), 4.0),
            (datetime!(2024-01-01 02:00:00 UTC), 2.0),
        ] {
            store.append(&reading("M1", ts, kwh)).unwrap();
        }
        store
            .append(&reading("M2", datetime!(2024-01-01 02:30:00 UTC), 9.0))
            .unwrap();

        let rows = store
            .query_range(
                "M1",
                datetime!(2024-01-01 01:00:00 UTC),
                datetime!(2024-01-01 03:00:00 UTC),
            )
            .unwrap();

        let values: Vec<f64> = rows.iter().filter_map(|r| r.measurement("kwh")).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
        assert!(rows.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_query_range_empty() {
        let store = Store::open_in_memory().unwrap();
        let rows = store
            .query_range(
                "M1",
                datetime!(2024-01-01 00:00:00 UTC),
                datetime!(2024-01-02 00:00:00 UTC),
            )
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_query_readings_pagination() {
        let store = Store::open_in_memory().unwrap();
        for hour in 0..5u8 {
            let ts = datetime!(2024-01-01 00:00:00 UTC) + time::Duration::hours(hour.into());
            store.append(&reading("M1", ts, f64::from(hour))).unwrap();
        }

        let page = store
            .query_readings(&ReadingQuery::new().meter("M1").limit(2).offset(1))
            .unwrap();
        let values: Vec<f64> = page.iter().filter_map(|r| r.measurement("kwh")).collect();
        assert_eq!(values, vec![3.0, 2.0]);
    }

    #[test]
    fn test_latest_reading() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.latest_reading("M1").unwrap().is_none());

        store
            .append(&reading("M1", datetime!(2024-01-02 00:00:00 UTC), 2.0))
            .unwrap();
        store
            .append(&reading("M1", datetime!(2024-01-01 00:00:00 UTC), 1.0))
            .unwrap();

        let latest = store.latest_reading("M1").unwrap().unwrap();
        assert_eq!(latest.timestamp, datetime!(2024-01-02 00:00:00 UTC));
    }

    #[test]
    fn test_append_registers_unknown_meter() {
        let store = Store::open_in_memory().unwrap();
        store
            .append(&reading("M7", datetime!(2024-01-01 00:00:00 UTC), 1.0))
            .unwrap();

        let meter = store.get_meter("M7").unwrap().unwrap();
        assert_eq!(meter.label, None);
        assert_eq!(meter.to_meter(), Meter::new("M7", "M7"));
    }

    #[test]
    fn test_meter_summary() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.meter_summary("M1").unwrap().is_none());

        store.upsert_meter(&Meter::new("M1", "Unit A")).unwrap();
        assert!(store.meter_summary("M1").unwrap().is_none());

        store
            .append(&reading("M1", datetime!(2024-01-01 00:00:00 UTC), 10.0))
            .unwrap();
        store
            .append(&reading("M1", datetime!(2024-01-03 00:00:00 UTC), 30.0))
            .unwrap();
        store
            .append(&reading("M1", datetime!(2024-01-02 00:00:00 UTC), 20.0))
            .unwrap();

        let summary = store.meter_summary("M1").unwrap().unwrap();
        assert_eq!(summary.reading_count, 3);
        assert_eq!(summary.label, Some("Unit A".to_string()));
        assert_eq!(summary.first_timestamp, datetime!(2024-01-01 00:00:00 UTC));
        assert_eq!(summary.last_timestamp, datetime!(2024-01-03 00:00:00 UTC));
        assert_eq!(summary.latest_measurements.get("kwh"), Some(&30.0));
    }

    #[test]
    fn test_metadata_roundtrip_and_overwrite() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_metadata("monitoring_start").unwrap().is_none());

        store
            .set_metadata("monitoring_start", &json!({ "meters": ["M1"] }))
            .unwrap();
        store
            .set_metadata("monitoring_start", &json!({ "meters": ["M1", "M2"] }))
            .unwrap();

        let value = store.get_metadata("monitoring_start").unwrap().unwrap();
        assert_eq!(value["meters"], json!(["M1", "M2"]));
    }

    #[test]
    fn test_open_on_disk_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("readings.db");

        {
            let store = Store::open(&path).unwrap();
            store
                .append(&reading("M1", datetime!(2024-01-01 00:00:00 UTC), 1.0))
                .unwrap();
        }

        let store = Store::open(&path).unwrap();
        assert_eq!(store.count_readings(Some("M1")).unwrap(), 1);
        assert_eq!(
            store
                .append(&reading("M1", datetime!(2024-01-01 00:00:00 UTC), 1.0))
                .unwrap(),
            AppendOutcome::DuplicateIgnored
        );
    }
}
