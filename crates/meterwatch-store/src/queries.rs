//! Query builder for stored readings.
//!
//! This module provides a fluent query builder for filtering and paginating
//! stored meter readings.
//!
//! # Example
//!
//! ```
//! use meterwatch_store::{Store, ReadingQuery};
//! use time::{OffsetDateTime, Duration};
//!
//! let store = Store::open_in_memory()?;
//! let yesterday = OffsetDateTime::now_utc() - Duration::hours(24);
//!
//! // Query recent readings with pagination
//! let query = ReadingQuery::new()
//!     .meter("M1")
//!     .since(yesterday)
//!     .limit(50)
//!     .offset(0);
//!
//! let readings = store.query_readings(&query)?;
//! # Ok::<(), meterwatch_store::Error>(())
//! ```

use time::OffsetDateTime;

/// Columns selected for [`StoredReading`](crate::StoredReading) rows, in order.
pub(crate) const READING_COLUMNS: &str =
    "id, meter_id, timestamp_ms, stored_at, measurements, raw";

/// Fluent query builder for stored readings.
///
/// Use this to construct queries for [`Store::query_readings`](crate::Store::query_readings).
/// All filter methods are optional and can be chained in any order.
///
/// By default, queries return results ordered by timestamp descending
/// (newest first). Time bounds are inclusive.
///
/// # Example
///
/// ```
/// use meterwatch_store::ReadingQuery;
/// use time::{OffsetDateTime, Duration};
///
/// let now = OffsetDateTime::now_utc();
///
/// // Last day's readings for a meter
/// let query = ReadingQuery::new()
///     .meter("M1")
///     .since(now - Duration::days(1))
///     .limit(100);
///
/// // Chronological order
/// let chronological = ReadingQuery::new()
///     .meter("M1")
///     .oldest_first();
/// ```
#[derive(Debug, Default, Clone)]
pub struct ReadingQuery {
    /// Filter by meter ID.
    pub meter_id: Option<String>,
    /// Filter readings at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Filter readings at or before this time.
    pub until: Option<OffsetDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by timestamp descending (newest first).
    pub newest_first: bool,
}

impl ReadingQuery {
    /// Create a new query with default settings.
    ///
    /// Default behavior:
    /// - No meter filter (all meters)
    /// - No time range filter
    /// - No limit (all matching records)
    /// - Ordered by newest first
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Only include readings from the specified meter.
    pub fn meter(mut self, meter_id: &str) -> Self {
        self.meter_id = Some(meter_id.to_string());
        self
    }

    /// Filter to readings taken at or after this time.
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    /// Filter to readings taken at or before this time.
    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    /// Limit the maximum number of results returned.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    ///
    /// For example, to get page 2 with 50 items per page:
    /// `.limit(50).offset(50)`.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order results by oldest first (ascending by timestamp).
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref meter_id) = self.meter_id {
            conditions.push("meter_id = ?");
            params.push(Box::new(meter_id.clone()));
        }

        if let Some(since) = self.since {
            conditions.push("timestamp_ms >= ?");
            params.push(Box::new(to_millis(since)));
        }

        if let Some(until) = self.until {
            conditions.push("timestamp_ms <= ?");
            params.push(Box::new(to_millis(until)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Build the full SQL query.
    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT {} FROM readings {} ORDER BY timestamp_ms {}",
            READING_COLUMNS, where_clause, order
        );

        match (self.limit, self.offset) {
            (Some(limit), _) => sql.push_str(&format!(" LIMIT {}", limit)),
            // SQLite requires a LIMIT before OFFSET; -1 means unbounded.
            (None, Some(_)) => sql.push_str(" LIMIT -1"),
            (None, None) => {}
        }

        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        sql
    }
}

/// Unix milliseconds for a timestamp, the storage resolution.
pub(crate) fn to_millis(time: OffsetDateTime) -> i64 {
    (time.unix_timestamp_nanos() / 1_000_000) as i64
}
