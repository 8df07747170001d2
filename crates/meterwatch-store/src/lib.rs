//! Local persistence for electricity meter readings.
//!
//! This crate provides SQLite-based storage for readings fetched from the
//! billing API, enabling later review and range queries.
//!
//! # Features
//!
//! - Idempotent appends keyed by meter and source timestamp
//! - Inclusive time-range queries in chronological order
//! - Query by meter, time range, with pagination
//! - Per-meter summaries and run-level metadata
//!
//! # Example
//!
//! ```no_run
//! use meterwatch_store::{Store, ReadingQuery};
//!
//! let store = Store::open_default()?;
//!
//! // Query recent readings
//! let query = ReadingQuery::new()
//!     .meter("M1")
//!     .limit(10);
//! let readings = store.query_readings(&query)?;
//! # Ok::<(), meterwatch_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{AppendOutcome, MeterSummary, StoredMeter, StoredReading};
pub use queries::ReadingQuery;
pub use schema::SCHEMA_VERSION;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/meterwatch/readings.db`
/// - macOS: `~/Library/Application Support/meterwatch/readings.db`
/// - Windows: `C:\Users\<user>\AppData\Local\meterwatch\readings.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("meterwatch")
        .join("readings.db")
}
