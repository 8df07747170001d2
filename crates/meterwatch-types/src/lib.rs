//! Shared types for electricity meter readings.
//!
//! This crate holds the data model used by the API client
//! (meterwatch-core), the local store (meterwatch-store) and the poller
//! (meterwatch-service).
//!
//! # Features
//!
//! - Meter and reading types with API payload parsing
//! - The ordered meter registry polled each cycle
//! - Failure classification shared by every layer
//!
//! # Example
//!
//! ```
//! use meterwatch_types::{Meter, MeterRegistry};
//!
//! let registry = MeterRegistry::new(vec![Meter::new("M1", "Unit A")]).unwrap();
//! assert_eq!(registry.len(), 1);
//! ```

pub mod error;
pub mod registry;
pub mod types;

pub use error::{ParseError, ParseResult, RegistryError};
pub use registry::MeterRegistry;
pub use types::{
    normalize_timestamp, parse_timestamp, FailureKind, Meter, Reading, ReadingKey,
};
