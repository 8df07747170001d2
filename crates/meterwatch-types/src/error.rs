//! Error types for reading payloads and meter registries.

use thiserror::Error;

/// Errors that can occur when turning an API payload into a [`Reading`](crate::Reading).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The payload was not a JSON object.
    #[error("Expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// A required field was absent.
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    /// The timestamp could not be interpreted.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// The payload carried no numeric measurement fields.
    #[error("Payload has no numeric measurement fields")]
    NoMeasurements,
}

/// Result type alias using meterwatch-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Errors raised when building a [`MeterRegistry`](crate::MeterRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// No meters were selected.
    #[error("Meter registry cannot be empty")]
    Empty,

    /// The same meter identifier appeared twice.
    #[error("Duplicate meter identifier '{0}'")]
    DuplicateMeter(String),

    /// A meter with an empty identifier was supplied.
    #[error("Meter identifier cannot be empty")]
    EmptyIdentifier,

    /// A selection referred to a meter that is not registered.
    #[error("Unknown meter '{0}'")]
    UnknownMeter(String),
}
