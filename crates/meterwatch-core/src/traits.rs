//! Trait abstraction over the billing API.
//!
//! This module provides the [`MeterApi`] trait that abstracts over the
//! real HTTP client and the scripted mock used for testing.

use async_trait::async_trait;

use meterwatch_types::{Meter, Reading};

use crate::auth::AuthContext;
use crate::error::Result;

/// Operations the poller needs from the billing API.
///
/// Implementations must return [`FetchError::AuthRejected`](crate::FetchError::AuthRejected)
/// without doing any I/O when the context is already rejected.
///
/// # Example
///
/// ```ignore
/// use meterwatch_core::{AuthContext, MeterApi, Result};
/// use meterwatch_types::Meter;
///
/// async fn print_reading<A: MeterApi>(api: &A, meter: &Meter, auth: &AuthContext) -> Result<()> {
///     let reading = api.fetch_reading(meter, auth).await?;
///     println!("{}: {:?}", meter, reading.measurements);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait MeterApi: Send + Sync {
    /// Fetch the current reading for one meter.
    async fn fetch_reading(&self, meter: &Meter, auth: &AuthContext) -> Result<Reading>;

    /// List the meters visible to the credential.
    async fn list_meters(&self, auth: &AuthContext) -> Result<Vec<Meter>>;
}
