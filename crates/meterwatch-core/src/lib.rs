//! Billing API access for electricity meter polling.
//!
//! This crate provides the authenticated fetch path used by the poller:
//! the shared credential, the HTTP client with failure classification,
//! and the retry policy for transient failures.
//!
//! # Features
//!
//! - **Credential handling**: Opaque token with a sticky "rejected" flag
//! - **Reading fetch**: One request per call, classified into a `FailureKind`
//! - **Meter discovery**: List meters visible to the credential
//! - **Backoff**: Exponential, capped, honoring `Retry-After`, cancellable
//! - **Testing**: A scripted [`MockApi`] behind the same [`MeterApi`] trait
//!
//! # Quick Start
//!
//! ```no_run
//! use meterwatch_core::{ApiClient, ApiSettings, AuthContext};
//! use meterwatch_types::Meter;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ApiClient::new(ApiSettings::new("https://api.example.com"))?;
//!     let auth = AuthContext::new("merchant-token");
//!
//!     for meter in client.list_meters(&auth).await? {
//!         let reading = client.fetch_reading(&meter, &auth).await?;
//!         println!("{}: {:?}", meter, reading.measurements);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod mock;
pub mod retry;
pub mod traits;

pub use auth::AuthContext;
pub use client::{ApiClient, ApiSettings};
pub use error::{ClientError, FetchError, Result};
pub use mock::{MockApi, MockCall, MockResponse};
pub use retry::{with_retry, RetryConfig, RetryOutcome};
pub use traits::MeterApi;

// Re-export from meterwatch-types
pub use meterwatch_types::{FailureKind, Meter, MeterRegistry, Reading, ReadingKey};
