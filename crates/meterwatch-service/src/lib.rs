//! Polling service for electricity meter readings.
//!
//! This crate ties the billing API client and the local store together:
//! - Builds the meter registry from configuration and/or discovery
//! - Polls every meter once per interval with retry and backoff
//! - Detects out-of-order readings and stores the rest idempotently
//! - Reports a status summary after every cycle
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/meterwatch/config.toml`:
//!
//! ```toml
//! [api]
//! base_url = "https://api.example.com"
//! merchant_token = "..."
//!
//! [polling]
//! interval_seconds = 60
//! max_retries = 3
//! backoff_base_seconds = 1
//!
//! [storage]
//! path = "~/.local/share/meterwatch/readings.db"
//!
//! [[meters]]
//! id = "M1"
//! label = "Unit A"
//! ```
//!
//! # Exit codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Stopped by signal, or the requested cycles completed |
//! | 1 | The API rejected the credential |
//! | 2 | The store could not be opened or written |
//! | 3 | Invalid configuration or startup failure |

pub mod config;
pub mod cycle;
pub mod poller;
pub mod selection;
pub mod tracker;

pub use config::{Config, ConfigError, ValidationError};
pub use cycle::{ErrorTally, MeterOutcome, MeterReport, PollCycle, RunSummary, StopReason};
pub use poller::{PollSettings, Poller, PollerError, open_store};
pub use selection::{StartupError, build_registry};
pub use tracker::{MeterTracker, Observation};

/// Exit code for configuration and startup failures.
pub const EXIT_STARTUP_FAILURE: u8 = 3;
