//! Building the meter registry before polling starts.

use tracing::{info, warn};

use meterwatch_core::{AuthContext, FetchError, MeterApi};
use meterwatch_types::{FailureKind, Meter, MeterRegistry, RegistryError};

/// Errors that prevent polling from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Meter discovery failed: {0}")]
    Discovery(#[source] FetchError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl StartupError {
    /// Process exit code. A rejected credential is reported the same way
    /// as during polling.
    pub fn exit_code(&self) -> u8 {
        match self {
            StartupError::Discovery(e) if e.kind() == FailureKind::AuthRejected => 1,
            _ => 3,
        }
    }
}

/// Resolve the meters to poll.
///
/// Configured meters are used as-is unless `discover` is set or none are
/// configured, in which case the API's meter list is fetched and merged
/// (configured labels win). `selection` then narrows the result; an empty
/// selection keeps every meter.
pub async fn build_registry<A: MeterApi>(
    api: &A,
    auth: &AuthContext,
    configured: Vec<Meter>,
    discover: bool,
    selection: &[String],
) -> Result<MeterRegistry, StartupError> {
    let mut meters = configured;

    if discover || meters.is_empty() {
        let discovered = api.list_meters(auth).await.map_err(|e| {
            if e.kind() == FailureKind::AuthRejected {
                auth.mark_rejected();
            }
            StartupError::Discovery(e)
        })?;
        info!("Discovered {} meter(s)", discovered.len());

        for meter in discovered {
            if !meters.iter().any(|m| m.id == meter.id) {
                meters.push(meter);
            }
        }
    }

    if meters.is_empty() {
        warn!("No meters configured or discovered");
    }

    let registry = MeterRegistry::new(meters)?;
    Ok(registry.select(selection)?)
}
