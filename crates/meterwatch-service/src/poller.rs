//! The polling loop.
//!
//! A [`Poller`] visits every registered meter once per tick, in registry
//! order. Each fetch goes through the retry policy; successful readings are
//! checked for ordering and handed to the store. Transient failures that
//! exhaust their retries and malformed responses skip the meter for the
//! current cycle only. A rejected credential or a failed write ends the run.
//!
//! The only suspension points are backoff delays and the wait for the next
//! tick. Both race against the poller's [`CancellationToken`], so a stop
//! request never interrupts a request in flight.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use meterwatch_core::{AuthContext, MeterApi, RetryConfig, RetryOutcome, with_retry};
use meterwatch_store::{AppendOutcome, Store};
use meterwatch_types::{FailureKind, MeterRegistry, Reading};

use crate::config::PollingConfig;
use crate::cycle::{MeterOutcome, MeterReport, PollCycle, RunSummary, StopReason};
use crate::tracker::{MeterTracker, Observation};

/// Metadata key written when a run begins.
pub const MONITORING_START_KEY: &str = "monitoring_start";
/// Metadata key written when a run ends.
pub const MONITORING_END_KEY: &str = "monitoring_end";

/// Buffered cycle reports per subscriber.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Errors that end a run.
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    /// The API refused the shared credential.
    #[error("Credential rejected by the API while polling meter {meter_id}")]
    AuthRejected { meter_id: String },

    /// A reading or run record could not be written.
    #[error("Storage failure{}: {source}", meter_context(.meter_id))]
    Storage {
        meter_id: Option<String>,
        #[source]
        source: meterwatch_store::Error,
    },
}

impl PollerError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PollerError::AuthRejected { .. } => FailureKind::AuthRejected,
            PollerError::Storage { .. } => FailureKind::StorageFailure,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            PollerError::AuthRejected { .. } => 1,
            PollerError::Storage { .. } => 2,
        }
    }
}

/// Open the database a run writes to. Failure is a storage fault of the run.
pub fn open_store(path: &Path) -> Result<Store, PollerError> {
    Store::open(path).map_err(|source| PollerError::Storage {
        meter_id: None,
        source,
    })
}

fn meter_context(meter_id: &Option<String>) -> String {
    match meter_id {
        Some(id) => format!(" for meter {}", id),
        None => String::new(),
    }
}

/// Cadence and retry policy of a poller.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    /// Time between the starts of consecutive cycles.
    pub interval: Duration,
    pub retry: RetryConfig,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from_config(&PollingConfig::default())
    }
}

impl PollSettings {
    pub fn new(interval: Duration, retry: RetryConfig) -> Self {
        Self { interval, retry }
    }

    pub fn from_config(config: &PollingConfig) -> Self {
        Self {
            interval: config.interval(),
            retry: config.retry_config(),
        }
    }
}

/// Polls every registered meter on a fixed cadence and persists readings.
pub struct Poller<A: MeterApi> {
    api: A,
    auth: Arc<AuthContext>,
    registry: MeterRegistry,
    store: Store,
    settings: PollSettings,
    tracker: MeterTracker,
    cancel: CancellationToken,
    events: broadcast::Sender<PollCycle>,
    cycles_started: u64,
}

impl<A: MeterApi> Poller<A> {
    /// Create a poller. The store is owned exclusively by the poller.
    pub fn new(
        api: A,
        auth: Arc<AuthContext>,
        registry: MeterRegistry,
        store: Store,
        settings: PollSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            api,
            auth,
            registry,
            store,
            settings,
            tracker: MeterTracker::new(),
            cancel: CancellationToken::new(),
            events,
            cycles_started: 0,
        }
    }

    /// Use an externally owned cancellation token.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops the poller at its next suspension point.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Receive a [`PollCycle`] after every cycle.
    pub fn subscribe(&self) -> broadcast::Receiver<PollCycle> {
        self.events.subscribe()
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    pub fn registry(&self) -> &MeterRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn tracker(&self) -> &MeterTracker {
        &self.tracker
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    /// Release the store.
    pub fn into_store(self) -> Store {
        self.store
    }

    /// Poll until stopped or a fatal error occurs.
    pub async fn run(&mut self) -> Result<RunSummary, PollerError> {
        self.run_until(None).await
    }

    /// Poll at most `cycles` times.
    pub async fn run_cycles(&mut self, cycles: u64) -> Result<RunSummary, PollerError> {
        self.run_until(Some(cycles)).await
    }

    async fn run_until(&mut self, limit: Option<u64>) -> Result<RunSummary, PollerError> {
        self.begin_run()?;

        let mut ticker = interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0u64;

        let result = loop {
            if limit.is_some_and(|n| cycles >= n) {
                break Ok(StopReason::Completed);
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Stop requested, shutting down poller");
                    break Ok(StopReason::Stopped);
                }
                _ = ticker.tick() => {}
            }

            cycles += 1;
            match self.run_cycle().await {
                Ok(cycle) if cycle.interrupted => {
                    info!("Stop requested during cycle {}, shutting down poller", cycle.number);
                    break Ok(StopReason::Stopped);
                }
                Ok(_) => {}
                Err(e) => break Err(e),
            }
        };

        let reason = match &result {
            Ok(reason) => reason.as_str(),
            Err(e) => e.kind().as_str(),
        };
        self.end_run(reason, cycles);

        result.map(|stop_reason| RunSummary {
            cycles,
            stop_reason,
        })
    }

    /// Register meters, seed the tracker and record the start of the run.
    fn begin_run(&mut self) -> Result<(), PollerError> {
        for meter in self.registry.iter() {
            self.store
                .upsert_meter(meter)
                .map_err(|source| PollerError::Storage {
                    meter_id: Some(meter.id.clone()),
                    source,
                })?;

            if self.tracker.last(&meter.id).is_none() {
                let latest = self
                    .store
                    .latest_reading(&meter.id)
                    .map_err(|source| PollerError::Storage {
                        meter_id: Some(meter.id.clone()),
                        source,
                    })?;
                if let Some(stored) = latest {
                    self.tracker.accept(stored.to_reading());
                }
            }
        }

        let record = json!({
            "timestamp": now_rfc3339(),
            "meters": self.registry.ids(),
            "interval_seconds": self.settings.interval.as_secs(),
        });
        self.store
            .set_metadata(MONITORING_START_KEY, &record)
            .map_err(|source| PollerError::Storage {
                meter_id: None,
                source,
            })?;

        info!(
            meters = self.registry.len(),
            interval = ?self.settings.interval,
            max_retries = self.settings.retry.max_retries,
            "Polling started"
        );
        Ok(())
    }

    fn end_run(&self, reason: &str, cycles: u64) {
        let record = json!({
            "timestamp": now_rfc3339(),
            "reason": reason,
            "cycles": cycles,
        });
        if let Err(e) = self.store.set_metadata(MONITORING_END_KEY, &record) {
            warn!("Failed to record end of run: {}", e);
        }
        info!(reason, cycles, "Polling stopped");
    }

    /// Perform exactly one pass over all meters.
    ///
    /// The cycle report is broadcast to subscribers even when the cycle
    /// ends in a fatal error.
    pub async fn run_cycle(&mut self) -> Result<PollCycle, PollerError> {
        self.cycles_started += 1;
        let number = self.cycles_started;
        let started_at = OffsetDateTime::now_utc();
        let clock = Instant::now();

        let meters: Vec<_> = self.registry.iter().cloned().collect();
        let mut reports = Vec::with_capacity(meters.len());
        let mut fatal = None;
        let mut interrupted = false;

        debug!(cycle = number, meters = meters.len(), "Starting poll cycle");

        for meter in &meters {
            if interrupted || self.cancel.is_cancelled() {
                interrupted = true;
                reports.push(MeterReport::new(&meter.id, 0, MeterOutcome::Interrupted));
                continue;
            }

            if self.auth.is_rejected() {
                debug!(meter = %meter.id, kind = %FailureKind::AuthRejected, "Skipping meter, credential rejected");
                reports.push(MeterReport::new(
                    &meter.id,
                    0,
                    MeterOutcome::Skipped {
                        kind: FailureKind::AuthRejected,
                        message: "credential rejected earlier in this run".to_string(),
                    },
                ));
                continue;
            }

            let api = &self.api;
            let auth = self.auth.as_ref();
            let outcome = with_retry(&self.settings.retry, &self.cancel, &meter.id, || {
                api.fetch_reading(meter, auth)
            })
            .await;

            match outcome {
                RetryOutcome::Succeeded { value, attempts } => match self.accept(value) {
                    Ok(result) => reports.push(MeterReport::new(&meter.id, attempts, result)),
                    Err(source) => {
                        error!(meter = %meter.id, kind = %FailureKind::StorageFailure, "Failed to store reading: {}", source);
                        reports.push(MeterReport::new(
                            &meter.id,
                            attempts,
                            MeterOutcome::Skipped {
                                kind: FailureKind::StorageFailure,
                                message: source.to_string(),
                            },
                        ));
                        fatal = Some(PollerError::Storage {
                            meter_id: Some(meter.id.clone()),
                            source,
                        });
                        break;
                    }
                },
                RetryOutcome::Failed { error, attempts } => {
                    let kind = error.kind();
                    if kind == FailureKind::AuthRejected {
                        self.auth.mark_rejected();
                        error!(meter = %meter.id, %kind, "Credential rejected, halting after this cycle: {}", error);
                        fatal.get_or_insert_with(|| PollerError::AuthRejected {
                            meter_id: meter.id.clone(),
                        });
                    } else {
                        warn!(meter = %meter.id, %kind, attempts, "Skipping meter this cycle: {}", error);
                    }
                    reports.push(MeterReport::new(
                        &meter.id,
                        attempts,
                        MeterOutcome::Skipped {
                            kind,
                            message: error.to_string(),
                        },
                    ));
                }
                RetryOutcome::Cancelled { attempts } => {
                    interrupted = true;
                    reports.push(MeterReport::new(&meter.id, attempts, MeterOutcome::Interrupted));
                }
            }
        }

        let cycle = PollCycle {
            number,
            started_at,
            elapsed: clock.elapsed(),
            meters: reports,
            interrupted,
        };
        info!("{}", cycle);

        // No subscribers is fine.
        let _ = self.events.send(cycle.clone());

        match fatal {
            Some(e) => Err(e),
            None => Ok(cycle),
        }
    }

    /// Order-check a fetched reading and persist it.
    fn accept(&mut self, reading: Reading) -> Result<MeterOutcome, meterwatch_store::Error> {
        let deltas = match self.tracker.check(&reading) {
            Observation::Anomaly { previous } => {
                warn!(
                    meter = %reading.meter_id,
                    timestamp = %reading.timestamp,
                    previous = %previous,
                    "Reading is older than the last accepted one, not storing"
                );
                return Ok(MeterOutcome::Anomaly {
                    timestamp: reading.timestamp,
                    previous,
                });
            }
            Observation::Advanced { deltas } => deltas,
            Observation::First => BTreeMap::new(),
        };

        let outcome = self.store.append(&reading)?;
        let timestamp = reading.timestamp;
        let deltas = match outcome {
            AppendOutcome::Inserted => {
                info!(meter = %reading.meter_id, timestamp = %reading.timestamp, "Stored reading");
                for (field, delta) in &deltas {
                    info!(meter = %reading.meter_id, field = %field, delta, "Measurement changed");
                }
                self.tracker.accept(reading);
                deltas
            }
            // The stored row wins; the tracker keeps what was persisted.
            AppendOutcome::DuplicateIgnored => {
                debug!(meter = %reading.meter_id, timestamp = %reading.timestamp, "Reading already stored");
                BTreeMap::new()
            }
        };

        Ok(MeterOutcome::Stored {
            outcome,
            timestamp,
            deltas,
        })
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
