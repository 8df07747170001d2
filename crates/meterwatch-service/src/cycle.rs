//! Per-cycle status reports.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};
use time::OffsetDateTime;

use meterwatch_store::AppendOutcome;
use meterwatch_types::FailureKind;

/// What happened to one meter during a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MeterOutcome {
    /// A reading was handed to the store.
    Stored {
        outcome: AppendOutcome,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
        /// Non-zero changes since the previous accepted reading.
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        deltas: BTreeMap<String, f64>,
    },
    /// The reading was older than the last accepted one and was dropped.
    Anomaly {
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
        #[serde(with = "time::serde::rfc3339")]
        previous: OffsetDateTime,
    },
    /// No reading this cycle.
    Skipped { kind: FailureKind, message: String },
    /// A stop was requested before this meter finished.
    Interrupted,
}

/// One meter's line in a [`PollCycle`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterReport {
    pub meter_id: String,
    /// Fetch attempts made, zero when the meter was never tried.
    pub attempts: u32,
    #[serde(flatten)]
    pub outcome: MeterOutcome,
}

impl MeterReport {
    pub fn new(meter_id: impl Into<String>, attempts: u32, outcome: MeterOutcome) -> Self {
        Self {
            meter_id: meter_id.into(),
            attempts,
            outcome,
        }
    }

    /// Attempts beyond the first.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Failure counts by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ErrorTally(BTreeMap<FailureKind, u32>);

impl ErrorTally {
    pub fn record(&mut self, kind: FailureKind) {
        *self.0.entry(kind).or_insert(0) += 1;
    }

    pub fn get(&self, kind: FailureKind) -> u32 {
        self.0.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ErrorTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(kind, count)| format!("{}={}", kind, count))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Status summary of one pass over all meters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollCycle {
    /// 1-based cycle number within the run.
    pub number: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    pub meters: Vec<MeterReport>,
    /// True when a stop request cut the cycle short.
    pub interrupted: bool,
}

impl PollCycle {
    pub fn attempted(&self) -> usize {
        self.meters.iter().filter(|m| m.attempts > 0).count()
    }

    /// Meters whose reading reached the store, duplicates included.
    pub fn succeeded(&self) -> usize {
        self.meters
            .iter()
            .filter(|m| matches!(m.outcome, MeterOutcome::Stored { .. }))
            .count()
    }

    /// Readings that created a new row.
    pub fn inserted(&self) -> usize {
        self.count_stored(AppendOutcome::Inserted)
    }

    pub fn duplicates(&self) -> usize {
        self.count_stored(AppendOutcome::DuplicateIgnored)
    }

    pub fn skipped(&self) -> usize {
        self.meters
            .iter()
            .filter(|m| matches!(m.outcome, MeterOutcome::Skipped { .. }))
            .count()
    }

    pub fn anomalies(&self) -> usize {
        self.meters
            .iter()
            .filter(|m| matches!(m.outcome, MeterOutcome::Anomaly { .. }))
            .count()
    }

    pub fn retries(&self) -> u32 {
        self.meters.iter().map(MeterReport::retries).sum()
    }

    /// Skips counted by failure kind.
    pub fn errors(&self) -> ErrorTally {
        let mut tally = ErrorTally::default();
        for report in &self.meters {
            if let MeterOutcome::Skipped { kind, .. } = report.outcome {
                tally.record(kind);
            }
        }
        tally
    }

    pub fn report(&self, meter_id: &str) -> Option<&MeterReport> {
        self.meters.iter().find(|m| m.meter_id == meter_id)
    }

    fn count_stored(&self, wanted: AppendOutcome) -> usize {
        self.meters
            .iter()
            .filter(|m| matches!(m.outcome, MeterOutcome::Stored { outcome, .. } if outcome == wanted))
            .count()
    }
}

impl fmt::Display for PollCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle {}: {}/{} stored ({} new, {} duplicate), {} skipped, {} anomalies, {} retries in {:.1}s",
            self.number,
            self.succeeded(),
            self.meters.len(),
            self.inserted(),
            self.duplicates(),
            self.skipped(),
            self.anomalies(),
            self.retries(),
            self.elapsed.as_secs_f64()
        )?;

        let errors = self.errors();
        if !errors.is_empty() {
            write!(f, " [{}]", errors)?;
        }
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}

/// Why a run ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A stop signal was received.
    Stopped,
    /// The requested number of cycles completed.
    Completed,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Stopped => "stopped",
            StopReason::Completed => "completed",
        }
    }
}

/// Result of a run that ended normally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Cycles started, including an interrupted final one.
    pub cycles: u64,
    pub stop_reason: StopReason,
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}
