//! Per-meter ordering and change tracking.
//!
//! The tracker remembers the last reading accepted for each meter during a
//! run. A new reading is either the first for its meter, in order (same or
//! later timestamp), or an anomaly (earlier than the last accepted one).

use std::collections::{BTreeMap, HashMap};

use time::OffsetDateTime;

use meterwatch_types::Reading;

/// How a fresh reading relates to the last accepted one for its meter.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// No reading has been accepted for this meter yet.
    First,
    /// Same or later timestamp. `deltas` holds the non-zero changes of
    /// fields present in both readings.
    Advanced { deltas: BTreeMap<String, f64> },
    /// Timestamp is earlier than the last accepted reading.
    Anomaly { previous: OffsetDateTime },
}

impl Observation {
    pub fn is_anomaly(&self) -> bool {
        matches!(self, Observation::Anomaly { .. })
    }
}

/// Last accepted reading per meter.
#[derive(Debug, Default)]
pub struct MeterTracker {
    last: HashMap<String, Reading>,
}

impl MeterTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `reading` against the last accepted reading for its meter.
    ///
    /// This does not record anything; call [`accept`](Self::accept) once
    /// the reading has been persisted.
    pub fn check(&self, reading: &Reading) -> Observation {
        let Some(previous) = self.last.get(&reading.meter_id) else {
            return Observation::First;
        };

        if reading.timestamp < previous.timestamp {
            return Observation::Anomaly {
                previous: previous.timestamp,
            };
        }

        let deltas = reading
            .measurements
            .iter()
            .filter_map(|(name, value)| {
                let before = previous.measurements.get(name)?;
                let delta = value - before;
                (delta != 0.0).then(|| (name.clone(), delta))
            })
            .collect();

        Observation::Advanced { deltas }
    }

    /// Record `reading` as the latest accepted one for its meter.
    pub fn accept(&mut self, reading: Reading) {
        self.last.insert(reading.meter_id.clone(), reading);
    }

    /// Last accepted reading for a meter.
    pub fn last(&self, meter_id: &str) -> Option<&Reading> {
        self.last.get(meter_id)
    }

    /// Forget a meter.
    pub fn remove(&mut self, meter_id: &str) -> Option<Reading> {
        self.last.remove(meter_id)
    }

    /// Number of meters with an accepted reading.
    pub fn tracked_meters(&self) -> usize {
        self.last.len()
    }
}
