//! The ordered set of meters polled during a run.

use std::collections::HashSet;

use crate::error::RegistryError;
use crate::types::Meter;

/// A finite, non-empty, duplicate-free ordered list of meters.
///
/// Iteration order is the order in which meters are polled each cycle.
/// The registry is fixed once built; the poller never mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeterRegistry {
    meters: Vec<Meter>,
}

impl MeterRegistry {
    /// Build a registry, rejecting empty lists, blank identifiers and duplicates.
    pub fn new(meters: Vec<Meter>) -> Result<Self, RegistryError> {
        if meters.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut seen = HashSet::with_capacity(meters.len());
        for meter in &meters {
            if meter.id.trim().is_empty() {
                return Err(RegistryError::EmptyIdentifier);
            }
            if !seen.insert(meter.id.as_str()) {
                return Err(RegistryError::DuplicateMeter(meter.id.clone()));
            }
        }

        Ok(Self { meters })
    }

    /// Narrow the registry to the given identifiers, in the order given.
    ///
    /// An empty selection keeps every meter.
    pub fn select(&self, ids: &[String]) -> Result<Self, RegistryError> {
        if ids.is_empty() {
            return Ok(self.clone());
        }

        let selected = ids
            .iter()
            .map(|id| {
                self.get(id)
                    .cloned()
                    .ok_or_else(|| RegistryError::UnknownMeter(id.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(selected)
    }

    /// Look up a meter by identifier.
    pub fn get(&self, id: &str) -> Option<&Meter> {
        self.meters.iter().find(|m| m.id == id)
    }

    /// Whether a meter with this identifier is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Meter> {
        self.meters.iter()
    }

    pub fn len(&self) -> usize {
        self.meters.len()
    }

    /// Always false for a successfully constructed registry.
    pub fn is_empty(&self) -> bool {
        self.meters.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.meters.iter().map(|m| m.id.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a MeterRegistry {
    type Item = &'a Meter;
    type IntoIter = std::slice::Iter<'a, Meter>;

    fn into_iter(self) -> Self::IntoIter {
        self.meters.iter()
    }
}
