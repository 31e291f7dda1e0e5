use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::protocol::{Metric, MetricType, MetricValue};

/// Collects metrics between two flushes.
///
/// Entries are keyed by type and name, so a gauge and a counter with the same name are independent.
/// Inserting into the buffer merges with the existing entry, see [`MetricValue::merge`]. Gauges
/// keep the most recent value, counters are summed up.
///
/// Iteration order is stable: all gauges sorted by name, followed by all counters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsBuffer {
    entries: BTreeMap<(MetricType, String), MetricValue>,
}

impl MetricsBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a single metric into the buffer.
    pub fn insert(&mut self, metric: Metric) {
        match self.entries.entry((metric.ty(), metric.id)) {
            Entry::Occupied(mut entry) => entry.get_mut().merge(metric.value),
            Entry::Vacant(entry) => {
                entry.insert(metric.value);
            }
        }
    }

    /// Merges a freshly collected set of samples into the buffer.
    pub fn update(&mut self, samples: impl IntoIterator<Item = Metric>) {
        for metric in samples {
            self.insert(metric);
        }
    }

    /// Merges all entries of `other` into this buffer.
    ///
    /// Entries already in `self` are treated as older than those in `other`, so gauges from `other`
    /// win. Counters are summed regardless of order.
    pub fn merge(&mut self, other: MetricsBuffer) {
        if self.entries.is_empty() {
            self.entries = other.entries;
            return;
        }

        self.update(other.into_metrics());
    }

    /// Returns the buffered value for the given type and name.
    pub fn get(&self, ty: MetricType, id: &str) -> Option<MetricValue> {
        self.entries.get(&(ty, id.to_owned())).copied()
    }

    /// Returns the number of buffered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Empties the buffer and returns its previous contents.
    pub fn take(&mut self) -> MetricsBuffer {
        std::mem::take(self)
    }

    /// Iterates over all buffered entries as `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, MetricValue)> + '_ {
        self.entries
            .iter()
            .map(|((_, id), value)| (id.as_str(), *value))
    }

    /// Returns a copy of all buffered entries as metrics.
    pub fn to_vec(&self) -> Vec<Metric> {
        self.iter()
            .map(|(id, value)| Metric {
                id: id.to_owned(),
                value,
            })
            .collect()
    }

    /// Consumes the buffer and returns all entries as metrics.
    pub fn into_metrics(self) -> impl Iterator<Item = Metric> {
        self.entries
            .into_iter()
            .map(|((_, id), value)| Metric { id, value })
    }
}

impl FromIterator<Metric> for MetricsBuffer {
    fn from_iter<T: IntoIterator<Item = Metric>>(iter: T) -> Self {
        let mut buffer = Self::new();
        buffer.update(iter);
        buffer
    }
}
