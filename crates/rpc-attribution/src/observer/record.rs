use crate::registry::ProviderRegistry;
use indexmap::IndexMap;
use serde::Serialize;

pub const UNKNOWN_PROVIDER: &str = "unknown";

/// Request timestamps captured during one observation window, one
/// append-only list per provider indexed by registry position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservationRecords {
    timestamps: Vec<Vec<i64>>,
}

impl ObservationRecords {
    pub fn new(providers: usize) -> Self {
        Self {
            timestamps: vec![Vec::new(); providers],
        }
    }

    /// Returns false when `index` is outside the arena.
    pub fn append(&mut self, index: usize, timestamp_ms: i64) -> bool {
        match self.timestamps.get_mut(index) {
            Some(record) => {
                record.push(timestamp_ms);
                true
            }
            None => false,
        }
    }

    pub fn count(&self, index: usize) -> usize {
        self.timestamps.get(index).map_or(0, Vec::len)
    }

    pub fn last_timestamp(&self, index: usize) -> Option<i64> {
        self.timestamps
            .get(index)
            .and_then(|record| record.iter().copied().max())
    }

    pub fn total(&self) -> usize {
        self.timestamps.iter().map(Vec::len).sum()
    }

    /// Pick the provider serving the page's traffic.
    ///
    /// Linear scan in registry order: a strictly greater count replaces the
    /// current best, and so does an equal non-zero count whose latest
    /// timestamp is strictly later. No requests at all yields no provider.
    pub fn attribute(&self, registry: &ProviderRegistry) -> AttributionResult {
        let mut best: Option<usize> = None;
        let mut max_count = 0;

        for index in 0..registry.len() {
            let count = self.count(index);
            if count > max_count {
                max_count = count;
                best = Some(index);
            } else if count == max_count
                && count > 0
                && let Some(current) = best
                && self.last_timestamp(index) > self.last_timestamp(current)
            {
                best = Some(index);
            }
        }

        AttributionResult {
            detected_provider: best
                .and_then(|index| registry.name_at(index))
                .map(str::to_string),
            request_counts: registry
                .names()
                .enumerate()
                .map(|(index, name)| (name.to_string(), self.count(index)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributionResult {
    pub detected_provider: Option<String>,
    pub request_counts: IndexMap<String, usize>,
}

impl AttributionResult {
    pub fn provider_or_unknown(&self) -> &str {
        self.detected_provider.as_deref().unwrap_or(UNKNOWN_PROVIDER)
    }
}
