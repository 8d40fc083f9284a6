//! Bounded top-K frequency tracking for response headers

use crate::logging::sanitize_header_value;
use crate::models::HeaderCount;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Counts `(name, value)` pairs and reports the most frequent ones.
///
/// Up to `max_entries` distinct pairs are counted exactly, and the result then
/// does not depend on arrival order. Past that the tracker runs the
/// Space-Saving algorithm: a new pair replaces the last-ranked entry and
/// inherits its count plus one. With `n` recorded occurrences:
///
/// - every pair seen more than `n / max_entries` times is tracked
/// - a reported count is never below the true count and exceeds it by at
///   most `n / max_entries`
///
/// The replaced entry is always outside the top-K, since `max_entries` is
/// kept above K.
#[derive(Debug, Clone)]
pub struct HeaderFrequencyTracker {
    counts: HashMap<(String, String), u64>,
    top_k: usize,
    max_entries: usize,
}

impl HeaderFrequencyTracker {
    pub fn new(top_k: usize, max_entries: usize) -> Self {
        let top_k = top_k.max(1);
        Self {
            counts: HashMap::new(),
            top_k,
            max_entries: max_entries.max(top_k + 1),
        }
    }

    /// Record one occurrence of a header
    pub fn record(&mut self, name: &str, value: &str) {
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            return;
        }
        let value = sanitize_header_value(&name, value.trim());
        let key = (name, value);

        if let Some(count) = self.counts.get_mut(&key) {
            *count += 1;
            return;
        }
        let floor = if self.counts.len() < self.max_entries {
            0
        } else {
            self.evict_last()
        };
        self.counts.insert(key, floor + 1);
    }

    /// Record every entry of a JSON header object.
    ///
    /// Non-string values are stored in their JSON text form; array values
    /// count once per element. Anything that is not an object is ignored.
    pub fn record_json(&mut self, headers: &serde_json::Value) {
        let Some(map) = headers.as_object() else {
            return;
        };

        for (name, value) in map {
            match value {
                serde_json::Value::String(s) => self.record(name, s),
                serde_json::Value::Array(items) => {
                    for item in items {
                        match item {
                            serde_json::Value::String(s) => self.record(name, s),
                            other => self.record(name, &other.to_string()),
                        }
                    }
                }
                serde_json::Value::Null => {}
                other => self.record(name, &other.to_string()),
            }
        }
    }

    /// The `k` most frequent pairs, count descending, then name, then value ascending
    pub fn top(&self, k: usize) -> Vec<HeaderCount> {
        let mut entries: Vec<(&(String, String), &u64)> = self.counts.iter().collect();
        entries.sort_by(|a, b| rank(a, b));

        entries
            .into_iter()
            .take(k)
            .map(|((name, value), count)| HeaderCount {
                name: name.clone(),
                value: value.clone(),
                count: *count,
            })
            .collect()
    }

    /// Top entries using the configured K
    pub fn top_default(&self) -> Vec<HeaderCount> {
        self.top(self.top_k)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }

    /// Remove the last-ranked entry and return its count
    fn evict_last(&mut self) -> u64 {
        let Some((key, count)) = self
            .counts
            .iter()
            .max_by(|a, b| rank(a, b))
            .map(|(key, count)| (key.clone(), *count))
        else {
            return 0;
        };
        self.counts.remove(&key);

        tracing::trace!(
            name = %key.0,
            count = count,
            "Replaced last-ranked header entry"
        );
        count
    }
}

fn rank(a: &(&(String, String), &u64), b: &(&(String, String), &u64)) -> Ordering {
    b.1.cmp(a.1)
        .then_with(|| a.0 .0.cmp(&b.0 .0))
        .then_with(|| a.0 .1.cmp(&b.0 .1))
}
