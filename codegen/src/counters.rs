//! Named counters.
//!
//! Stages bump per-method counters (instruction counts, optimization hits,
//! spill counts); the driver merges them into a global registry when the
//! method finishes, and the launcher prints the stream after the build.

use rustc_hash::FxHashMap;
use std::sync::Mutex;

/// Per-method counter set. Cheap to update, merged at method end.
#[derive(Default, Debug)]
pub struct Counters {
    values: FxHashMap<String, u64>,
}

impl Counters {
    /// An empty counter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to `name`.
    pub fn update(&mut self, name: impl Into<String>, amount: u64) {
        *self.values.entry(name.into()).or_insert(0) += amount;
    }

    /// Current value of `name`.
    pub fn get(&self, name: &str) -> u64 {
        self.values.get(name).copied().unwrap_or(0)
    }

    /// Iterate over all counters.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.values.iter().map(|(k, &v)| (k.as_str(), v))
    }
}

/// The global registry the per-method sets merge into.
#[derive(Default)]
pub struct GlobalCounters {
    values: Mutex<FxHashMap<String, u64>>,
}

impl GlobalCounters {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a finished method's counters.
    pub fn merge(&self, counters: &Counters) {
        let mut values = self.values.lock().unwrap();
        for (name, value) in counters.iter() {
            *values.entry(name.to_string()).or_insert(0) += value;
        }
    }

    /// Snapshot the counter stream, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let values = self.values.lock().unwrap();
        let mut out: Vec<_> = values.iter().map(|(k, &v)| (k.clone(), v)).collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_and_merge() {
        let mut local = Counters::new();
        local.update("decode.instructions", 10);
        local.update("decode.instructions", 5);
        assert_eq!(local.get("decode.instructions"), 15);

        let global = GlobalCounters::new();
        global.merge(&local);
        global.merge(&local);
        assert_eq!(global.snapshot(), vec![("decode.instructions".into(), 30)]);
    }
}
