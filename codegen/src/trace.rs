//! Per-method, per-stage trace capture.
//!
//! Each stage publishes a textual dump of the method after it ran. Dumps
//! are keyed by (method symbol, stage name) and filtered by the stage list
//! in the options; compiler events additionally go to the `log` facade.
//! The explorer slices dump views on the `Block #<n> L_XXXX` headers the
//! dumps carry.

use rustc_hash::FxHashMap;
use std::sync::Mutex;

/// Selects which stage dumps are retained.
#[derive(Clone, Debug, Default)]
pub struct TraceFilter {
    stages: Vec<String>,
}

impl TraceFilter {
    /// Retain dumps of the named stages only.
    pub fn stages(stages: impl IntoIterator<Item = String>) -> Self {
        Self {
            stages: stages.into_iter().collect(),
        }
    }

    /// Retain every stage dump.
    pub fn all() -> Self {
        Self {
            stages: vec!["*".to_string()],
        }
    }

    /// Does the filter retain `stage`?
    pub fn accepts(&self, stage: &str) -> bool {
        self.stages.iter().any(|s| s == "*" || s == stage)
    }
}

/// Sink collecting stage dumps and error events across worker threads.
#[derive(Default)]
pub struct Trace {
    filter: TraceFilter,
    dumps: Mutex<FxHashMap<(String, String), String>>,
}

impl Trace {
    /// A trace with the given filter.
    pub fn new(filter: TraceFilter) -> Self {
        Self {
            filter,
            dumps: Mutex::new(FxHashMap::default()),
        }
    }

    /// Publish the dump of `stage` for `method`.
    pub fn publish(&self, method: &str, stage: &str, dump: String) {
        log::trace!("[{method}] after {stage}:\n{dump}");
        if !self.filter.accepts(stage) {
            return;
        }
        let mut dumps = self.dumps.lock().unwrap();
        dumps.insert((method.to_string(), stage.to_string()), dump);
    }

    /// Record an error event with its originating stage.
    pub fn error(&self, method: &str, stage: &str, message: &str) {
        log::error!("[{method}] {stage}: {message}");
    }

    /// Fetch a retained dump.
    pub fn dump(&self, method: &str, stage: &str) -> Option<String> {
        let dumps = self.dumps.lock().unwrap();
        dumps.get(&(method.to_string(), stage.to_string())).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_retains_selected_stages() {
        let trace = Trace::new(TraceFilter::stages(["decode".to_string()]));
        trace.publish("M", "decode", "Block #0 L_0000\n".to_string());
        trace.publish("M", "ssa", "Block #0 L_0000\n".to_string());
        assert!(trace.dump("M", "decode").is_some());
        assert!(trace.dump("M", "ssa").is_none());
    }

    #[test]
    fn wildcard_retains_everything() {
        let trace = Trace::new(TraceFilter::all());
        trace.publish("M", "anything", String::new());
        assert!(trace.dump("M", "anything").is_some());
    }
}
