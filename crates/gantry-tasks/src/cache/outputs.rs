use std::collections::HashMap;
use std::sync::Mutex;

/// Remembers which hash the declared outputs on disk were last produced or
/// restored from, so unchanged outputs need not be restored again.
pub trait OutputsTracker: Send + Sync {
    /// Record that `outputs` now hold the result of `hash`
    fn record_outputs_hash(&self, outputs: &[String], hash: &str);

    /// Whether `outputs` are known to hold the result of `hash`
    fn outputs_hashes_match(&self, outputs: &[String], hash: &str) -> bool;
}

/// Tracks nothing; outputs are always restored
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOutputsTracker;

impl OutputsTracker for NoopOutputsTracker {
    fn record_outputs_hash(&self, _outputs: &[String], _hash: &str) {}

    fn outputs_hashes_match(&self, _outputs: &[String], _hash: &str) -> bool {
        false
    }
}

/// Tracks outputs for the lifetime of the process
#[derive(Debug, Default)]
pub struct InMemoryOutputsTracker {
    hashes: Mutex<HashMap<String, String>>,
}

impl OutputsTracker for InMemoryOutputsTracker {
    fn record_outputs_hash(&self, outputs: &[String], hash: &str) {
        let mut hashes = self.hashes.lock().unwrap_or_else(|e| e.into_inner());
        for output in outputs {
            hashes.insert(output.clone(), hash.to_string());
        }
    }

    fn outputs_hashes_match(&self, outputs: &[String], hash: &str) -> bool {
        let hashes = self.hashes.lock().unwrap_or_else(|e| e.into_inner());
        !outputs.is_empty() && outputs.iter().all(|o| hashes.get(o).is_some_and(|h| h == hash))
    }
}
