//! Shared per-path error log (`spec.md` §4.D "Failure semantics",
//! §5 "Error map: mutex-guarded; any thread may append").

use std::collections::HashMap;
use std::sync::Mutex;

/// Mutex-guarded map from a failing path to the errors seen while scanning
/// it, safe to share across worker threads.
#[derive(Default)]
pub struct ErrorMap {
    entries: Mutex<HashMap<String, Vec<String>>>,
}

impl ErrorMap {
    /// An empty error map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure for `path`.
    pub fn record(&self, path: impl Into<String>, message: impl Into<String>) {
        self.entries.lock().unwrap().entry(path.into()).or_default().push(message.into());
    }

    /// Number of distinct failing paths.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether any failures have been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Snapshot the current contents.
    pub fn snapshot(&self) -> HashMap<String, Vec<String>> {
        self.entries.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_multiple_errors_per_path() {
        let map = ErrorMap::new();
        map.record("a.jpg", "open failed");
        map.record("a.jpg", "retry failed");
        let snap = map.snapshot();
        assert_eq!(snap.get("a.jpg").unwrap().len(), 2);
    }

    #[test]
    fn distinct_paths_are_independent() {
        let map = ErrorMap::new();
        map.record("a.jpg", "e1");
        map.record("b.jpg", "e2");
        assert_eq!(map.len(), 2);
    }
}
