use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::util::now_iso8601;

/// Monotonic event counters, one instance per gateway, passed explicitly to
/// whoever records into it.
#[derive(Default)]
pub struct Metrics {
    counters: Mutex<HashMap<String, u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self, key: &str) {
        self.add(key, 1);
    }

    pub fn add(&self, key: &str, delta: u64) {
        *self.counters.lock().entry(key.to_string()).or_insert(0) += delta;
    }

    pub fn get(&self, key: &str) -> u64 {
        self.counters.lock().get(key).copied().unwrap_or(0)
    }

    pub fn to_json(&self) -> Value {
        let counters = self.counters.lock();
        let mut map = serde_json::Map::new();
        for (k, v) in counters.iter() {
            map.insert(k.clone(), json!(v));
        }
        map.insert("updatedAt".into(), json!(now_iso8601()));
        Value::Object(map)
    }

    /// Best-effort snapshot write; failures are ignored per the persistence
    /// policy.
    pub fn write_snapshot(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(rendered) = serde_json::to_string_pretty(&self.to_json()) {
            let _ = std::fs::write(path, rendered);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inc_and_get() {
        let m = Metrics::new();
        m.inc("turns.total");
        m.inc("turns.total");
        m.add("tools.calls", 5);
        assert_eq!(m.get("turns.total"), 2);
        assert_eq!(m.get("tools.calls"), 5);
        assert_eq!(m.get("missing"), 0);
    }

    #[test]
    fn test_to_json_carries_timestamp() {
        let m = Metrics::new();
        m.inc("x");
        let snapshot = m.to_json();
        assert_eq!(snapshot["x"], 1);
        assert!(snapshot["updatedAt"].is_string());
    }
}
