//! Result cache for successful dispatches.
//!
//! Successful outcomes are stored under `(name, canonical arguments)`, where
//! the canonical form is the validated argument map serialized with keys
//! sorted at every level. Two calls whose arguments differ only in key order
//! share an entry.
//!
//! The cache is populated but never consulted implicitly: dispatch always
//! re-executes, and [`ResultCache::get`] is a pure lookup for callers that
//! want a previous result.

use super::callable::Arguments;
use super::engine::CallOutcome;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct CacheEntry {
    outcome: CallOutcome,
    /// Insertion sequence, for oldest-first eviction.
    seq: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<(String, String), CacheEntry>,
    next_seq: u64,
}

/// Cache of successful call outcomes.
///
/// Unbounded unless constructed with [`ResultCache::with_capacity`].
/// Concurrent inserts are fine; on a key collision the last writer wins.
#[derive(Debug, Default)]
pub struct ResultCache {
    state: Mutex<CacheState>,
    capacity: Option<usize>,
}

impl ResultCache {
    /// An unbounded cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache holding at most `capacity` entries; the oldest insertion is
    /// evicted first. A capacity of zero disables storage.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::default(),
            capacity: Some(capacity),
        }
    }

    /// Look up a stored outcome.
    pub fn get(&self, name: &str, arguments: &Arguments) -> Option<CallOutcome> {
        let key = (name.to_string(), canonical_arguments(arguments));
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.entries.get(&key).map(|e| e.outcome.clone())
    }

    /// Store an outcome.
    pub fn put(&self, name: &str, arguments: &Arguments, outcome: CallOutcome) {
        if self.capacity == Some(0) {
            return;
        }
        let key = (name.to_string(), canonical_arguments(arguments));
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(capacity) = self.capacity
            && !state.entries.contains_key(&key)
            && state.entries.len() >= capacity
        {
            evict_oldest(&mut state);
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(key, CacheEntry { outcome, seq });
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

fn evict_oldest(state: &mut CacheState) {
    if let Some(oldest) = state
        .entries
        .iter()
        .min_by_key(|(_, e)| e.seq)
        .map(|(k, _)| k.clone())
    {
        state.entries.remove(&oldest);
    }
}

/// Canonical serialization of an argument map.
pub fn canonical_arguments(arguments: &Arguments) -> String {
    canonical_json(&Value::Object(arguments.clone()))
}

/// Serialize a JSON value with object keys sorted recursively.
pub fn canonical_json(value: &Value) -> String {
    sorted(value).to_string()
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let out: Map<String, Value> = keys
                .into_iter()
                .map(|k| (k.clone(), sorted(&map[k])))
                .collect();
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn args(v: Value) -> Arguments {
        v.as_object().cloned().unwrap_or_default()
    }

    fn success(v: Value) -> CallOutcome {
        CallOutcome::Success {
            result: v,
            execution_time: Duration::from_millis(1),
        }
    }

    #[test]
    fn put_and_get() {
        let cache = ResultCache::new();
        cache.put("add", &args(json!({"a": 2, "b": 3})), success(json!(5)));

        let hit = cache.get("add", &args(json!({"a": 2, "b": 3})));
        assert_eq!(hit.and_then(|o| o.result().cloned()), Some(json!(5)));
        assert!(cache.get("add", &args(json!({"a": 2, "b": 4}))).is_none());
        assert!(cache.get("sub", &args(json!({"a": 2, "b": 3}))).is_none());
    }

    #[test]
    fn key_order_does_not_matter() {
        let cache = ResultCache::new();
        cache.put("f", &args(json!({"b": 1, "a": {"y": 2, "x": 1}})), success(json!("r")));
        assert!(cache.get("f", &args(json!({"a": {"x": 1, "y": 2}, "b": 1}))).is_some());
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let v = json!({"z": [{"b": 1, "a": 2}], "a": null});
        assert_eq!(canonical_json(&v), r#"{"a":null,"z":[{"a":2,"b":1}]}"#);
    }

    #[test]
    fn last_writer_wins() {
        let cache = ResultCache::new();
        let a = args(json!({"k": 1}));
        cache.put("f", &a, success(json!(1)));
        cache.put("f", &a, success(json!(2)));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("f", &a).and_then(|o| o.result().cloned()), Some(json!(2)));
    }

    #[test]
    fn capacity_evicts_oldest_insertion() {
        let cache = ResultCache::with_capacity(2);
        cache.put("a", &Arguments::new(), success(json!(1)));
        cache.put("b", &Arguments::new(), success(json!(2)));
        cache.put("c", &Arguments::new(), success(json!(3)));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a", &Arguments::new()).is_none());
        assert!(cache.get("c", &Arguments::new()).is_some());
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let cache = ResultCache::with_capacity(0);
        cache.put("a", &Arguments::new(), success(json!(1)));
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_empties() {
        let cache = ResultCache::new();
        cache.put("a", &Arguments::new(), success(json!(1)));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), None);
    }
}
