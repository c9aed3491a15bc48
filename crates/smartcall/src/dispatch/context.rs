//! Caller-supplied session facts used to gate eligibility.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Arbitrary key/value facts about the current session.
///
/// Read-only from the engine's point of view and re-supplied on every
/// eligibility check and dispatch. Only key presence matters for context
/// requirements; values are never inspected.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct CallContext(Map<String, Value>);

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fact (builder pattern).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Whether every key in `requirements` is present.
    pub fn satisfies(&self, requirements: &[String]) -> bool {
        requirements.iter().all(|r| self.contains_key(r))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for CallContext {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for CallContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
