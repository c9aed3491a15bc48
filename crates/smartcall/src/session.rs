//! Per-session state and interaction history.
//!
//! A [`SessionTracker`] keeps arbitrary key/value state for one
//! conversation, a time-to-live measured from the last state change, and an
//! append-only log of timestamped interactions. It round-trips through JSON:
//!
//! ```json
//! {
//!   "sessionId": "session-18c2f...-0000",
//!   "createdAt": "2026-01-01T12:00:00Z",
//!   "lastUpdated": "2026-01-01T12:03:10Z",
//!   "ttlSeconds": 3600,
//!   "state": { "user": "ada" },
//!   "history": [ { "type": "user_message", "timestamp": "...", "data": {} } ]
//! }
//! ```

use crate::clock::{SharedClock, system_clock};
use crate::dispatch::{CallOutcome, CallRequest};
use crate::error::SessionError;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Default session time-to-live.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// History entry type written by [`SessionTracker::record_call`].
pub const FUNCTION_CALL_ENTRY: &str = "function_call";

/// Generate a unique session ID.
pub fn generate_session_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("session-{ts:x}-{count:04x}")
}

fn default_ttl_seconds() -> u64 {
    DEFAULT_TTL.as_secs()
}

/// One logged interaction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    pub entry_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

/// State and history for one conversation.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionTracker {
    session_id: String,
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
    #[serde(default = "default_ttl_seconds")]
    ttl_seconds: u64,
    #[serde(default)]
    state: Map<String, Value>,
    #[serde(default)]
    history: Vec<HistoryEntry>,
    #[serde(skip, default = "system_clock")]
    clock: SharedClock,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTracker {
    /// A fresh session with a generated ID, the default TTL, and the system
    /// clock.
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// A fresh session reading time from `clock`.
    pub fn with_clock(clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            session_id: generate_session_id(),
            created_at: now,
            last_updated: now,
            ttl_seconds: default_ttl_seconds(),
            state: Map::new(),
            history: Vec::new(),
            clock,
        }
    }

    /// Use a caller-chosen session ID (builder pattern).
    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = id.into();
        self
    }

    /// Set the time-to-live (builder pattern). Sub-second parts are dropped.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl_seconds = ttl.as_secs();
        self
    }

    /// Replace the clock, e.g. after loading a saved session in a test.
    pub fn set_clock(&mut self, clock: SharedClock) {
        self.clock = clock;
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn ttl_duration(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn state(&self) -> &Map<String, Value> {
        &self.state
    }

    // ── State ──────────────────────────────────────────────────────

    /// Set one state value.
    pub fn update(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.state.insert(key.into(), value.into());
        self.touch();
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// State value, or `default` when the key is absent.
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.state.get(key).cloned().unwrap_or(default)
    }

    /// Shallow-merge `data` into the state; incoming keys win.
    pub fn merge(&mut self, data: Map<String, Value>) {
        self.state.extend(data);
        self.touch();
    }

    /// Drop all state. History is kept.
    pub fn clear(&mut self) {
        self.state.clear();
        self.touch();
    }

    fn touch(&mut self) {
        self.last_updated = self.clock.now();
    }

    // ── History ────────────────────────────────────────────────────

    /// Append a timestamped entry. Does not count as a state change.
    pub fn add_to_history(&mut self, entry_type: impl Into<String>, data: Value) {
        let entry = HistoryEntry {
            entry_type: entry_type.into(),
            timestamp: self.clock.now(),
            data,
        };
        debug!("[session] {} history += {}", self.session_id, entry.entry_type);
        self.history.push(entry);
    }

    /// Log a dispatched call and its outcome.
    pub fn record_call(&mut self, request: &CallRequest, outcome: &CallOutcome) {
        let data = json!({
            "name": request.name,
            "arguments": request.arguments,
            "outcome": outcome,
        });
        self.add_to_history(FUNCTION_CALL_ENTRY, data);
    }

    /// History in insertion order, optionally only entries of one type.
    pub fn history(&self, entry_type: Option<&str>) -> Vec<&HistoryEntry> {
        self.history
            .iter()
            .filter(|e| entry_type.is_none_or(|t| e.entry_type == t))
            .collect()
    }

    /// Whether more than the TTL has passed since the last state change.
    pub fn is_expired(&self) -> bool {
        let ttl = TimeDelta::try_seconds(i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX))
            .unwrap_or(TimeDelta::MAX);
        self.clock.now().signed_duration_since(self.last_updated) > ttl
    }

    // ── Persistence ────────────────────────────────────────────────

    pub fn to_json(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Restore a session. The restored session reads the system clock.
    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Atomic write: serialize to a temp file, then rename into place.
    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)?;
        debug!("[session] {} saved to {}", self.session_id, path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}
