//! Function registry: registration, lookup, and eligibility filtering.
//!
//! The registry owns every registered callable together with its synthesized
//! [`CallSchema`] and per-callable invocation state (last invocation time and
//! call counter). It is built explicitly and shared behind an `Arc`; all
//! state sits under one `RwLock` that is never held while a callable runs.

use super::callable::Callable;
use super::context::CallContext;
use super::schema::{CallSchema, DEFAULT_PRIORITY, MAX_PRIORITY, MIN_PRIORITY, synthesize};
use crate::clock::{SharedClock, system_clock};
use crate::error::RegistryError;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Description used when neither the callable nor the options give one.
pub const NO_DESCRIPTION: &str = "No description provided";

// ── Registration options ───────────────────────────────────────────

/// Per-registration overrides and scheduling metadata.
///
/// ```ignore
/// registry.register(
///     list_users,
///     RegisterOptions::new()
///         .description("List all users")
///         .priority(8)
///         .requires("admin"),
/// )?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterOptions {
    pub name: Option<String>,
    pub description: Option<String>,
    pub priority: u8,
    pub cooldown: Duration,
    pub context_requirements: Vec<String>,
}

impl Default for RegisterOptions {
    fn default() -> Self {
        Self {
            name: None,
            description: None,
            priority: DEFAULT_PRIORITY,
            cooldown: Duration::ZERO,
            context_requirements: Vec::new(),
        }
    }
}

impl RegisterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under this name instead of the callable's own.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// 1-10; out-of-range values are clamped at registration.
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Require a context key to be present for the callable to be eligible.
    pub fn requires(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.context_requirements.contains(&key) {
            self.context_requirements.push(key);
        }
        self
    }
}

// ── Registry ───────────────────────────────────────────────────────

struct Record {
    callable: Arc<dyn Callable>,
    schema: Arc<CallSchema>,
    last_invocation: Option<DateTime<Utc>>,
    call_count: u64,
}

#[derive(Default)]
struct RegistryState {
    records: HashMap<String, Record>,
    /// Names in first-registration order; ties in priority keep this order.
    order: Vec<String>,
}

/// Snapshot of one registration: the schema and a handle to the callable.
#[derive(Clone)]
pub struct RegistryEntry {
    pub schema: Arc<CallSchema>,
    pub callable: Arc<dyn Callable>,
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("schema", &self.schema.name)
            .finish()
    }
}

/// Registry of callables the model may request.
pub struct FunctionRegistry {
    state: RwLock<RegistryState>,
    clock: SharedClock,
    strict: bool,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("names", &self.names())
            .field("strict", &self.strict)
            .finish()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry {
    /// An empty registry reading time from the system clock.
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// An empty registry reading time from `clock`.
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            state: RwLock::default(),
            clock,
            strict: false,
        }
    }

    /// Reject re-registration of an existing name instead of overwriting.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Register a callable and return its synthesized schema.
    ///
    /// Re-registering a name replaces the callable and schema in place,
    /// resets the call counter, and keeps the last invocation time. In strict
    /// mode it fails with [`RegistryError::DuplicateName`] instead.
    pub fn register(
        &self,
        callable: impl Callable + 'static,
        options: RegisterOptions,
    ) -> Result<Arc<CallSchema>, RegistryError> {
        self.register_arc(Arc::new(callable), options)
    }

    /// Register an already shared callable.
    pub fn register_arc(
        &self,
        callable: Arc<dyn Callable>,
        options: RegisterOptions,
    ) -> Result<Arc<CallSchema>, RegistryError> {
        let name = options.name.unwrap_or_else(|| callable.name());
        let description = options
            .description
            .or_else(|| callable.description())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| NO_DESCRIPTION.to_string());

        let priority = options.priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
        if priority != options.priority {
            warn!(
                "[registry] {name}: priority {} out of range, clamped to {priority}",
                options.priority
            );
        }

        let (parameters, required_parameters) = synthesize(&callable.parameters());
        let schema = Arc::new(CallSchema {
            name: name.clone(),
            description,
            parameters,
            required_parameters,
            context_requirements: options.context_requirements,
            priority,
            cooldown: options.cooldown,
        });

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let previous_invocation = match state.records.get(&name) {
            Some(_) if self.strict => return Err(RegistryError::DuplicateName(name)),
            Some(existing) => {
                debug!("[registry] {name} re-registered, replacing previous callable");
                Some(existing.last_invocation)
            }
            None => None,
        };
        if previous_invocation.is_none() {
            state.order.push(name.clone());
        }
        state.records.insert(
            name.clone(),
            Record {
                callable,
                schema: Arc::clone(&schema),
                last_invocation: previous_invocation.flatten(),
                call_count: 0,
            },
        );
        drop(state);

        info!(
            "[registry] registered {name} (priority {priority}, {} params, cooldown {:.1}s)",
            schema.parameters.len(),
            schema.cooldown.as_secs_f64()
        );
        Ok(schema)
    }

    /// Schema of a registered callable.
    pub fn schema(&self, name: &str) -> Option<Arc<CallSchema>> {
        self.read(|s| s.records.get(name).map(|r| Arc::clone(&r.schema)))
    }

    /// Handle to a registered callable.
    pub fn callable(&self, name: &str) -> Option<Arc<dyn Callable>> {
        self.read(|s| s.records.get(name).map(|r| Arc::clone(&r.callable)))
    }

    /// Schema and callable together, from a single lock acquisition.
    pub fn entry(&self, name: &str) -> Option<RegistryEntry> {
        self.read(|s| {
            s.records.get(name).map(|r| RegistryEntry {
                schema: Arc::clone(&r.schema),
                callable: Arc::clone(&r.callable),
            })
        })
    }

    /// Every schema, in registration order.
    pub fn schemas(&self) -> Vec<Arc<CallSchema>> {
        self.read(|s| {
            s.order
                .iter()
                .filter_map(|n| s.records.get(n))
                .map(|r| Arc::clone(&r.schema))
                .collect()
        })
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.read(|s| s.order.clone())
    }

    pub fn len(&self) -> usize {
        self.read(|s| s.records.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of callables eligible under `context`, highest priority first.
    ///
    /// A callable is eligible when every one of its context requirements is
    /// present and its cooldown has elapsed since the last invocation. Equal
    /// priorities keep registration order.
    pub fn filter_eligible(&self, context: &CallContext) -> Vec<String> {
        let now = self.clock.now();
        let mut eligible: Vec<(u8, String)> = self.read(|s| {
            s.order
                .iter()
                .filter_map(|n| s.records.get(n))
                .filter(|r| record_eligible(r, context, now))
                .map(|r| (r.schema.priority, r.schema.name.clone()))
                .collect()
        });
        eligible.sort_by(|a, b| b.0.cmp(&a.0));
        eligible.into_iter().map(|(_, name)| name).collect()
    }

    /// Whether a single callable is eligible under `context`. Unknown names
    /// are not eligible.
    pub fn is_eligible(&self, name: &str, context: &CallContext) -> bool {
        self.check_eligible(name, context).is_ok()
    }

    /// Like [`is_eligible`](Self::is_eligible), but says why not.
    pub fn check_eligible(&self, name: &str, context: &CallContext) -> Result<(), String> {
        let now = self.clock.now();
        self.read(|s| match s.records.get(name) {
            Some(record) => ineligibility(record, context, now).map_or(Ok(()), Err),
            None => Err(format!("unknown function '{name}'")),
        })
    }

    /// Check eligibility and, if it passes, record the invocation, all under
    /// one write lock. Of several concurrent callers of a callable with a
    /// cooldown, only the first succeeds.
    pub fn check_and_record(&self, name: &str, context: &CallContext) -> Result<(), String> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let Some(record) = state.records.get_mut(name) else {
            return Err(format!("unknown function '{name}'"));
        };
        let now = self.clock.now();
        if let Some(reason) = ineligibility(record, context, now) {
            return Err(reason);
        }
        record.last_invocation = Some(now);
        record.call_count += 1;
        Ok(())
    }

    /// Mark a callable as invoked now without checking eligibility. Unknown
    /// names are ignored.
    pub fn record_invocation(&self, name: &str) {
        let now = self.clock.now();
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = state.records.get_mut(name) {
            record.last_invocation = Some(now);
            record.call_count += 1;
        }
    }

    /// Number of recorded invocations since the last registration.
    pub fn call_count(&self, name: &str) -> Option<u64> {
        self.read(|s| s.records.get(name).map(|r| r.call_count))
    }

    /// Time of the last recorded invocation; `Some(None)` if never invoked.
    pub fn last_invocation(&self, name: &str) -> Option<Option<DateTime<Utc>>> {
        self.read(|s| s.records.get(name).map(|r| r.last_invocation))
    }

    fn read<T>(&self, f: impl FnOnce(&RegistryState) -> T) -> T {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        f(&state)
    }
}

fn record_eligible(record: &Record, context: &CallContext, now: DateTime<Utc>) -> bool {
    ineligibility(record, context, now).is_none()
}

/// Why `record` may not run at `now`, naming missing context keys first.
fn ineligibility(record: &Record, context: &CallContext, now: DateTime<Utc>) -> Option<String> {
    let schema = &record.schema;
    let missing: Vec<&str> = schema
        .context_requirements
        .iter()
        .filter(|k| !context.contains_key(k))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Some(format!(
            "function '{}' requires context: {}",
            schema.name,
            missing.join(", ")
        ));
    }

    let last = record.last_invocation?;
    let cooldown = TimeDelta::from_std(schema.cooldown).unwrap_or(TimeDelta::MAX);
    (now.signed_duration_since(last) < cooldown).then(|| {
        format!(
            "function '{}' is cooling down ({:.1}s cooldown)",
            schema.name,
            schema.cooldown.as_secs_f64()
        )
    })
}
