//! The dispatch engine.
//!
//! A [`Dispatcher`] ties the registry, the validator, and the result cache
//! together. Each request moves through a fixed sequence of stages:
//!
//! ```text
//! Received -> Validated -> EligibilityChecked -> Executed -> Completed
//! ```
//!
//! Eligibility is confirmed in the same registry write that records the
//! invocation. A request with bad arguments is still reported as not
//! eligible when it would have been refused anyway.
//!
//! Every request ends in exactly one [`CallOutcome`]. Dispatch never returns
//! `Err` and never panics on behalf of a callable: unknown names, eligibility failures,
//! bad arguments, callable errors, and callable panics all become
//! [`CallOutcome::Failed`].

use super::cache::ResultCache;
use super::callable::{Arguments, Callable};
use super::context::CallContext;
use super::registry::FunctionRegistry;
use super::schema::CallSchema;
use super::validate::validate;
use crate::ToolDef;
use crate::error::{DecodeError, ErrorKind};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Default number of argument characters shown in the per-call info log.
pub const DEFAULT_PREVIEW_CHARS: usize = 120;

// ── Requests ───────────────────────────────────────────────────────

/// Raw arguments as the model sent them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum RawArguments {
    /// Serialized JSON object, the usual function-calling wire form.
    Encoded(String),
    /// Already structured key/value data.
    Structured(Arguments),
}

impl RawArguments {
    /// Decode into a key/value map. A blank string decodes to no arguments.
    pub fn decode(&self) -> Result<Arguments, DecodeError> {
        match self {
            RawArguments::Structured(map) => Ok(map.clone()),
            RawArguments::Encoded(s) if s.trim().is_empty() => Ok(Arguments::new()),
            RawArguments::Encoded(s) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(other) => Err(DecodeError(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                ))),
                Err(e) => Err(DecodeError(e.to_string())),
            },
        }
    }

    fn as_log_text(&self) -> String {
        match self {
            RawArguments::Encoded(s) => s.clone(),
            RawArguments::Structured(map) => Value::Object(map.clone()).to_string(),
        }
    }
}

impl Default for RawArguments {
    fn default() -> Self {
        RawArguments::Structured(Arguments::new())
    }
}

impl From<Arguments> for RawArguments {
    fn from(map: Arguments) -> Self {
        RawArguments::Structured(map)
    }
}

impl From<String> for RawArguments {
    fn from(s: String) -> Self {
        RawArguments::Encoded(s)
    }
}

impl From<&str> for RawArguments {
    fn from(s: &str) -> Self {
        RawArguments::Encoded(s.to_string())
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A model's request to invoke a callable.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: RawArguments,
}

impl CallRequest {
    pub fn new(name: impl Into<String>, arguments: impl Into<RawArguments>) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

impl From<&crate::ToolCall> for CallRequest {
    fn from(call: &crate::ToolCall) -> Self {
        Self::new(call.function.name.clone(), call.function.arguments.clone())
    }
}

// ── Outcomes ───────────────────────────────────────────────────────

/// Terminal result of a dispatch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallOutcome {
    Success {
        result: Value,
        #[serde(rename = "execution_time_seconds", with = "duration_secs")]
        execution_time: Duration,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
}

impl CallOutcome {
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        CallOutcome::Failed {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success { .. })
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            CallOutcome::Success { result, .. } => Some(result),
            CallOutcome::Failed { .. } => None,
        }
    }

    pub fn execution_time(&self) -> Option<Duration> {
        match self {
            CallOutcome::Success { execution_time, .. } => Some(*execution_time),
            CallOutcome::Failed { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            CallOutcome::Failed { kind, .. } => Some(*kind),
            CallOutcome::Success { .. } => None,
        }
    }

    /// Error message of a failed outcome.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            CallOutcome::Failed { message, .. } => Some(message),
            CallOutcome::Success { .. } => None,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Stage a request has reached, for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    Received,
    Validated,
    EligibilityChecked,
    Executed,
    Completed,
}

impl fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DispatchStage::Received => "received",
            DispatchStage::EligibilityChecked => "eligibility_checked",
            DispatchStage::Validated => "validated",
            DispatchStage::Executed => "executed",
            DispatchStage::Completed => "completed",
        };
        f.write_str(s)
    }
}

// ── Dispatcher ─────────────────────────────────────────────────────

/// Validates and executes model call requests against a shared registry.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<FunctionRegistry>,
    cache: Arc<ResultCache>,
    preview_chars: usize,
}

impl Dispatcher {
    /// Dispatcher with an unbounded result cache.
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self::with_cache(registry, Arc::new(ResultCache::new()))
    }

    pub fn with_cache(registry: Arc<FunctionRegistry>, cache: Arc<ResultCache>) -> Self {
        Self {
            registry,
            cache,
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }

    /// Characters of argument text shown in the per-call info log.
    pub fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Schemas eligible under `context`, highest priority first.
    pub fn prepare_for_model(&self, context: &CallContext) -> Vec<Arc<CallSchema>> {
        self.registry
            .filter_eligible(context)
            .iter()
            .filter_map(|name| self.registry.schema(name))
            .collect()
    }

    /// Eligible schemas in the function-calling wire format.
    pub fn tool_defs(&self, context: &CallContext) -> Vec<ToolDef> {
        self.prepare_for_model(context)
            .iter()
            .map(|s| s.to_tool_def())
            .collect()
    }

    /// Validate and execute one call request.
    pub async fn dispatch(&self, request: CallRequest, context: &CallContext) -> CallOutcome {
        let name = request.name.as_str();
        debug!("[dispatch] {name}: {}", DispatchStage::Received);

        let raw = match request.arguments.decode() {
            Ok(args) => args,
            Err(e) => {
                warn!(
                    "[dispatch] {name}: {} ({}), continuing with empty arguments",
                    e,
                    ErrorKind::DecodeError
                );
                Arguments::new()
            }
        };

        let Some(entry) = self.registry.entry(name) else {
            warn!("[dispatch] unknown function '{name}'");
            return CallOutcome::failed(
                ErrorKind::UnknownFunction,
                format!("unknown function '{name}'"),
            );
        };

        let validated = match validate(&entry.schema, &raw) {
            Ok(v) => v,
            Err(e) => {
                // NotEligible outranks InvalidParameters.
                if let Err(reason) = self.registry.check_eligible(name, context) {
                    return not_eligible(name, reason);
                }
                warn!("[dispatch] {name}: {e}");
                return CallOutcome::failed(ErrorKind::InvalidParameters, e.to_string());
            }
        };
        debug!("[dispatch] {name}: {}", DispatchStage::Validated);

        // At most one request per cooldown window gets past this point.
        if let Err(reason) = self.registry.check_and_record(name, context) {
            return not_eligible(name, reason);
        }
        debug!("[dispatch] {name}: {}", DispatchStage::EligibilityChecked);
        log_call(name, &request.arguments.as_log_text(), self.preview_chars);

        let start = Instant::now();
        let result = run_guarded(entry.callable.as_ref(), validated.clone()).await;
        let execution_time = start.elapsed();
        debug!(
            "[dispatch] {name}: {} in {:.0}ms",
            DispatchStage::Executed,
            execution_time.as_secs_f64() * 1000.0
        );

        let outcome = match result {
            Ok(value) => {
                trace!("[dispatch] {name} result: {value}");
                let outcome = CallOutcome::Success {
                    result: value,
                    execution_time,
                };
                self.cache.put(name, &validated, outcome.clone());
                outcome
            }
            Err(message) => {
                warn!("[dispatch] {name} failed: {message}");
                CallOutcome::failed(ErrorKind::ExecutionError, message)
            }
        };
        debug!("[dispatch] {name}: {}", DispatchStage::Completed);
        outcome
    }

    /// Look up a previously cached successful outcome.
    ///
    /// `parameters` are coerced against the callable's schema first when
    /// possible, so `{"a": "2"}` finds the entry stored for `{"a": 2}`.
    pub fn cached(&self, name: &str, parameters: &Arguments) -> Option<CallOutcome> {
        let canonical = self
            .registry
            .schema(name)
            .and_then(|schema| validate(&schema, parameters).ok());
        self.cache.get(name, canonical.as_ref().unwrap_or(parameters))
    }
}

fn not_eligible(name: &str, reason: String) -> CallOutcome {
    info!("[dispatch] {name} not eligible: {reason}");
    CallOutcome::failed(ErrorKind::NotEligible, reason)
}

/// Run a callable, turning a panic in either the call itself or the
/// returned future into an error message.
async fn run_guarded(callable: &dyn Callable, args: Arguments) -> Result<Value, String> {
    let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| callable.call(args))) {
        Ok(fut) => fut,
        Err(payload) => return Err(panic_message(payload.as_ref())),
    };
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into());
    format!("callable panicked: {detail}")
}

/// Log a call at three verbosity levels: a truncated preview at info, the
/// size at debug, and the full arguments at trace.
pub fn log_call(name: &str, arguments: &str, preview_chars: usize) {
    let preview: String = arguments.chars().take(preview_chars).collect();
    info!(
        "[call] {}({preview}{})",
        name,
        if arguments.chars().count() > preview_chars {
            "..."
        } else {
            ""
        }
    );
    debug!("[call] {name} full args ({} bytes)", arguments.len());
    trace!("[call] {name} arguments: {arguments}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::dispatch::callable::FnCallable;
    use crate::dispatch::registry::RegisterOptions;
    use crate::dispatch::schema::ParamDescriptor;
    use serde_json::json;

    fn add() -> FnCallable {
        FnCallable::with_params(
            "add",
            vec![
                ParamDescriptor::required("a", "int"),
                ParamDescriptor::required("b", "int"),
            ],
            |args: Arguments| async move {
                let a = args["a"].as_i64().unwrap_or_default();
                let b = args["b"].as_i64().unwrap_or_default();
                Ok(json!(a + b))
            },
        )
    }

    fn dispatcher() -> (Dispatcher, ManualClock) {
        let clock = ManualClock::starting_now();
        let registry = Arc::new(FunctionRegistry::with_clock(clock.shared()));
        registry.register(add(), RegisterOptions::new()).unwrap();
        (Dispatcher::new(registry), clock)
    }

    #[test]
    fn decode_accepts_objects_only() {
        assert_eq!(
            RawArguments::from(r#"{"a":1}"#).decode().unwrap()["a"],
            json!(1)
        );
        assert!(RawArguments::from("").decode().unwrap().is_empty());
        assert!(RawArguments::from("[1,2]").decode().is_err());
        assert!(RawArguments::from("{not json").decode().is_err());
    }

    #[test]
    fn call_request_deserializes_either_argument_form() {
        let encoded: CallRequest =
            serde_json::from_value(json!({"name": "add", "arguments": "{\"a\":1}"})).unwrap();
        assert!(matches!(encoded.arguments, RawArguments::Encoded(_)));

        let structured: CallRequest =
            serde_json::from_value(json!({"name": "add", "arguments": {"a": 1}})).unwrap();
        assert!(matches!(structured.arguments, RawArguments::Structured(_)));

        let bare: CallRequest = serde_json::from_value(json!({"name": "add"})).unwrap();
        assert_eq!(bare.arguments, RawArguments::default());
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let ok = CallOutcome::Success {
            result: json!(5),
            execution_time: Duration::from_millis(250),
        };
        let v = serde_json::to_value(&ok).unwrap();
        assert_eq!(v["status"], "success");
        assert_eq!(v["execution_time_seconds"], json!(0.25));

        let err = CallOutcome::failed(ErrorKind::NotEligible, "nope");
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v, json!({"status": "failed", "kind": "not_eligible", "message": "nope"}));
        assert_eq!(serde_json::from_value::<CallOutcome>(v).unwrap(), err);
    }

    #[tokio::test]
    async fn dispatch_success_is_cached() {
        let (d, _) = dispatcher();
        let outcome = d
            .dispatch(CallRequest::new("add", r#"{"a": 2, "b": "3"}"#), &CallContext::new())
            .await;
        assert_eq!(outcome.result(), Some(&json!(5)));
        assert!(outcome.execution_time().is_some());
        assert_eq!(d.registry().call_count("add"), Some(1));

        let args = json!({"b": 3, "a": 2}).as_object().cloned().unwrap();
        assert_eq!(d.cached("add", &args).and_then(|o| o.result().cloned()), Some(json!(5)));
        let loose = json!({"a": "2", "b": "3"}).as_object().cloned().unwrap();
        assert!(d.cached("add", &loose).is_some());
    }

    #[tokio::test]
    async fn unknown_function_fails() {
        let (d, _) = dispatcher();
        let outcome = d.dispatch(CallRequest::new("mul", "{}"), &CallContext::new()).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::UnknownFunction));
    }

    #[tokio::test]
    async fn invalid_parameters_do_not_execute_or_consume_cooldown() {
        let (d, _) = dispatcher();
        let outcome = d
            .dispatch(CallRequest::new("add", r#"{"a": "x", "b": 1}"#), &CallContext::new())
            .await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::InvalidParameters));
        assert_eq!(d.registry().call_count("add"), Some(0));
        assert!(d.cache().is_empty());
    }

    #[tokio::test]
    async fn malformed_arguments_recover_as_empty() {
        let (d, _) = dispatcher();
        let outcome = d
            .dispatch(CallRequest::new("add", "{oops"), &CallContext::new())
            .await;
        // Decode recovered, then validation reports the missing parameter.
        assert_eq!(outcome.error_kind(), Some(ErrorKind::InvalidParameters));
        assert!(outcome.error_message().unwrap().contains("missing required parameter"));
    }

    #[tokio::test]
    async fn execution_errors_and_panics_are_contained() {
        let (d, _) = dispatcher();
        d.registry()
            .register(
                FnCallable::with_params("fail", vec![], |_args: Arguments| async move {
                    Err::<Value, _>("backend down".to_string())
                }),
                RegisterOptions::new(),
            )
            .unwrap();
        d.registry()
            .register(
                FnCallable::with_params("boom", vec![], |_args: Arguments| async move {
                    if true {
                        panic!("exploded");
                    }
                    Ok(Value::Null)
                }),
                RegisterOptions::new(),
            )
            .unwrap();

        let fail = d.dispatch(CallRequest::new("fail", "{}"), &CallContext::new()).await;
        assert_eq!(fail.error_kind(), Some(ErrorKind::ExecutionError));
        assert_eq!(fail.error_message(), Some("backend down"));
        // Execution failures still count as invocations.
        assert_eq!(d.registry().call_count("fail"), Some(1));

        let boom = d.dispatch(CallRequest::new("boom", "{}"), &CallContext::new()).await;
        assert_eq!(boom.error_kind(), Some(ErrorKind::ExecutionError));
        assert!(boom.error_message().unwrap().contains("exploded"));
    }

    #[tokio::test]
    async fn context_requirements_are_rechecked() {
        let (d, _) = dispatcher();
        d.registry()
            .register(
                FnCallable::with_params("restricted", vec![], |_args: Arguments| async move {
                    Ok(json!("secret"))
                }),
                RegisterOptions::new().requires("admin"),
            )
            .unwrap();

        let denied = d
            .dispatch(CallRequest::new("restricted", "{}"), &CallContext::new())
            .await;
        assert_eq!(denied.error_kind(), Some(ErrorKind::NotEligible));
        assert!(denied.error_message().unwrap().contains("admin"));

        let ctx = CallContext::new().with("admin", true);
        let allowed = d.dispatch(CallRequest::new("restricted", "{}"), &ctx).await;
        assert_eq!(allowed.result(), Some(&json!("secret")));
    }

    #[tokio::test]
    async fn ineligibility_outranks_bad_arguments() {
        let (d, _) = dispatcher();
        d.registry()
            .register(
                FnCallable::with_params(
                    "grant",
                    vec![ParamDescriptor::required("user", "str")],
                    |_args: Arguments| async move { Ok(Value::Null) },
                ),
                RegisterOptions::new().requires("admin"),
            )
            .unwrap();

        let outcome = d
            .dispatch(CallRequest::new("grant", "{}"), &CallContext::new())
            .await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::NotEligible));

        let admin = CallContext::new().with("admin", true);
        let outcome = d.dispatch(CallRequest::new("grant", "{}"), &admin).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::InvalidParameters));
        assert_eq!(d.registry().call_count("grant"), Some(0));
    }

    #[tokio::test]
    async fn cooldown_blocks_repeat_calls_until_elapsed() {
        let (d, clock) = dispatcher();
        d.registry()
            .register(
                FnCallable::with_params("ping", vec![], |_args: Arguments| async move {
                    Ok(json!("pong"))
                }),
                RegisterOptions::new().cooldown(Duration::from_secs(10)),
            )
            .unwrap();
        let ctx = CallContext::new();

        assert!(d.dispatch(CallRequest::new("ping", "{}"), &ctx).await.is_success());
        let names: Vec<String> = d.prepare_for_model(&ctx).iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["add"]);

        let again = d.dispatch(CallRequest::new("ping", "{}"), &ctx).await;
        assert_eq!(again.error_kind(), Some(ErrorKind::NotEligible));

        clock.advance(Duration::from_secs(11));
        assert!(d.dispatch(CallRequest::new("ping", "{}"), &ctx).await.is_success());
    }

    #[test]
    fn tool_defs_follow_eligibility_order() {
        let (d, _) = dispatcher();
        d.registry()
            .register(
                FnCallable::with_params("urgent", vec![], |_args: Arguments| async move {
                    Ok(Value::Null)
                }),
                RegisterOptions::new().priority(9),
            )
            .unwrap();
        let defs = d.tool_defs(&CallContext::new());
        let names: Vec<&str> = defs.iter().map(|t| t.function.name.as_str()).collect();
        assert_eq!(names, vec!["urgent", "add"]);
        assert_eq!(defs[1].function.parameters["required"], json!(["a", "b"]));
    }

    #[test]
    fn stage_names_are_snake_case() {
        assert_eq!(DispatchStage::EligibilityChecked.to_string(), "eligibility_checked");
    }
}
