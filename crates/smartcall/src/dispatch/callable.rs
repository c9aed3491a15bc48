//! Host-defined callables.
//!
//! A [`Callable`] is anything the model may ask to run. It declares its
//! parameters as [`ParamDescriptor`]s (from which the registry synthesizes a
//! [`CallSchema`](super::schema::CallSchema)) and executes against an already
//! validated argument map.
//!
//! There are three ways to provide one:
//!
//! - **[`FnCallable`]**: wraps an async closure. The typed constructor
//!   derives parameters from the argument type via `schemars`.
//! - **[`BlockingFn`]**: wraps a synchronous closure and runs it on tokio's
//!   blocking pool, so a slow callable only stalls its own dispatch.
//! - **`impl Callable`**: a struct with its own state (clients, handles).

use super::schema::{ParamDescriptor, descriptors_for};
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Validated arguments handed to a callable.
pub type Arguments = Map<String, Value>;

/// Boxed future returned by [`Callable::call`]. `Err` carries a message that
/// is reported as an execution error.
pub type CallFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, String>> + Send + 'a>>;

/// An operation the model may request.
///
/// # Example
///
/// ```ignore
/// struct Lookup { db: Db }
///
/// impl Callable for Lookup {
///     fn name(&self) -> String { "lookup".into() }
///
///     fn parameters(&self) -> Vec<ParamDescriptor> {
///         vec![ParamDescriptor::required("id", "i64")]
///     }
///
///     fn call(&self, args: Arguments) -> CallFuture<'_> {
///         Box::pin(async move {
///             let id = args["id"].as_i64().unwrap_or_default();
///             self.db.get(id).await.map_err(|e| e.to_string())
///         })
///     }
/// }
/// ```
pub trait Callable: Send + Sync {
    /// Name used when registration options don't override it.
    fn name(&self) -> String;

    /// Description used when registration options don't override it.
    fn description(&self) -> Option<String> {
        None
    }

    /// Formal parameter list.
    fn parameters(&self) -> Vec<ParamDescriptor>;

    /// Execute with validated arguments.
    fn call(&self, args: Arguments) -> CallFuture<'_>;
}

/// Deserialize validated arguments into a handler's argument type.
fn decode_args<A: DeserializeOwned>(args: Arguments) -> Result<A, String> {
    serde_json::from_value(Value::Object(args))
        .map_err(|e| format!("arguments do not match handler signature: {e}"))
}

/// Serialize a handler's result, turning its error into a message.
fn encode_result<R: Serialize, E: fmt::Display>(result: Result<R, E>) -> Result<Value, String> {
    let value = result.map_err(|e| e.to_string())?;
    serde_json::to_value(value).map_err(|e| format!("failed to serialize result: {e}"))
}

// ── FnCallable ─────────────────────────────────────────────────────

type BoxedCall = Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>;

type ErasedHandler = Box<dyn Fn(Arguments) -> BoxedCall + Send + Sync>;

/// A closure-based async callable.
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct AddArgs { a: i64, b: i64 }
///
/// let add = FnCallable::new("add", |args: AddArgs| async move {
///     Ok::<_, String>(args.a + args.b)
/// })
/// .describe("Add two integers");
/// ```
pub struct FnCallable {
    name: String,
    description: Option<String>,
    params: Vec<ParamDescriptor>,
    handler: ErasedHandler,
}

impl FnCallable {
    /// Typed handler. Parameters are derived from `A`'s JSON Schema and the
    /// validated arguments are deserialized into `A` before each call.
    pub fn new<A, R, E, F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        R: Serialize + Send + 'static,
        E: fmt::Display + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let erased = move |args: Arguments| -> BoxedCall {
            let parsed: A = match decode_args(args) {
                Ok(a) => a,
                Err(e) => return Box::pin(async move { Err(e) }),
            };
            let fut = handler(parsed);
            Box::pin(async move { encode_result(fut.await) })
        };

        Self {
            name: name.into(),
            description: None,
            params: descriptors_for::<A>(),
            handler: Box::new(erased),
        }
    }

    /// Untyped handler with an explicit parameter list.
    pub fn with_params<F, Fut>(
        name: impl Into<String>,
        params: Vec<ParamDescriptor>,
        handler: F,
    ) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            params,
            handler: Box::new(move |args| -> BoxedCall { Box::pin(handler(args)) }),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Callable for FnCallable {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> Option<String> {
        self.description.clone()
    }

    fn parameters(&self) -> Vec<ParamDescriptor> {
        self.params.clone()
    }

    fn call(&self, args: Arguments) -> CallFuture<'_> {
        (self.handler)(args)
    }
}

impl fmt::Debug for FnCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCallable")
            .field("name", &self.name)
            .field("params", &self.params.len())
            .finish()
    }
}

// ── BlockingFn ─────────────────────────────────────────────────────

type BlockingHandler = Arc<dyn Fn(Arguments) -> Result<Value, String> + Send + Sync>;

/// A synchronous callable run on tokio's blocking thread pool.
///
/// A panic inside the handler surfaces as an execution error.
pub struct BlockingFn {
    name: String,
    description: Option<String>,
    params: Vec<ParamDescriptor>,
    handler: BlockingHandler,
}

impl BlockingFn {
    /// Typed handler; parameters derived from `A`.
    pub fn new<A, R, E, F>(name: impl Into<String>, handler: F) -> Self
    where
        A: DeserializeOwned + JsonSchema + 'static,
        R: Serialize + 'static,
        E: fmt::Display + 'static,
        F: Fn(A) -> Result<R, E> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            params: descriptors_for::<A>(),
            handler: Arc::new(move |args: Arguments| -> Result<Value, String> {
                encode_result(handler(decode_args(args)?))
            }),
        }
    }

    /// Untyped handler with an explicit parameter list.
    pub fn with_params<F>(name: impl Into<String>, params: Vec<ParamDescriptor>, handler: F) -> Self
    where
        F: Fn(Arguments) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            params,
            handler: Arc::new(handler),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Callable for BlockingFn {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> Option<String> {
        self.description.clone()
    }

    fn parameters(&self) -> Vec<ParamDescriptor> {
        self.params.clone()
    }

    fn call(&self, args: Arguments) -> CallFuture<'_> {
        let handler = Arc::clone(&self.handler);
        Box::pin(async move {
            match tokio::task::spawn_blocking(move || handler(args)).await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err("callable panicked".into()),
                Err(e) => Err(format!("blocking task failed: {e}")),
            }
        })
    }
}

impl fmt::Debug for BlockingFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingFn")
            .field("name", &self.name)
            .field("params", &self.params.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::schema::ParamType;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize, JsonSchema)]
    struct AddArgs {
        a: i64,
        b: i64,
    }

    fn args(v: Value) -> Arguments {
        v.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn typed_fn_callable_derives_params_and_runs() {
        let add = FnCallable::new("add", |a: AddArgs| async move { Ok::<_, String>(a.a + a.b) })
            .describe("Add two integers");

        assert_eq!(add.name(), "add");
        assert_eq!(add.description().as_deref(), Some("Add two integers"));
        let params = add.parameters();
        assert_eq!(params.len(), 2);
        assert!(params.iter().all(|p| !p.has_default));
        assert_eq!(
            ParamType::from_declared(params[0].declared_type.as_deref().unwrap()),
            ParamType::Integer
        );

        let result = add.call(args(json!({"a": 2, "b": 3}))).await;
        assert_eq!(result, Ok(json!(5)));
    }

    #[tokio::test]
    async fn typed_fn_callable_reports_handler_error() {
        let div = FnCallable::new("div", |a: AddArgs| async move {
            if a.b == 0 {
                Err("division by zero")
            } else {
                Ok(a.a / a.b)
            }
        });
        let result = div.call(args(json!({"a": 1, "b": 0}))).await;
        assert_eq!(result, Err("division by zero".into()));
    }

    #[tokio::test]
    async fn typed_fn_callable_rejects_mismatched_args() {
        let add = FnCallable::new("add", |a: AddArgs| async move { Ok::<_, String>(a.a + a.b) });
        let result = add.call(args(json!({"a": 1}))).await;
        assert!(result.unwrap_err().contains("do not match"));
    }

    #[tokio::test]
    async fn untyped_fn_callable_keeps_explicit_params() {
        let echo = FnCallable::with_params(
            "echo",
            vec![ParamDescriptor::untyped("text")],
            |args: Arguments| async move { Ok(args.get("text").cloned().unwrap_or(Value::Null)) },
        );
        assert_eq!(echo.parameters(), vec![ParamDescriptor::untyped("text")]);
        assert_eq!(echo.call(args(json!({"text": "hi"}))).await, Ok(json!("hi")));
    }

    #[tokio::test]
    async fn blocking_fn_runs_on_blocking_pool() {
        let sum = BlockingFn::new("sum", |a: AddArgs| Ok::<_, String>(a.a + a.b));
        assert_eq!(sum.call(args(json!({"a": 4, "b": 5}))).await, Ok(json!(9)));
    }

    #[tokio::test]
    async fn blocking_fn_panic_becomes_error() {
        let boom = BlockingFn::with_params("boom", vec![], |_args: Arguments| -> Result<Value, String> {
            panic!("kaboom")
        });
        let err = boom.call(Arguments::new()).await.unwrap_err();
        assert!(err.contains("panicked"));
    }
}
