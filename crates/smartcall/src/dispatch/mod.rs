//! Function dispatch engine.
//!
//! | Module | Role |
//! |--------|------|
//! | [`schema`] | Parameter descriptors to [`CallSchema`] synthesis |
//! | [`callable`] | The [`Callable`] trait and closure wrappers |
//! | [`registry`] | Registration, lookup, eligibility, invocation state |
//! | [`validate`] | Argument validation and type coercion |
//! | [`cache`] | Successful outcome cache |
//! | [`engine`] | The [`Dispatcher`] tying it all together |
//!
//! ```ignore
//! let registry = Arc::new(FunctionRegistry::new());
//! registry.register(add, RegisterOptions::new().priority(7))?;
//!
//! let dispatcher = Dispatcher::new(registry);
//! let tools = dispatcher.tool_defs(&context);
//! // ... send `tools` to the model, receive a call request ...
//! let outcome = dispatcher.dispatch(request, &context).await;
//! ```

pub mod cache;
pub mod callable;
pub mod context;
pub mod engine;
pub mod registry;
pub mod schema;
pub mod validate;

pub use cache::ResultCache;
pub use callable::{Arguments, BlockingFn, CallFuture, Callable, FnCallable};
pub use context::CallContext;
pub use engine::{CallOutcome, CallRequest, DispatchStage, Dispatcher, RawArguments};
pub use registry::{FunctionRegistry, RegisterOptions, RegistryEntry};
pub use schema::{CallSchema, ParamDescriptor, ParamSpec, ParamType};
pub use validate::validate;
