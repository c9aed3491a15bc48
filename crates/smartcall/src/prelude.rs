//! Convenience re-exports for common `smartcall` types.
//!
//! ```ignore
//! use smartcall::prelude::*;
//! ```
//!
//! Covers registering callables, dispatching calls, the adapter round trip,
//! formatting, and sessions. Cache internals and wire response types stay in
//! their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{ChatClient, ChatRequest, Message, ToolCall, ToolDef, json_schema_for};

// ── Dispatch ────────────────────────────────────────────────────────
pub use crate::dispatch::{
    Arguments, BlockingFn, CallContext, CallOutcome, CallRequest, CallSchema, Callable,
    Dispatcher, FnCallable, FunctionRegistry, ParamDescriptor, ParamType, RegisterOptions,
    validate,
};
pub use crate::error::{ErrorKind, RegistryError, ValidationError};

// ── Adapter & configuration ─────────────────────────────────────────
pub use crate::adapter::{AdapterReply, ChatBackend, FunctionCallingAdapter};
pub use crate::api::RetryConfig;
pub use crate::config::{AdapterConfig, DispatchConfig};

// ── Output & state ──────────────────────────────────────────────────
pub use crate::clock::{Clock, ManualClock, SharedClock, SystemClock, system_clock};
pub use crate::format::ResponseFormatter;
pub use crate::session::SessionTracker;

pub use schemars::JsonSchema;
pub use serde::Deserialize;
