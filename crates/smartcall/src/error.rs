//! Error types.
//!
//! Dispatch itself never returns `Err`: every failure becomes a
//! [`CallOutcome::Failed`](crate::dispatch::CallOutcome::Failed) tagged with an
//! [`ErrorKind`]. The typed errors here are what the individual stages
//! (registration, validation, argument decoding, session persistence) report
//! before the engine folds them into an outcome.

use crate::dispatch::schema::ParamType;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Category of a failed dispatch attempt.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No callable is registered under the requested name.
    UnknownFunction,
    /// The callable exists but its context requirements or cooldown block it.
    NotEligible,
    /// A required parameter is missing or a value could not be coerced.
    InvalidParameters,
    /// The callable itself returned an error or panicked.
    ExecutionError,
    /// The raw argument string was not a JSON object. Recovered by the
    /// engine (arguments become empty), so it never ends a dispatch.
    DecodeError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::UnknownFunction => "unknown_function",
            ErrorKind::NotEligible => "not_eligible",
            ErrorKind::InvalidParameters => "invalid_parameters",
            ErrorKind::ExecutionError => "execution_error",
            ErrorKind::DecodeError => "decode_error",
        };
        f.write_str(s)
    }
}

/// Parameter validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    #[error("invalid value for '{name}': expected {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: ParamType,
        found: String,
    },
}

/// Registration failure (strict mode only).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("a callable named '{0}' is already registered")]
    DuplicateName(String),
}

/// Raw call arguments that could not be decoded into a key/value object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed call arguments: {0}")]
pub struct DecodeError(pub String);

/// Session persistence failure.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session IO error: {0}")]
    Io(#[from] std::io::Error),
}
