//! Provider API support.
//!
//! - [`retry`]: transient error detection (429, 5xx, network failures) and
//!   bounded exponential backoff around chat completion calls.

pub mod retry;

pub use retry::{RetryConfig, is_transient_error, retry_transient};
