//! Configuration for the dispatch engine and the provider adapter.
//!
//! Both configs have sensible defaults; override with the builder methods.
//!
//! ```ignore
//! let dispatch = DispatchConfig::default()
//!     .with_strict_registration(true)
//!     .with_cache_capacity(Some(500));
//! let registry = Arc::new(dispatch.build_registry(system_clock()));
//! let dispatcher = dispatch.build_dispatcher(registry);
//!
//! let adapter = AdapterConfig::new("gpt-4o-mini")
//!     .with_max_tokens(512)
//!     .with_retries(4);
//! ```

use crate::api::retry::RetryConfig;
use crate::clock::SharedClock;
use crate::dispatch::cache::ResultCache;
use crate::dispatch::engine::{DEFAULT_PREVIEW_CHARS, Dispatcher};
use crate::dispatch::registry::FunctionRegistry;
use crate::{DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_TIMEOUT};
use std::sync::Arc;
use std::time::Duration;

// ── Dispatch ───────────────────────────────────────────────────────

/// Registry and dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Fail re-registration of an existing name instead of overwriting.
    pub strict_registration: bool,
    /// Maximum cached outcomes; `None` is unbounded.
    pub cache_capacity: Option<usize>,
    /// Characters of argument text shown in the per-call info log.
    pub log_preview_chars: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            strict_registration: false,
            cache_capacity: None,
            log_preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }
}

impl DispatchConfig {
    pub fn with_strict_registration(mut self, strict: bool) -> Self {
        self.strict_registration = strict;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: Option<usize>) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_log_preview_chars(mut self, chars: usize) -> Self {
        self.log_preview_chars = chars;
        self
    }

    /// An empty registry reading time from `clock`.
    pub fn build_registry(&self, clock: SharedClock) -> FunctionRegistry {
        FunctionRegistry::with_clock(clock).strict(self.strict_registration)
    }

    /// A dispatcher over `registry` with the configured cache.
    pub fn build_dispatcher(&self, registry: Arc<FunctionRegistry>) -> Dispatcher {
        let cache = match self.cache_capacity {
            Some(capacity) => ResultCache::with_capacity(capacity),
            None => ResultCache::new(),
        };
        Dispatcher::with_cache(registry, Arc::new(cache)).with_preview_chars(self.log_preview_chars)
    }
}

// ── Adapter ────────────────────────────────────────────────────────

/// Chat completion request settings for the function-calling adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterConfig {
    /// OpenAI-compatible chat completions URL.
    pub endpoint: String,
    pub model: String,
    /// 0 omits the field and lets the server decide.
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            model: DEFAULT_MODEL.into(),
            max_tokens: 1024,
            temperature: None,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }
}

impl AdapterConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Keep the default backoff but change how many retries follow the
    /// first attempt.
    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// HTTP client for the configured endpoint.
    pub fn build_client(&self, api_key: impl Into<String>) -> Result<crate::ChatClient, String> {
        crate::ChatClient::with_endpoint(api_key, self.endpoint.clone(), self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::dispatch::{Arguments, FnCallable, RegisterOptions};
    use crate::error::RegistryError;
    use serde_json::{Value, json};

    #[test]
    fn dispatch_defaults() {
        let config = DispatchConfig::default();
        assert!(!config.strict_registration);
        assert_eq!(config.cache_capacity, None);
        assert_eq!(config.log_preview_chars, 120);
    }

    #[test]
    fn strict_registry_from_config() {
        let config = DispatchConfig::default().with_strict_registration(true);
        let registry = config.build_registry(ManualClock::starting_now().shared());
        let noop = || FnCallable::with_params("f", vec![], |_a: Arguments| async move { Ok(Value::Null) });
        registry.register(noop(), RegisterOptions::new()).unwrap();
        assert_eq!(
            registry.register(noop(), RegisterOptions::new()).unwrap_err(),
            RegistryError::DuplicateName("f".into())
        );
    }

    #[tokio::test]
    async fn bounded_cache_from_config() {
        let config = DispatchConfig::default().with_cache_capacity(Some(1));
        let registry = Arc::new(config.build_registry(ManualClock::starting_now().shared()));
        registry
            .register(
                FnCallable::with_params(
                    "id",
                    vec![crate::dispatch::ParamDescriptor::required("v", "int")],
                    |a: Arguments| async move { Ok(a["v"].clone()) },
                ),
                RegisterOptions::new(),
            )
            .unwrap();
        let dispatcher = config.build_dispatcher(registry);
        let ctx = crate::dispatch::CallContext::new();
        dispatcher
            .dispatch(crate::dispatch::CallRequest::new("id", r#"{"v":1}"#), &ctx)
            .await;
        dispatcher
            .dispatch(crate::dispatch::CallRequest::new("id", r#"{"v":2}"#), &ctx)
            .await;
        assert_eq!(dispatcher.cache().len(), 1);
        assert_eq!(dispatcher.cache().capacity(), Some(1));
        let two = json!({"v": 2}).as_object().cloned().unwrap();
        assert!(dispatcher.cached("id", &two).is_some());
    }

    #[test]
    fn adapter_builders() {
        let config = AdapterConfig::new("local-model")
            .with_endpoint("http://localhost:8080/v1/chat/completions")
            .with_max_tokens(256)
            .with_temperature(0.2)
            .with_retries(5);
        assert_eq!(config.model, "local-model");
        assert_eq!(config.max_tokens, 256);
        assert_eq!(config.temperature, Some(0.2));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_secs(1));
    }
}
