//! Function-calling round trip against a chat completions backend.
//!
//! [`FunctionCallingAdapter::chat_with_functions`] offers the callables that
//! are eligible under the current context to the model, and when the model
//! asks for one, dispatches its first tool call through the engine.
//! Transport failures are retried with bounded backoff; if every attempt
//! fails the reply degrades to an `"Error: ..."` text instead of failing the
//! conversation.

use crate::api::retry::retry_transient;
use crate::config::AdapterConfig;
use crate::dispatch::{CallContext, CallOutcome, CallRequest, Dispatcher};
use crate::{ChatClient, ChatCompletion, ChatRequest, Message, ToolCall, ToolChoice};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, info, warn};

/// Boxed future returned by [`ChatBackend::complete`].
pub type BackendFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ChatCompletion, String>> + Send + 'a>>;

/// Anything that can answer a chat completion request.
///
/// [`ChatClient`] is the HTTP implementation; tests substitute a scripted
/// backend.
pub trait ChatBackend: Send + Sync {
    fn complete<'a>(&'a self, request: &'a ChatRequest) -> BackendFuture<'a>;
}

impl ChatBackend for ChatClient {
    fn complete<'a>(&'a self, request: &'a ChatRequest) -> BackendFuture<'a> {
        Box::pin(self.chat(request))
    }
}

/// What came back from one function-calling round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterReply {
    /// Model text, or `"Error: ..."` when the backend could not be reached.
    pub content: String,
    /// The tool call that was dispatched, if the model made one.
    pub call: Option<ToolCall>,
    /// Outcome of dispatching `call`.
    pub outcome: Option<CallOutcome>,
    /// Transport error that degraded this reply.
    pub error: Option<String>,
}

impl AdapterReply {
    fn degraded(error: String) -> Self {
        Self {
            content: format!("Error: {error}"),
            call: None,
            outcome: None,
            error: Some(error),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

/// Connects a chat backend to a [`Dispatcher`].
#[derive(Debug)]
pub struct FunctionCallingAdapter<B> {
    backend: B,
    dispatcher: Dispatcher,
    config: AdapterConfig,
}

impl<B: ChatBackend> FunctionCallingAdapter<B> {
    pub fn new(backend: B, dispatcher: Dispatcher, config: AdapterConfig) -> Self {
        Self {
            backend,
            dispatcher,
            config,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Build the request that offers the eligible callables to the model.
    pub fn build_request(&self, messages: Vec<Message>, context: &CallContext) -> ChatRequest {
        let tools = self.dispatcher.tool_defs(context);
        let offered = !tools.is_empty();
        ChatRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            tools: offered.then_some(tools),
            tool_choice: offered.then_some(ToolChoice::Auto),
        }
    }

    /// Send the conversation with eligible tool definitions and dispatch the
    /// first tool call the model returns.
    pub async fn chat_with_functions(
        &self,
        messages: Vec<Message>,
        context: &CallContext,
    ) -> AdapterReply {
        let request = self.build_request(messages, context);
        debug!(
            "[adapter] offering {} function(s) to {}",
            request.tools.as_ref().map_or(0, Vec::len),
            request.model
        );

        let backend = &self.backend;
        let request = &request;
        let completion =
            match retry_transient(&self.config.retry, "chat", || backend.complete(request)).await {
                Ok(c) => c,
                Err(e) => {
                    warn!("[adapter] chat failed: {e}");
                    return AdapterReply::degraded(e);
                }
            };

        let content = completion.content.unwrap_or_default();
        let Some(call) = completion.tool_calls.into_iter().next() else {
            return AdapterReply {
                content,
                call: None,
                outcome: None,
                error: None,
            };
        };

        info!("[adapter] model requested {}", call.function.name);
        let outcome = self
            .dispatcher
            .dispatch(CallRequest::from(&call), context)
            .await;

        AdapterReply {
            content,
            call: Some(call),
            outcome: Some(outcome),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RetryConfig;
    use crate::dispatch::{Arguments, FnCallable, FunctionRegistry, ParamDescriptor, RegisterOptions};
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Replays canned responses and records each request body.
    #[derive(Default)]
    struct Scripted {
        responses: Mutex<VecDeque<Result<ChatCompletion, String>>>,
        requests: Mutex<Vec<Value>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<ChatCompletion, String>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::default(),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl ChatBackend for Scripted {
        fn complete<'a>(&'a self, request: &'a ChatRequest) -> BackendFuture<'a> {
            self.requests
                .lock()
                .unwrap()
                .push(serde_json::to_value(request).unwrap());
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err("script exhausted".into()));
            Box::pin(async move { next })
        }
    }

    fn dispatcher() -> Dispatcher {
        let registry = Arc::new(FunctionRegistry::new());
        registry
            .register(
                FnCallable::with_params(
                    "add",
                    vec![
                        ParamDescriptor::required("a", "int"),
                        ParamDescriptor::required("b", "int"),
                    ],
                    |args: Arguments| async move {
                        Ok(json!(args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0)))
                    },
                ),
                RegisterOptions::new(),
            )
            .unwrap();
        registry
            .register(
                FnCallable::with_params("admin_only", vec![], |_args: Arguments| async move {
                    Ok(Value::Null)
                }),
                RegisterOptions::new().requires("admin"),
            )
            .unwrap();
        Dispatcher::new(registry)
    }

    fn config() -> AdapterConfig {
        AdapterConfig::default().with_retry(RetryConfig {
            initial_delay: Duration::ZERO,
            ..RetryConfig::default()
        })
    }

    fn tool_call_reply() -> ChatCompletion {
        ChatCompletion {
            content: Some("Let me add that.".into()),
            tool_calls: vec![ToolCall::function("call_1", "add", r#"{"a": 2, "b": 3}"#)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn dispatches_first_tool_call() {
        let adapter = FunctionCallingAdapter::new(
            Scripted::new(vec![Ok(tool_call_reply())]),
            dispatcher(),
            config(),
        );
        let reply = adapter
            .chat_with_functions(vec![Message::user("2+3?")], &CallContext::new())
            .await;

        assert_eq!(reply.content, "Let me add that.");
        assert_eq!(reply.call.as_ref().map(|c| c.function.name.as_str()), Some("add"));
        assert_eq!(reply.outcome.as_ref().and_then(|o| o.result()), Some(&json!(5)));
        assert!(!reply.is_degraded());
    }

    #[tokio::test]
    async fn offers_only_eligible_tools_with_auto_choice() {
        let backend = Scripted::new(vec![Ok(ChatCompletion::default())]);
        let adapter = FunctionCallingAdapter::new(backend, dispatcher(), config());
        let reply = adapter
            .chat_with_functions(vec![Message::user("hi")], &CallContext::new())
            .await;
        assert_eq!(reply.call, None);

        let sent = adapter.backend.requests.lock().unwrap()[0].clone();
        assert_eq!(sent["tool_choice"], "auto");
        let names: Vec<&str> = sent["tools"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["function"]["name"].as_str())
            .collect();
        assert_eq!(names, vec!["add"]);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let backend = Scripted::new(vec![
            Err("chat API HTTP 503 Service Unavailable: busy".into()),
            Ok(tool_call_reply()),
        ]);
        let adapter = FunctionCallingAdapter::new(backend, dispatcher(), config());
        let reply = adapter
            .chat_with_functions(vec![Message::user("2+3?")], &CallContext::new())
            .await;
        assert!(reply.outcome.is_some());
        assert_eq!(adapter.backend.request_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_degrade_to_error_text() {
        let backend = Scripted::new(vec![
            Err("request failed: timeout".into()),
            Err("request failed: timeout".into()),
            Err("request failed: timeout".into()),
        ]);
        let adapter = FunctionCallingAdapter::new(backend, dispatcher(), config());
        let reply = adapter
            .chat_with_functions(vec![Message::user("hi")], &CallContext::new())
            .await;
        assert!(reply.is_degraded());
        assert_eq!(reply.content, "Error: request failed: timeout");
        assert_eq!(adapter.backend.request_count(), 3);
    }

    #[tokio::test]
    async fn no_tools_means_no_tool_choice() {
        let adapter = FunctionCallingAdapter::new(
            Scripted::new(vec![]),
            Dispatcher::new(Arc::new(FunctionRegistry::new())),
            config(),
        );
        let request = adapter.build_request(vec![Message::user("hi")], &CallContext::new());
        assert!(request.tools.is_none());
        assert!(request.tool_choice.is_none());
    }
}
