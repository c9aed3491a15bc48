//! Demo CLI for the smartcall dispatch engine.
//!
//! Registers a handful of demo functions and either runs one function-calling
//! round trip against a chat completions endpoint, or dispatches a call
//! directly without a model. Reads the API key from `SMARTCALL_API_KEY`.
//!
//! # Examples
//!
//! ```sh
//! # Ask the model; it may call `add`
//! smartcall --message "What is 2 + 3?"
//!
//! # Admin-only functions become eligible with an `admin` context key
//! smartcall --message "Who are the users?" --context admin=true --template table
//!
//! # Show the tool definitions the model would receive
//! smartcall --list-tools --context admin=true
//!
//! # Dispatch directly, no model involved
//! smartcall --call add --args '{"a": 2, "b": "3"}'
//!
//! # Persist context and history across runs
//! smartcall --session ~/.smartcall/session.json --context admin=true --call list_users
//! ```

use chrono::Utc;
use clap::Parser;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use smartcall::adapter::FunctionCallingAdapter;
use smartcall::clock::system_clock;
use smartcall::config::{AdapterConfig, DispatchConfig};
use smartcall::dispatch::{
    Arguments, BlockingFn, CallContext, CallRequest, FnCallable, FunctionRegistry,
    ParamDescriptor, RegisterOptions,
};
use smartcall::error::RegistryError;
use smartcall::format::ResponseFormatter;
use smartcall::session::SessionTracker;
use smartcall::{DEFAULT_ENDPOINT, DEFAULT_MODEL, Message};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Dispatch LLM function calls against a set of demo functions.
#[derive(Parser)]
#[command(name = "smartcall")]
struct Cli {
    // ── Conversation ───────────────────────────────────────────
    /// User message to send to the model
    #[arg(long)]
    message: Option<String>,

    /// System prompt
    #[arg(long)]
    system: Option<String>,

    // ── Model ──────────────────────────────────────────────────
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// OpenAI-compatible chat completions URL
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    #[arg(long, default_value_t = 1024)]
    max_tokens: u32,

    #[arg(long)]
    temperature: Option<f32>,

    /// Retries after the first failed request
    #[arg(long, default_value_t = 2)]
    retries: u32,

    // ── Dispatch ───────────────────────────────────────────────
    /// Context fact as key=value (value parsed as JSON, else string). Repeatable.
    #[arg(long = "context", value_name = "KEY=VALUE")]
    context: Vec<String>,

    /// Response template: default, table, or error
    #[arg(long, default_value = "default")]
    template: String,

    /// Print the eligible tool definitions and exit
    #[arg(long)]
    list_tools: bool,

    /// Dispatch this function directly instead of asking the model
    #[arg(long)]
    call: Option<String>,

    /// JSON arguments for --call
    #[arg(long, requires = "call")]
    args: Option<String>,

    /// Reject duplicate function names at registration
    #[arg(long)]
    strict: bool,

    // ── Session ────────────────────────────────────────────────
    /// Session file; loaded if present, saved after the run
    #[arg(long)]
    session: Option<PathBuf>,
}

// ── Demo functions ─────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
struct AddArgs {
    /// First addend.
    a: i64,
    /// Second addend.
    b: i64,
}

fn register_demo_functions(registry: &FunctionRegistry) -> Result<(), RegistryError> {
    registry.register(
        FnCallable::new("add", |args: AddArgs| async move {
            args.a
                .checked_add(args.b)
                .ok_or_else(|| "integer overflow".to_string())
        })
        .describe("Add two integers"),
        RegisterOptions::new().priority(7),
    )?;

    registry.register(
        FnCallable::with_params("ping", vec![], |_args: Arguments| async move {
            Ok(json!({"reply": "pong", "at": Utc::now().to_rfc3339()}))
        })
        .describe("Check that the service is alive"),
        RegisterOptions::new().cooldown(Duration::from_secs(10)),
    )?;

    registry.register(
        FnCallable::with_params("list_users", vec![], |_args: Arguments| async move {
            Ok(json!([
                {"name": "ada", "role": "admin"},
                {"name": "grace", "role": "editor"},
                {"name": "linus", "role": "viewer"},
            ]))
        }),
        RegisterOptions::new()
            .description("List all user accounts")
            .priority(8)
            .requires("admin"),
    )?;

    registry.register(
        BlockingFn::with_params(
            "echo",
            vec![
                ParamDescriptor::untyped("text").describe("Text to repeat"),
                ParamDescriptor::optional("times", "u32").describe("Repetitions (default 1)"),
            ],
            echo,
        )
        .describe("Repeat a piece of text (at most 100 times)"),
        RegisterOptions::new().priority(2),
    )?;

    Ok(())
}

/// Upper bound on `echo` repetitions.
const MAX_ECHO_REPEATS: u64 = 100;

fn echo(args: Arguments) -> Result<Value, String> {
    let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
    let times = args.get("times").and_then(Value::as_u64).unwrap_or(1);
    if times > MAX_ECHO_REPEATS {
        return Err(format!("times must be at most {MAX_ECHO_REPEATS}, got {times}"));
    }
    let times = usize::try_from(times).map_err(|e| e.to_string())?;
    Ok(Value::String(vec![text; times].join(" ")))
}

// ── Helpers ────────────────────────────────────────────────────────

/// Parse `key=value` pairs. Values that parse as JSON keep their type.
fn parse_context(pairs: &[String]) -> Result<Map<String, Value>, String> {
    pairs
        .iter()
        .map(|pair| {
            let (key, raw) = pair
                .split_once('=')
                .ok_or_else(|| format!("invalid --context '{pair}', expected KEY=VALUE"))?;
            let value =
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            Ok((key.trim().to_string(), value))
        })
        .collect()
}

fn load_session(path: Option<&Path>) -> Result<SessionTracker, String> {
    let Some(path) = path.filter(|p| p.exists()) else {
        return Ok(SessionTracker::new());
    };
    let session =
        SessionTracker::load(path).map_err(|e| format!("failed to load session: {e}"))?;
    if session.is_expired() {
        info!("session {} expired, starting fresh", session.id());
        return Ok(SessionTracker::new().session_id(session.id()));
    }
    Ok(session)
}

async fn run(cli: &Cli) -> Result<String, String> {
    let mut session = load_session(cli.session.as_deref())?;
    let overrides = parse_context(&cli.context)?;
    if !overrides.is_empty() {
        session.merge(overrides);
    }
    let context = CallContext::from(session.state().clone());

    let dispatch_config = DispatchConfig::default().with_strict_registration(cli.strict);
    let registry = std::sync::Arc::new(dispatch_config.build_registry(system_clock()));
    register_demo_functions(&registry).map_err(|e| e.to_string())?;
    let dispatcher = dispatch_config.build_dispatcher(registry);
    let formatter = ResponseFormatter::new();

    if cli.list_tools {
        return serde_json::to_string_pretty(&dispatcher.tool_defs(&context))
            .map_err(|e| format!("failed to serialize tool definitions: {e}"));
    }

    let output = if let Some(name) = &cli.call {
        let request = CallRequest::new(name.clone(), cli.args.clone().unwrap_or_default());
        let outcome = dispatcher.dispatch(request.clone(), &context).await;
        session.record_call(&request, &outcome);
        formatter.mix(&format!("{name}:"), Some(&outcome), &cli.template)
    } else {
        let message = cli
            .message
            .as_deref()
            .ok_or("provide --message, --call, or --list-tools")?;
        let api_key = std::env::var("SMARTCALL_API_KEY")
            .map_err(|_| "SMARTCALL_API_KEY environment variable is not set".to_string())?;

        let mut adapter_config = AdapterConfig::new(cli.model.clone())
            .with_endpoint(cli.endpoint.clone())
            .with_max_tokens(cli.max_tokens)
            .with_retries(cli.retries);
        if let Some(t) = cli.temperature {
            adapter_config = adapter_config.with_temperature(t);
        }
        let client = adapter_config.build_client(api_key)?;
        let adapter = FunctionCallingAdapter::new(client, dispatcher, adapter_config);

        let mut messages = Vec::new();
        if let Some(sys) = &cli.system {
            messages.push(Message::system(sys));
        }
        messages.push(Message::user(message));
        session.add_to_history("user_message", json!({"text": message}));

        let reply = adapter.chat_with_functions(messages, &context).await;
        if let (Some(call), Some(outcome)) = (&reply.call, &reply.outcome) {
            session.record_call(&CallRequest::from(call), outcome);
        }
        session.add_to_history("assistant_message", json!({"text": reply.content}));
        formatter.mix(&reply.content, reply.outcome.as_ref(), &cli.template)
    };

    if let Some(path) = &cli.session {
        session
            .save(path)
            .map_err(|e| format!("failed to save session: {e}"))?;
    }
    Ok(output)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(&cli).await {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
