//! `aria-task-runner`: the child process [`aria_durable::executor::SubprocessExecutor`]
//! spawns per task (§4.8). Reads its task id, dispatch function, and
//! arguments from the environment, reports `started`/`succeeded`/`failed`
//! back over the length-prefixed TCP wire protocol, and reaches the
//! engine's model through the HTTP `ctx` proxy (§4.9) rather than a direct
//! store handle — this process has none.
//!
//! The function dispatch table here is deliberately small: this crate
//! ships no real plugin ecosystem to resolve `function` against, so this
//! binary only demonstrates the wire protocol and the `ctx` round trip
//! with two illustrative operations. An embedding application replaces
//! `run_operation` with its own dispatch (e.g. loading installed plugin
//! entry points) while keeping the env var and framing contract as-is.

use std::env;

use aria_durable::context::{CtxCommand, CtxResponse, CTX_SOCKET_URL_VAR};
use aria_durable::executor::{write_frame, WireMessage, ARIA_ARGUMENTS_VAR, ARIA_FUNCTION_VAR, ARIA_TASK_ID_VAR, ARIA_WIRE_ADDR_VAR};
use tokio::net::TcpStream;
use uuid::Uuid;

enum RunnerOutcome {
    Succeeded(serde_json::Value),
    Aborted(String),
    Failed { message: String, retry_interval_ms: Option<u64> },
}

#[tokio::main]
async fn main() {
    let task_id: Uuid = env::var(ARIA_TASK_ID_VAR)
        .expect("ARIA_TASK_ID must be set")
        .parse()
        .expect("ARIA_TASK_ID must be a uuid");
    let wire_addr = env::var(ARIA_WIRE_ADDR_VAR).expect("ARIA_WIRE_ADDR must be set");
    let function = env::var(ARIA_FUNCTION_VAR).expect("ARIA_FUNCTION must be set");
    let arguments: serde_json::Value = env::var(ARIA_ARGUMENTS_VAR)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or(serde_json::Value::Object(Default::default()));
    let ctx_socket_url = env::var(CTX_SOCKET_URL_VAR).expect("CTX_SOCKET_URL must be set");

    let mut stream = TcpStream::connect(&wire_addr)
        .await
        .unwrap_or_else(|err| panic!("failed to connect to engine at {wire_addr}: {err}"));

    write_frame(&mut stream, &WireMessage::Started { task_id })
        .await
        .expect("failed to report task start");

    let outcome = run_operation(&function, arguments, &ctx_socket_url).await;

    let report = match outcome {
        RunnerOutcome::Succeeded(result) => WireMessage::Succeeded {
            task_id,
            result,
            tracked_changes: Vec::new(),
        },
        RunnerOutcome::Aborted(message) => WireMessage::Failed {
            task_id,
            message,
            is_abort: true,
            retry_interval_ms: None,
            tracked_changes: Vec::new(),
        },
        RunnerOutcome::Failed { message, retry_interval_ms } => WireMessage::Failed {
            task_id,
            message,
            is_abort: false,
            retry_interval_ms,
            tracked_changes: Vec::new(),
        },
    };

    let failed = matches!(report, WireMessage::Failed { .. });
    write_frame(&mut stream, &report).await.expect("failed to report task outcome");
    write_frame(&mut stream, &WireMessage::Closed { task_id })
        .await
        .expect("failed to report connection close");

    // Ensure the final frames are flushed to the kernel buffer before the
    // process exits and the socket is torn down.
    drop(stream);
    std::process::exit(if failed { 1 } else { 0 });
}

/// Resolves `function` against this process's small built-in dispatch
/// table. `ctx.echo` returns its arguments unchanged; `ctx.set_attribute`
/// writes `{"path": [...], "value": ...}` onto the task's node through the
/// ctx proxy; `ctx.task_abort` and `ctx.task_retry` issue the corresponding
/// `CtxCommand` so a script's abort/retry call reaches the engine exactly
/// as it would over the real `ctx` proxy (§4.9). Anything else fails as an
/// unrecognized operation.
async fn run_operation(function: &str, arguments: serde_json::Value, ctx_socket_url: &str) -> RunnerOutcome {
    match function {
        "ctx.echo" => RunnerOutcome::Succeeded(arguments),
        "ctx.set_attribute" => match set_attribute_from_arguments(arguments, ctx_socket_url).await {
            Ok(value) => RunnerOutcome::Succeeded(value),
            Err(message) => RunnerOutcome::Failed {
                message,
                retry_interval_ms: None,
            },
        },
        "ctx.task_abort" => task_abort_from_arguments(arguments, ctx_socket_url).await,
        "ctx.task_retry" => task_retry_from_arguments(arguments, ctx_socket_url).await,
        other => RunnerOutcome::Failed {
            message: format!("operation not found: {other}"),
            retry_interval_ms: None,
        },
    }
}

/// Takes `{"message": "..."}`, calls `ctx.task.abort(message)` over the
/// proxy, and maps the resulting `CtxResponse::Abort` onto
/// `RunnerOutcome::Aborted` — the real no-retry failure path (§4.9).
async fn task_abort_from_arguments(arguments: serde_json::Value, ctx_socket_url: &str) -> RunnerOutcome {
    let message = arguments
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or("aborted")
        .to_string();
    match ctx_call(ctx_socket_url, &CtxCommand::TaskAbort { message }).await {
        Ok(CtxResponse::Abort { message }) => RunnerOutcome::Aborted(message),
        Ok(other) => RunnerOutcome::Failed {
            message: format!("unexpected ctx response to task_abort: {other:?}"),
            retry_interval_ms: None,
        },
        Err(message) => RunnerOutcome::Failed {
            message,
            retry_interval_ms: None,
        },
    }
}

/// Takes `{"message": "...", "interval_ms": <number>?}`, calls
/// `ctx.task.retry(message, interval)` over the proxy, and maps the
/// resulting `CtxResponse::Retry` onto a retriable `RunnerOutcome::Failed`.
async fn task_retry_from_arguments(arguments: serde_json::Value, ctx_socket_url: &str) -> RunnerOutcome {
    let message = arguments
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or("retry")
        .to_string();
    let interval_ms = arguments.get("interval_ms").and_then(|v| v.as_u64());
    match ctx_call(ctx_socket_url, &CtxCommand::TaskRetry { message, interval_ms }).await {
        Ok(CtxResponse::Retry { message, interval_ms }) => RunnerOutcome::Failed { message, retry_interval_ms: interval_ms },
        Ok(CtxResponse::Abort { message }) => RunnerOutcome::Aborted(message),
        Ok(other) => RunnerOutcome::Failed {
            message: format!("unexpected ctx response to task_retry: {other:?}"),
            retry_interval_ms: None,
        },
        Err(message) => RunnerOutcome::Failed {
            message,
            retry_interval_ms: None,
        },
    }
}

async fn set_attribute_from_arguments(arguments: serde_json::Value, ctx_socket_url: &str) -> Result<serde_json::Value, String> {
    let path: Vec<String> = arguments
        .get("path")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .ok_or_else(|| "missing \"path\" argument".to_string())?;
    let value = arguments.get("value").cloned().unwrap_or(serde_json::Value::Null);

    let response = ctx_call(ctx_socket_url, &CtxCommand::SetNodeAttribute { path, value: value.clone() }).await?;
    match response {
        CtxResponse::Ok => Ok(value),
        CtxResponse::Err { message } => Err(message),
        other => Err(format!("unexpected ctx response: {other:?}")),
    }
}

async fn ctx_call(ctx_socket_url: &str, command: &CtxCommand) -> Result<CtxResponse, String> {
    let client = reqwest::Client::new();
    let url = format!("{ctx_socket_url}/ctx");
    client
        .post(&url)
        .json(command)
        .send()
        .await
        .map_err(|err| err.to_string())?
        .json::<CtxResponse>()
        .await
        .map_err(|err| err.to_string())
}
