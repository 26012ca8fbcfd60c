//! `CtxProxy`: the HTTP-accessible `ctx` surface for external scripts
//! (shell, PowerShell, arbitrary binaries) that can't call back into the
//! process directly (§4.9). A single-route `axum` server replaces the
//! source's reflection-based wsgi handler — here the wire envelope is a
//! closed [`CtxCommand`] enum, so an unrecognized request is a decode
//! error, not an arbitrary attribute lookup.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;

use super::error::ContextError;
use super::operation_context::OperationContext;

/// Environment variable a spawned script reads to find its proxy (§4.9).
pub const CTX_SOCKET_URL_VAR: &str = "CTX_SOCKET_URL";

/// The fixed request envelope — replaces the source's reflected
/// attribute/method dispatch (REDESIGN FLAGS).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CtxCommand {
    GetNodeAttribute { path: Vec<String> },
    SetNodeAttribute { path: Vec<String>, value: serde_json::Value },
    TaskAbort { message: String },
    TaskRetry { message: String, interval_ms: Option<u64> },
    DownloadResource { key: String },
    UploadResource { key: String, data: Vec<u8> },
    Log { level: String, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CtxResponse {
    Value { value: serde_json::Value },
    Ok,
    /// Materializes a script's `abort`/`retry` call as the distinguished
    /// exception the runner re-raises (§4.9).
    Abort { message: String },
    Retry { message: String, interval_ms: Option<u64> },
    Err { message: String },
}

struct ProxyState {
    ctx: Arc<OperationContext>,
    /// Enforces "`abort`/`retry` may be called at most once per task"
    /// (§4.9); a second call is answered with `ILLEGAL_CTX_OPERATION_MESSAGE`.
    terminal_called: AtomicBool,
}

const ILLEGAL_CTX_OPERATION_MESSAGE: &str =
    "abort or retry was already called for this task; a task may only end once";

async fn handle(
    State(state): State<Arc<ProxyState>>,
    Json(command): Json<CtxCommand>,
) -> Json<CtxResponse> {
    let response = match command {
        CtxCommand::GetNodeAttribute { path } => match state.ctx.node().await {
            Ok(node) => {
                let value = serde_json::to_value(&node.attributes).unwrap_or(serde_json::Value::Null);
                CtxResponse::Value {
                    value: resolve_path(&value, &path).unwrap_or(serde_json::Value::Null),
                }
            }
            Err(err) => CtxResponse::Err { message: err.to_string() },
        },
        CtxCommand::SetNodeAttribute { path, value } => match set_node_attribute(&state.ctx, &path, value).await {
            Ok(()) => CtxResponse::Ok,
            Err(err) => CtxResponse::Err { message: err.to_string() },
        },
        CtxCommand::TaskAbort { message } => {
            if state.terminal_called.swap(true, Ordering::SeqCst) {
                CtxResponse::Abort { message: ILLEGAL_CTX_OPERATION_MESSAGE.to_string() }
            } else {
                CtxResponse::Abort { message }
            }
        }
        CtxCommand::TaskRetry { message, interval_ms } => {
            if state.terminal_called.swap(true, Ordering::SeqCst) {
                CtxResponse::Abort { message: ILLEGAL_CTX_OPERATION_MESSAGE.to_string() }
            } else {
                CtxResponse::Retry { message, interval_ms }
            }
        }
        CtxCommand::DownloadResource { key } => match state.ctx.resource().download(&key).await {
            Ok(data) => CtxResponse::Value { value: serde_json::json!(data) },
            Err(err) => CtxResponse::Err { message: err.to_string() },
        },
        CtxCommand::UploadResource { key, data } => match state.ctx.resource().upload(&key, data).await {
            Ok(()) => CtxResponse::Ok,
            Err(err) => CtxResponse::Err { message: err.to_string() },
        },
        CtxCommand::Log { level, message } => {
            let span = state.ctx.logger();
            let _guard = span.enter();
            match level.as_str() {
                "error" => tracing::error!(%message, "script log"),
                "warn" => tracing::warn!(%message, "script log"),
                "debug" => tracing::debug!(%message, "script log"),
                _ => tracing::info!(%message, "script log"),
            }
            CtxResponse::Ok
        }
    };
    Json(response)
}

async fn set_node_attribute(
    ctx: &OperationContext,
    path: &[String],
    value: serde_json::Value,
) -> Result<(), ContextError> {
    let mut node = ctx.node().await.map_err(|_| ContextError::ResourceNotFound("node".into()))?;
    set_path(&mut node.attributes, path, value);
    ctx.model()
        .node()
        .update(node)
        .await
        .map_err(|_| ContextError::ResourceNotFound("node".into()))
}

fn resolve_path(value: &serde_json::Value, path: &[String]) -> Option<serde_json::Value> {
    path.iter().try_fold(value.clone(), |current, key| current.get(key).cloned())
}

fn set_path(map: &mut serde_json::Map<String, serde_json::Value>, path: &[String], value: serde_json::Value) {
    match path {
        [] => {}
        [only] => {
            map.insert(only.clone(), value);
        }
        [head, rest @ ..] => {
            let entry = map
                .entry(head.clone())
                .or_insert_with(|| serde_json::Value::Object(Default::default()));
            if let serde_json::Value::Object(nested) = entry {
                set_path(nested, rest, value);
            }
        }
    }
}

/// A bound ctx proxy server. Dropping the handle without calling
/// [`CtxProxy::shutdown`] leaves the server running until the process
/// exits — callers that spawn a child process should always shut it down
/// once the task ends.
pub struct CtxProxy {
    addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    join_handle: tokio::task::JoinHandle<()>,
}

impl CtxProxy {
    pub async fn bind(ctx: Arc<OperationContext>) -> Result<Self, ContextError> {
        let listener = TcpListener::bind("127.0.0.1:0").await.map_err(ContextError::Bind)?;
        let addr = listener.local_addr().map_err(ContextError::Bind)?;

        let state = Arc::new(ProxyState {
            ctx,
            terminal_called: AtomicBool::new(false),
        });
        let app = Router::new().route("/ctx", post(handle)).with_state(state);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join_handle = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(err) = server.await {
                tracing::error!(error = %err, "ctx proxy server exited with an error");
            }
        });

        Ok(Self {
            addr,
            shutdown_tx,
            join_handle,
        })
    }

    pub fn socket_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join_handle.await;
    }
}
