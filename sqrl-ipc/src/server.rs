//! JSON-RPC 2.0 server over a Unix domain socket (§4.G): accept loop,
//! per-connection framing, dispatch table, and graceful shutdown.

use crate::error::{Error, Result};
use crate::handlers::{self, AppState};
use crate::jsonrpc::{self, Request, Response};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Default socket path from §4.G / §6, overridable via `SQRL_SOCKET_PATH`
/// or the `serve --socket` flag.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/sqrl_agent.sock";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
        }
    }
}

/// Dispatches one parsed request to its handler (§4.H). Unknown methods
/// surface as `-32601`; handler errors are mapped through
/// `Error::json_rpc_code` (§7 "Propagation policy").
async fn dispatch(state: &AppState, method: &str, params: Value) -> std::result::Result<Value, Error> {
    match method {
        "embed_text" => handlers::embed_text(state, params).await,
        "ingest_chunk" => handlers::ingest_chunk(state, params).await,
        "compose_context" => handlers::compose_context(state, params).await,
        "search_memories" => handlers::search_memories(state, params).await,
        "evaluate_memories" => handlers::evaluate_memories(state, params).await,
        other => Err(Error::Core(sqrl_core::Error::InvalidInput(format!(
            "unknown method: {other}"
        )))),
    }
}

/// Builds the JSON-RPC response for one line of input, or `None` when the
/// line was a well-formed notification (no `id`) whose handler succeeded —
/// notifications never produce a response, even on error, per §4.G/§7.
async fn handle_line(state: &AppState, line: &str) -> Option<Response> {
    let Some(request) = jsonrpc::parse_request(line) else {
        tracing::debug!(line, "failed to parse request as JSON-RPC");
        return Some(Response::parse_error("invalid JSON-RPC request"));
    };

    if request.jsonrpc != jsonrpc::JSONRPC_VERSION {
        return Some(Response::error(
            request.id,
            jsonrpc::INVALID_REQUEST,
            "unsupported jsonrpc version",
            None,
        ));
    }

    let is_notification = request.id.is_none();

    if !KNOWN_METHODS.contains(&request.method.as_str()) {
        if is_notification {
            return None;
        }
        return Some(Response::error(
            request.id,
            jsonrpc::METHOD_NOT_FOUND,
            format!("method not found: {}", request.method),
            None,
        ));
    }

    tracing::debug!(method = %request.method, id = ?request.id, "dispatching request");

    let outcome = dispatch(state, &request.method, request.params).await;

    if is_notification {
        return None;
    }

    Some(match outcome {
        Ok(value) => Response::success(request.id, value),
        Err(err) => {
            tracing::warn!(method = %request.method, error = %err, "handler returned an error");
            Response::error(request.id, err.json_rpc_code(), err.to_string(), None)
        }
    })
}

const KNOWN_METHODS: &[&str] = &[
    "embed_text",
    "ingest_chunk",
    "compose_context",
    "search_memories",
    "evaluate_memories",
];

/// Handles one client connection: reads LF-terminated JSON lines, dispatches
/// each concurrently, and writes responses back as they complete (§5
/// "responses are emitted... not necessarily the order they arrived").
async fn handle_connection(stream: UnixStream, state: Arc<AppState>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half).lines();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if write_half.write_all(b"\n").await.is_err() {
                break;
            }
            if write_half.flush().await.is_err() {
                break;
            }
        }
    });

    let mut in_flight = JoinSet::new();

    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let state = Arc::clone(&state);
                let tx = tx.clone();
                in_flight.spawn(async move {
                    if let Some(response) = handle_line(&state, &line).await {
                        if let Ok(serialized) = serde_json::to_string(&response) {
                            let _ = tx.send(serialized);
                        }
                    }
                });
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "error reading from connection");
                break;
            }
        }
    }

    // Cancellation point (§5): dropping the connection cancels in-flight
    // handler tasks at their next suspension point. On a clean EOF we
    // instead drain them so every already-accepted request still gets a
    // response.
    while in_flight.join_next().await.is_some() {}
    drop(tx);
    let _ = writer_task.await;
}

/// The IPC server: owns the listening socket for its lifetime and removes
/// the socket file on every exit path (§5 "scoped resource handling", §4.G
/// graceful shutdown).
pub struct IpcServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl IpcServer {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        IpcServer {
            config,
            state: Arc::new(state),
        }
    }

    /// Binds the socket, removing any stale file left by a previous run
    /// (§5 "conflicting files are unlinked on startup").
    fn bind(&self) -> Result<UnixListener> {
        if self.config.socket_path.exists() {
            std::fs::remove_file(&self.config.socket_path)?;
        }
        let listener = UnixListener::bind(&self.config.socket_path)?;
        Ok(listener)
    }

    /// Runs the accept loop until `shutdown` resolves, then stops accepting
    /// new connections, drains in-flight ones, and removes the socket file
    /// (§4.G, §5).
    pub async fn run(self, shutdown: impl std::future::Future<Output = ()>) -> Result<()> {
        let listener = self.bind()?;
        tracing::info!(socket_path = %self.config.socket_path.display(), "server started");

        tokio::pin!(shutdown);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            tracing::debug!("client connected");
                            let state = Arc::clone(&self.state);
                            connections.spawn(handle_connection(stream, state));
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "error accepting connection");
                        }
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("shutdown signal received, draining connections");
                    break;
                }
            }
        }

        drop(listener);
        while connections.join_next().await.is_some() {}

        if self.config.socket_path.exists() {
            std::fs::remove_file(&self.config.socket_path)?;
        }
        tracing::info!("server stopped");
        Ok(())
    }
}

/// Resolves a `tokio::select!`-able future that completes on SIGINT or
/// SIGTERM (§4.G).
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_socket_path_matches_spec() {
        assert_eq!(ServerConfig::default().socket_path, PathBuf::from("/tmp/sqrl_agent.sock"));
    }
}
