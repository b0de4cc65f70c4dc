//! MCP Server
//!
//! Serves a [`ToolRegistry`] as newline-delimited JSON-RPC 2.0. Tool calls run
//! concurrently, one task each; every response goes through a single writer
//! task so frames never interleave.

use std::collections::HashMap;
use std::io::{self, BufRead};
use std::sync::Arc;

use anyhow::Context as _;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::BridgeError;
use crate::protocol::{
    CallToolParams, CancelledParams, InitializeResult, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, ServerCapabilities, ServerInfo, ToolsCapability, INTERNAL_ERROR,
    INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR, PROTOCOL_VERSION,
};
use crate::registry::{CallContext, ToolRegistry};

type InFlight = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Lines buffered between the reader and the serve loop
const LINE_BUFFER: usize = 64;

/// MCP Server over a pair of byte streams
pub struct McpServer {
    registry: Arc<ToolRegistry>,
    initialized: bool,
    in_flight: InFlight,
}

impl McpServer {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            initialized: false,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run the server on stdin/stdout until EOF or `shutdown`
    pub async fn run(&mut self, shutdown: CancellationToken) -> anyhow::Result<()> {
        // Not the blocking pool: a read pending there outlives shutdown
        let (line_tx, lines) = mpsc::channel(LINE_BUFFER);
        std::thread::Builder::new()
            .name("mcp-stdin".to_string())
            .spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    if line_tx.blocking_send(line).is_err() {
                        break;
                    }
                }
            })
            .context("Failed to spawn stdin reader")?;

        self.serve_lines(lines, tokio::io::stdout(), shutdown).await
    }

    /// Serve requests read from `reader`, answering on `writer`.
    ///
    /// On EOF in-flight calls finish and are answered. On `shutdown` they are
    /// cancelled instead.
    pub async fn serve<R, W>(
        &mut self,
        reader: R,
        writer: W,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (line_tx, lines) = mpsc::channel(LINE_BUFFER);
        let reader_task = tokio::spawn(async move {
            let mut reader = BufReader::new(reader).lines();
            loop {
                match reader.next_line().await {
                    Ok(Some(line)) => {
                        if line_tx.send(Ok(line)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        // The serve loop may already be gone
                        let _ = line_tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });

        let result = self.serve_lines(lines, writer, shutdown).await;
        reader_task.abort();
        result
    }

    async fn serve_lines<W>(
        &mut self,
        mut lines: mpsc::Receiver<io::Result<String>>,
        writer: W,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(resp) = rx.recv().await {
                let resp_str = serde_json::to_string(&resp)?;
                debug!("Sending: {}", resp_str);
                writer.write_all(resp_str.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            anyhow::Ok(())
        });

        let mut calls = JoinSet::new();

        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                line = lines.recv() => line,
            };

            let Some(line) = line else {
                // EOF - client disconnected
                info!("Client disconnected");
                break;
            };
            let line = line?;

            let message = line.trim();
            if message.is_empty() {
                continue;
            }

            debug!("Received: {}", message);
            self.handle_message(message, &tx, &mut calls, &shutdown).await;

            // Reap finished calls so the set does not grow unbounded
            while calls.try_join_next().is_some() {}
        }

        while calls.join_next().await.is_some() {}
        drop(tx);
        writer_task.await??;

        Ok(())
    }

    /// Handle a single JSON-RPC message
    async fn handle_message(
        &mut self,
        message: &str,
        tx: &mpsc::UnboundedSender<JsonRpcResponse>,
        calls: &mut JoinSet<()>,
        shutdown: &CancellationToken,
    ) {
        let request: JsonRpcRequest = match serde_json::from_str(message) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let message = format!("Parse error: {}", e);
                send(tx, JsonRpcResponse::error(None, PARSE_ERROR, message));
                return;
            }
        };

        let id = request.id.clone();

        if request.jsonrpc != "2.0" {
            warn!("Unsupported jsonrpc version: {}", request.jsonrpc);
            if id.is_some() {
                send(
                    tx,
                    JsonRpcResponse::error(
                        id,
                        INVALID_REQUEST,
                        format!("Unsupported jsonrpc version: {}", request.jsonrpc),
                    ),
                );
            }
            return;
        }

        // Handle notifications (no id means no response expected)
        if id.is_none() {
            self.handle_notification(&request.method, request.params).await;
            return;
        }

        if request.method == "tools/call" {
            self.spawn_call(id, request.params, tx, calls, shutdown).await;
            return;
        }

        let response = match self.handle_request(&request.method, request.params) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err((code, message)) => JsonRpcResponse::error(id, code, message),
        };
        send(tx, response);
    }

    /// Handle a notification (no response expected)
    async fn handle_notification(&mut self, method: &str, params: Option<Value>) {
        match method {
            "notifications/initialized" => {
                info!("Client initialized");
                self.initialized = true;
            }
            "notifications/cancelled" => {
                let params: Option<CancelledParams> =
                    params.and_then(|p| serde_json::from_value(p).ok());
                let Some(params) = params else {
                    warn!("Malformed cancellation notification");
                    return;
                };

                let key = request_key(&params.request_id);
                match self.in_flight.lock().await.remove(&key) {
                    Some(token) => {
                        debug!("Cancelling request {}", key);
                        token.cancel();
                    }
                    None => debug!("Cancellation for unknown request {}", key),
                }
            }
            _ => {
                debug!("Unknown notification: {}", method);
            }
        }
    }

    /// Handle a request that is answered inline
    fn handle_request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, (i32, String)> {
        match method {
            "initialize" => self.handle_initialize(params),
            "tools/list" => self.handle_list_tools(),
            "ping" => Ok(json!({})),
            _ => {
                warn!("Unknown method: {}", method);
                Err((METHOD_NOT_FOUND, format!("Method not found: {}", method)))
            }
        }
    }

    /// Handle the initialize request
    fn handle_initialize(&mut self, _params: Option<Value>) -> Result<Value, (i32, String)> {
        info!("Initializing MCP server");

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: ServerInfo {
                name: self.registry.name().to_string(),
                version: self.registry.version().to_string(),
            },
        };

        serde_json::to_value(result)
            .map_err(|e| (INTERNAL_ERROR, format!("Serialization error: {}", e)))
    }

    /// Handle the tools/list request
    fn handle_list_tools(&self) -> Result<Value, (i32, String)> {
        let tools = self.registry.tools().map(|t| t.to_tool()).collect();
        let result = ListToolsResult { tools };

        serde_json::to_value(result)
            .map_err(|e| (INTERNAL_ERROR, format!("Serialization error: {}", e)))
    }

    /// Start a tools/call request on its own task
    async fn spawn_call(
        &mut self,
        id: Option<Value>,
        params: Option<Value>,
        tx: &mpsc::UnboundedSender<JsonRpcResponse>,
        calls: &mut JoinSet<()>,
        shutdown: &CancellationToken,
    ) {
        let params: CallToolParams = match params.map(serde_json::from_value) {
            Some(Ok(p)) => p,
            Some(Err(e)) => {
                let message = format!("Invalid params: {}", e);
                send(tx, JsonRpcResponse::error(id, INVALID_PARAMS, message));
                return;
            }
            None => {
                let message = "Missing params".to_string();
                send(tx, JsonRpcResponse::error(id, INVALID_PARAMS, message));
                return;
            }
        };

        if !self.initialized {
            debug!("tools/call for {} before client initialized", params.name);
        }

        let key = id.as_ref().map(request_key).unwrap_or_default();
        let token = shutdown.child_token();
        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight.contains_key(&key) {
                warn!("Request id {} is already in flight", key);
                let message = format!("Request id {} is already in flight", key);
                send(tx, JsonRpcResponse::error(id, INVALID_REQUEST, message));
                return;
            }
            in_flight.insert(key.clone(), token.clone());
        }

        let registry = Arc::clone(&self.registry);
        let in_flight = Arc::clone(&self.in_flight);
        let tx = tx.clone();

        calls.spawn(async move {
            info!("Calling tool: {}", params.name);
            let ctx = CallContext::with_token(token);
            let result = registry.call(ctx, &params.name, params.arguments).await;
            in_flight.lock().await.remove(&key);

            let response = match result {
                Ok(result) => match serde_json::to_value(result) {
                    Ok(value) => JsonRpcResponse::success(id, value),
                    Err(e) => {
                        let message = format!("Serialization error: {}", e);
                        JsonRpcResponse::error(id, INTERNAL_ERROR, message)
                    }
                },
                Err(BridgeError::Cancelled) => {
                    // A cancelled request gets no response
                    debug!("Request {} cancelled", key);
                    return;
                }
                Err(e) => {
                    warn!("Tool call {} failed: {}", params.name, e);
                    JsonRpcResponse::error(id, INVALID_PARAMS, e.to_string())
                }
            };
            send(&tx, response);
        });
    }
}

fn send(tx: &mpsc::UnboundedSender<JsonRpcResponse>, response: JsonRpcResponse) {
    if tx.send(response).is_err() {
        warn!("Writer closed, dropping response");
    }
}

/// Stable map key for a JSON-RPC id
fn request_key(id: &Value) -> String {
    id.to_string()
}
