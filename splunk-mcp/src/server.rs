//! MCP server over stdio.
//!
//! Speaks line-delimited JSON-RPC 2.0: one request per input line, one
//! response per output line. Requests are handled concurrently and responses
//! are written as they complete, so a slow search does not block `ping`.
//! Notifications (requests without an `id`) never get a reply.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use splunk_mcp_core::session::SearchTransport;
use splunk_mcp_core::{Result, SplunkMcpError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::tools::{ToolDispatcher, resource_definitions, tool_definitions};

/// MCP protocol revision implemented here.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Name reported in `initialize`.
pub const SERVER_NAME: &str = "splunk-mcp-server";

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Input line was not valid JSON.
pub const PARSE_ERROR: i32 = -32700;
/// JSON was not a valid JSON-RPC 2.0 request.
pub const INVALID_REQUEST: i32 = -32600;
/// Method is not part of the MCP surface served here.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Missing or unknown tool name, or missing resource URI.
pub const INVALID_PARAMS: i32 = -32602;
/// A response could not be encoded.
pub const INTERNAL_ERROR: i32 = -32603;

/// A JSON-RPC 2.0 request or notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Must be `"2.0"`
    #[serde(default)]
    pub jsonrpc: String,
    /// Absent for notifications
    #[serde(default)]
    pub id: Option<Value>,
    /// MCP method, e.g. `tools/call`
    pub method: String,
    /// Method parameters; `null` when omitted
    #[serde(default)]
    pub params: Value,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`
    pub jsonrpc: String,
    /// Id of the request answered; `null` for parse errors
    pub id: Option<Value>,
    /// Set on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Set on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// Error member of a [`JsonRpcResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// One of the JSON-RPC error codes above
    pub code: i32,
    /// Human-readable description
    pub message: String,
}

impl JsonRpcResponse {
    /// Successful reply carrying `result`.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error reply with `code` and `message`.
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Renders a tool document as a single MCP text block.
fn text_content(document: &Value) -> Value {
    let text = serde_json::to_string_pretty(document).unwrap_or_else(|_| document.to_string());
    let is_error = document.get("status").and_then(Value::as_str) == Some("error");
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error,
    })
}

/// MCP request handler bound to one tool dispatcher.
pub struct McpServer<T: SearchTransport> {
    tools: ToolDispatcher<T>,
}

impl<T: SearchTransport> Clone for McpServer<T> {
    fn clone(&self) -> Self {
        Self {
            tools: self.tools.clone(),
        }
    }
}

impl<T: SearchTransport + 'static> McpServer<T> {
    /// Creates a server answering with `tools`.
    pub fn new(tools: ToolDispatcher<T>) -> Self {
        Self { tools }
    }

    /// Tool dispatcher behind `tools/call` and `resources/read`.
    pub fn tools(&self) -> &ToolDispatcher<T> {
        &self.tools
    }

    /// Handles one input line. Returns `None` when no reply is due.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable JSON-RPC message");
                Some(JsonRpcResponse::error(
                    None,
                    PARSE_ERROR,
                    format!("Parse error: {}", e),
                ))
            }
        }
    }

    /// Dispatches a parsed request. Returns `None` for notifications.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        tracing::debug!(method = %request.method, "MCP request received");

        let Some(id) = request.id else {
            tracing::debug!(method = %request.method, "Notification received");
            return None;
        };
        let id = Some(id);

        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                id,
                INVALID_REQUEST,
                "jsonrpc must be \"2.0\"",
            ));
        }

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, Self::initialize_result()),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, json!({ "tools": tool_definitions() })),
            "tools/call" => self.call_tool(id, &request.params).await,
            "resources/list" => {
                JsonRpcResponse::success(id, json!({ "resources": resource_definitions() }))
            }
            "resources/read" => self.read_resource(id, &request.params),
            other => {
                tracing::warn!(method = other, "Unknown MCP method");
                JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {}", other))
            }
        };
        Some(response)
    }

    fn initialize_result() -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {},
                "resources": {},
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": SERVER_VERSION,
            },
        })
    }

    async fn call_tool(&self, id: Option<Value>, params: &Value) -> JsonRpcResponse {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return JsonRpcResponse::error(id, INVALID_PARAMS, "Missing tool name");
        };
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

        match self.tools.call(name, &arguments).await {
            Ok(document) => JsonRpcResponse::success(id, text_content(&document)),
            Err(unknown) => JsonRpcResponse::error(id, INVALID_PARAMS, unknown.to_string()),
        }
    }

    fn read_resource(&self, id: Option<Value>, params: &Value) -> JsonRpcResponse {
        let Some(uri) = params.get("uri").and_then(Value::as_str) else {
            return JsonRpcResponse::error(id, INVALID_PARAMS, "Missing resource uri");
        };
        let document = self.tools.read_resource(uri).unwrap_or_else(|e| {
            tracing::error!(uri, error = %e, "Error reading resource");
            json!({ "error": e.to_string() })
        });
        let text = serde_json::to_string_pretty(&document).unwrap_or_else(|_| document.to_string());
        JsonRpcResponse::success(
            id,
            json!({
                "contents": [{
                    "uri": uri,
                    "mimeType": "application/json",
                    "text": text,
                }],
            }),
        )
    }

    /// Serves requests from `reader` until end of input.
    ///
    /// Requests in flight at end of input are completed and answered before
    /// returning.
    ///
    /// # Errors
    /// Returns an I/O error if reading input or writing a response fails.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (sender, mut replies) = mpsc::unbounded_channel::<String>();
        let mut in_flight = JoinSet::new();
        let mut lines = reader.lines();

        tracing::info!("MCP server ready on stdio");
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let line = line.map_err(|e| SplunkMcpError::Io {
                        context: "Failed to read MCP input".to_string(),
                        source: e,
                    })?;
                    let Some(line) = line else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let server = self.clone();
                    let sender = sender.clone();
                    in_flight.spawn(async move {
                        if let Some(reply) = server.handle_line(&line).await {
                            server.enqueue(&sender, &reply);
                        }
                    });
                }
                Some(reply) = replies.recv() => write_line(&mut writer, &reply).await?,
                Some(joined) = in_flight.join_next() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Request handler failed");
                    }
                }
            }
        }

        drop(sender);
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Request handler failed");
            }
        }
        while let Some(reply) = replies.recv().await {
            write_line(&mut writer, &reply).await?;
        }
        tracing::info!("MCP input closed");
        Ok(())
    }

    fn enqueue(&self, sender: &mpsc::UnboundedSender<String>, reply: &JsonRpcResponse) {
        let encoded = serde_json::to_string(reply).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to encode response");
            let fallback = JsonRpcResponse::error(reply.id.clone(), INTERNAL_ERROR, "Internal error");
            serde_json::to_string(&fallback).unwrap_or_default()
        });
        if sender.send(encoded).is_err() {
            tracing::warn!("Response dropped after output closed");
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    let io_error = |e| SplunkMcpError::Io {
        context: "Failed to write MCP response".to_string(),
        source: e,
    };
    writer.write_all(line.as_bytes()).await.map_err(io_error)?;
    writer.write_all(b"\n").await.map_err(io_error)?;
    writer.flush().await.map_err(io_error)
}
