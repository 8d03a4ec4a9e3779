//! Newline-delimited JSON-RPC over any `AsyncBufRead`/`AsyncWrite` pair.
//!
//! Stdout is the protocol channel when driven from `main`, so nothing
//! else may write to it while the loop runs.

use log::{debug, warn};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::mcp::{CallToolResult, ToolProvider};

const PROTOCOL_VERSION: &str = "2025-06-18";
const SERVER_NAME: &str = "mail-gateway";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

const PARSE_ERROR: i32 = -32700;
const INVALID_REQUEST: i32 = -32600;
const METHOD_NOT_FOUND: i32 = -32601;
const NOT_INITIALIZED: i32 = -32002;

/// Answers `initialize`, `ping`, `tools/list` and `tools/call`. Requests
/// other than `initialize` and `ping` are refused until the handshake is done.
pub struct McpServer<P: ToolProvider> {
    provider: P,
    initialized: bool,
}

impl<P: ToolProvider> McpServer<P> {
    pub fn new(provider: P) -> Self {
        McpServer {
            provider,
            initialized: false,
        }
    }

    /// Serves until `reader` reaches EOF.
    pub async fn run<R, W>(&mut self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let message: Value = match serde_json::from_str(line) {
                Ok(value) => value,
                Err(e) => {
                    warn!("-- unparseable request: {}", e);
                    let response = error_response(Value::Null, PARSE_ERROR, "Parse error");
                    write_response(&mut writer, &response).await?;
                    continue;
                }
            };

            if let Some(response) = self.handle(message).await {
                write_response(&mut writer, &response).await?;
            }
        }

        debug!("-- input closed, stopping");
        Ok(())
    }

    /// The response to one message, or `None` for notifications.
    async fn handle(&mut self, message: Value) -> Option<Value> {
        // Batches are not supported
        if !message.is_object() {
            return Some(error_response(Value::Null, INVALID_REQUEST, "Invalid request"));
        }
        let id = message.get("id").cloned();
        let Some(method) = message.get("method").and_then(Value::as_str) else {
            return id.map(|id| error_response(id, INVALID_REQUEST, "Invalid request"));
        };
        let params = message.get("params").cloned().unwrap_or_else(|| json!({}));
        debug!("-- {}", method);

        let result = match method {
            "initialize" => {
                self.initialized = true;
                Ok(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": { "listChanged": false } },
                    "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION }
                }))
            }
            "ping" => Ok(json!({})),
            method if method.starts_with("notifications/") => return None,
            _ if !self.initialized => Err((NOT_INITIALIZED, "Server not initialized".to_string())),
            "tools/list" => Ok(json!({ "tools": self.provider.list_tools() })),
            "tools/call" => Ok(self.call_tool(&params).await),
            other => Err((METHOD_NOT_FOUND, format!("Method not found: {other}"))),
        };

        // Requests without an id are notifications and get no answer
        let id = id?;
        Some(match result {
            Ok(result) => success_response(id, result),
            Err((code, message)) => error_response(id, code, &message),
        })
    }

    async fn call_tool(&self, params: &Value) -> Value {
        let name = params.get("name").and_then(Value::as_str).unwrap_or("");
        let args = params.get("arguments").cloned().unwrap_or(Value::Null);

        let result = match self.provider.call_tool(name, args).await {
            Ok(result) => result,
            Err(e) => {
                warn!("-- tool call rejected: {}", e);
                CallToolResult::error(e.to_string())
            }
        };
        serde_json::to_value(&result).unwrap_or(Value::Null)
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message
        }
    })
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &Value) -> std::io::Result<()> {
    let mut line = serde_json::to_string(response).map_err(std::io::Error::other)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
