//! Newline-delimited JSON-RPC 2.0 transport.
//!
//! One JSON object per line in both directions. Requests on a connection are
//! answered in order; a dedicated writer task owns the output half.

use std::io;

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::bridge::BridgeHandle;
use crate::error::{ErrorCode, ToolError, ToolResult, FALLBACK_RESPONSE_JSON};
use crate::params::parse_params;
use crate::registry;

/// Longest accepted request line, newline included.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("request line exceeds {MAX_LINE_BYTES} bytes")]
    LineTooLong,
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, Deserialize)]
struct ToolsCall {
    name: Option<String>,
    #[serde(default)]
    arguments: Value,
}

/// Routes JSON-RPC methods. Protocol methods are answered here; tools go
/// through the bridge.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    bridge: BridgeHandle,
}

impl Dispatcher {
    pub fn new(bridge: BridgeHandle) -> Self {
        Self { bridge }
    }

    pub async fn call(&self, method: &str, params: Value) -> ToolResult {
        match method {
            "initialize" => registry::initialize(params),
            "notifications/initialized" => Ok(Value::Null),
            "tools/list" => Ok(registry::tools_list()),
            "tools/call" => {
                let call: ToolsCall = parse_params(params)?;
                let name = call
                    .name
                    .ok_or_else(|| ToolError::invalid_params("Missing 'name' parameter"))?;
                let tool = registry::find(&name).map_err(|err| match err.code {
                    ErrorCode::MethodNotFound => ToolError::new(ErrorCode::MethodNotFound, "Tool not found"),
                    _ => err,
                })?;
                tracing::debug!(target: "vice.mcp", tool = tool.name, "tools/call");
                registry::call_envelope(self.bridge.call(tool, call.arguments).await)
            }
            _ => {
                let tool = registry::find(method)?;
                tracing::debug!(target: "vice.mcp", tool = tool.name, "dispatching");
                self.bridge.call(tool, params).await
            }
        }
    }

    /// Handles one request line. Returns the response object, or `None` for
    /// notifications.
    pub async fn handle_line(&self, line: &[u8]) -> Option<Value> {
        let request: Value = match serde_json::from_slice(line) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(target: "vice.mcp", error = %err, "unparseable request");
                return Some(error_response(
                    Value::Null,
                    &ToolError::new(ErrorCode::ParseError, "Parse error"),
                ));
            }
        };
        let Value::Object(mut request) = request else {
            return Some(invalid_request(Value::Null));
        };

        let id = request.remove("id");
        let Some(method) = request.get("method").and_then(Value::as_str).map(str::to_owned) else {
            return Some(invalid_request(id.unwrap_or(Value::Null)));
        };
        let params = request.remove("params").unwrap_or(Value::Null);

        let result = self.call(&method, params).await;
        let id = id?;
        Some(match result {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err(err) => error_response(id, &err),
        })
    }
}

fn error_response(id: Value, err: &ToolError) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": err.to_value() })
}

fn invalid_request(id: Value) -> Value {
    error_response(id, &ToolError::new(ErrorCode::InvalidRequest, "Invalid Request"))
}

/// Reads one `\n`-terminated line, without the terminator. A final line
/// without a newline is returned as-is at EOF.
async fn read_line_limited<R>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(if buf.is_empty() { None } else { Some(buf) });
        }

        let newline = available.iter().position(|&b| b == b'\n');
        let take = newline.map(|pos| pos + 1).unwrap_or(available.len());
        if buf.len() + take > max_len {
            return Err(TransportError::LineTooLong);
        }
        buf.extend_from_slice(&available[..take]);
        reader.consume(take);

        if newline.is_some() {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            return Ok(Some(buf));
        }
    }
}

fn encode(response: &Value) -> String {
    serde_json::to_string(response).unwrap_or_else(|err| {
        tracing::error!(target: "vice.mcp", error = %err, "failed to serialize response");
        FALLBACK_RESPONSE_JSON.to_owned()
    })
}

/// Serves one connection until EOF, an I/O error or an oversized line.
pub async fn serve_connection<R, W>(reader: R, writer: W, dispatcher: Dispatcher) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(mut line) = out_rx.recv().await {
            line.push('\n');
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
        }
        writer.shutdown().await?;
        Ok::<_, io::Error>(())
    });

    let mut reader = BufReader::new(reader);
    let outcome = loop {
        let line = match read_line_limited(&mut reader, MAX_LINE_BYTES).await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(TransportError::LineTooLong) => {
                tracing::warn!(target: "vice.mcp", limit = MAX_LINE_BYTES, "request too large; closing connection");
                let response = error_response(
                    Value::Null,
                    &ToolError::new(ErrorCode::InvalidRequest, "Request too large"),
                );
                let _ = out_tx.send(encode(&response));
                break Err(TransportError::LineTooLong);
            }
            Err(err) => break Err(err),
        };
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        if let Some(response) = dispatcher.handle_line(&line).await {
            if out_tx.send(encode(&response)).is_err() {
                break Ok(());
            }
        }
    };

    drop(out_tx);
    match writer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::debug!(target: "vice.mcp", error = %err, "writer closed");
        }
        Err(err) => {
            tracing::error!(target: "vice.mcp", error = %err, "writer task failed");
        }
    }
    outcome
}

/// Accepts connections forever, one task per connection.
pub async fn serve_tcp(listener: TcpListener, dispatcher: Dispatcher) -> Result<()> {
    tracing::info!(target: "vice.mcp", addr = %listener.local_addr()?, "listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            tracing::info!(target: "vice.mcp", %peer, "client connected");
            let (reader, writer) = stream.into_split();
            match serve_connection(reader, writer, dispatcher).await {
                Ok(()) => tracing::info!(target: "vice.mcp", %peer, "client disconnected"),
                Err(err) => tracing::warn!(target: "vice.mcp", %peer, error = %err, "connection closed"),
            }
        });
    }
}

/// Serves a single session over stdin/stdout.
pub async fn serve_stdio(dispatcher: Dispatcher) -> Result<()> {
    serve_connection(tokio::io::stdin(), tokio::io::stdout(), dispatcher).await
}
