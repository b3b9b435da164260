use serde_json::{json, Value};
use thiserror::Error;

/// Numeric JSON-RPC error codes.
///
/// The standard JSON-RPC range plus the server-defined `-32000..` range. The
/// values are part of the wire contract and must never change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    NotImplemented,
    EmulatorRunning,
    InvalidAddress,
    InvalidValue,
    SnapshotFailed,
}

impl ErrorCode {
    pub const fn code(self) -> i64 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::NotImplemented => -32000,
            ErrorCode::EmulatorRunning => -32001,
            ErrorCode::InvalidAddress => -32002,
            ErrorCode::InvalidValue => -32003,
            ErrorCode::SnapshotFailed => -32004,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            -32700 => ErrorCode::ParseError,
            -32600 => ErrorCode::InvalidRequest,
            -32601 => ErrorCode::MethodNotFound,
            -32602 => ErrorCode::InvalidParams,
            -32603 => ErrorCode::InternalError,
            -32000 => ErrorCode::NotImplemented,
            -32001 => ErrorCode::EmulatorRunning,
            -32002 => ErrorCode::InvalidAddress,
            -32003 => ErrorCode::InvalidValue,
            -32004 => ErrorCode::SnapshotFailed,
            _ => return None,
        })
    }
}

/// Error object returned by tool handlers.
///
/// Serialized as `{"code": <i64>, "message": <string>}`; the presence of a
/// numeric `code` field is what distinguishes an error result from a success
/// result once a handler's output has been turned into JSON.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message} ({})", code.code())]
pub struct ToolError {
    pub code: ErrorCode,
    pub message: String,
}

impl ToolError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn to_value(&self) -> Value {
        json!({ "code": self.code.code(), "message": self.message })
    }
}

pub type ToolResult = Result<Value, ToolError>;

/// Returns the error code carried by a structured handler result, if any.
pub fn error_code_of(value: &Value) -> Option<i64> {
    value.get("code").and_then(Value::as_i64)
}

/// Error object used when a response cannot be built or serialized.
///
/// Kept as a static literal so emitting it requires no allocation on the
/// error path.
pub const FALLBACK_ERROR_JSON: &str = r#"{"code":-32603,"message":"Internal error: out of memory"}"#;

/// Full JSON-RPC response carrying [`FALLBACK_ERROR_JSON`].
pub const FALLBACK_RESPONSE_JSON: &str =
    r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error: out of memory"}}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let all = [
            (ErrorCode::ParseError, -32700),
            (ErrorCode::InvalidRequest, -32600),
            (ErrorCode::MethodNotFound, -32601),
            (ErrorCode::InvalidParams, -32602),
            (ErrorCode::InternalError, -32603),
            (ErrorCode::NotImplemented, -32000),
            (ErrorCode::EmulatorRunning, -32001),
            (ErrorCode::InvalidAddress, -32002),
            (ErrorCode::InvalidValue, -32003),
            (ErrorCode::SnapshotFailed, -32004),
        ];
        for (code, value) in all {
            assert_eq!(code.code(), value);
            assert_eq!(ErrorCode::from_code(value), Some(code));
        }
        assert_eq!(ErrorCode::from_code(-1), None);
    }

    #[test]
    fn fallback_literals_are_valid_json() {
        let err: Value = serde_json::from_str(FALLBACK_ERROR_JSON).expect("json");
        assert_eq!(error_code_of(&err), Some(-32603));

        let resp: Value = serde_json::from_str(FALLBACK_RESPONSE_JSON).expect("json");
        assert_eq!(resp["error"], err);
        assert!(resp["id"].is_null());
    }

    #[test]
    fn tool_error_serializes_code_and_message() {
        let err = ToolError::invalid_params("Checkpoint not found");
        assert_eq!(
            err.to_value(),
            json!({"code": -32602, "message": "Checkpoint not found"})
        );
        assert_eq!(err.to_string(), "Checkpoint not found (-32602)");
    }
}
