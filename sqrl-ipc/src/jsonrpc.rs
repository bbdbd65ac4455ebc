//! JSON-RPC 2.0 request/response envelope (§4.G, §6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    /// Absent `id` marks a notification: no response is produced, even on
    /// error (§4.G, §7 "user-visible behavior").
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    Result { result: Value },
    Error { error: RpcError },
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Response {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            payload: ResponsePayload::Result { result },
        }
    }

    pub fn error(id: Option<Value>, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Response {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            payload: ResponsePayload::Error {
                error: RpcError {
                    code,
                    message: message.into(),
                    data,
                },
            },
        }
    }

    /// Response for a request the server could not even parse as JSON
    /// (§4.G: `-32700 Parse error` with `id: null`).
    pub fn parse_error(message: impl Into<String>) -> Self {
        Response::error(None, PARSE_ERROR, message, None)
    }
}

/// Parses one line of input into a `Request`. Malformed JSON or a request
/// missing required fields surfaces as `None`, leaving the caller to emit
/// a `-32700` response.
pub fn parse_request(line: &str) -> Option<Request> {
    serde_json::from_str::<Request>(line).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_request() {
        let line = r#"{"jsonrpc":"2.0","id":1,"method":"embed_text","params":{"text":"hi"}}"#;
        let req = parse_request(line).expect("valid request");
        assert_eq!(req.method, "embed_text");
        assert_eq!(req.id, Some(Value::from(1)));
    }

    #[test]
    fn notification_has_no_id() {
        let line = r#"{"jsonrpc":"2.0","method":"embed_text","params":{}}"#;
        let req = parse_request(line).expect("valid request");
        assert_eq!(req.id, None);
    }

    #[test]
    fn garbage_input_fails_to_parse() {
        assert!(parse_request("not json").is_none());
    }

    #[test]
    fn parse_error_response_has_null_id() {
        let response = Response::parse_error("invalid JSON");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"]["code"], PARSE_ERROR);
    }

    #[test]
    fn success_response_serializes_result_not_error() {
        let response = Response::success(Some(Value::from(1)), serde_json::json!({"ok": true}));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["result"]["ok"], true);
        assert!(value.get("error").is_none());
    }
}
