// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC 2.0 envelopes and MCP wire types.
//!
//! Everything that crosses the `/mcp` boundary — in either direction — is
//! defined here.  The frontend server and the per-instance client share
//! these types so proxied payloads round-trip without re-modeling.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol version advertised by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server name advertised by `initialize`.
pub const SERVER_NAME: &str = "brummer-mcp";

/// Session ID header carried by frontend clients.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

// -- JSON-RPC error codes ------------------------------------------------------

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const APPLICATION_ERROR: i64 = -32000;

// -- Envelopes -----------------------------------------------------------------

/// A JSON-RPC request ID: number or string. Absent ⇒ notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Num(i64),
    Str(String),
}

/// An incoming JSON-RPC 2.0 message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// A notification carries no ID and expects no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// An outgoing JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    /// `null` for responses to unparseable requests.
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn result(id: Option<RequestId>, result: Value) -> Self {
        Self { jsonrpc: "2.0".to_owned(), id: id_value(id), result: Some(result), error: None }
    }

    pub fn error(id: Option<RequestId>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_owned(),
            id: id_value(id),
            result: None,
            error: Some(JsonRpcError { code, message: message.into(), data: None }),
        }
    }
}

fn id_value(id: Option<RequestId>) -> Value {
    match id {
        Some(RequestId::Num(n)) => Value::from(n),
        Some(RequestId::Str(s)) => Value::from(s),
        None => Value::Null,
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An outgoing JSON-RPC notification (no ID).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: "2.0".to_owned(), method: method.into(), params }
    }
}

// -- Body parsing --------------------------------------------------------------

/// A parsed `/mcp` POST body: one message or a batch.
#[derive(Debug)]
pub enum IncomingBody {
    Single(Value),
    Batch(Vec<Value>),
}

/// Split a request body into individual raw messages.
///
/// Returns `Err` only for unparseable JSON (maps to `-32700` with a null
/// ID). Per-message validation happens later so a batch with one bad entry
/// still yields responses for the others.
pub fn parse_body(bytes: &[u8]) -> Result<IncomingBody, serde_json::Error> {
    let value: Value = serde_json::from_slice(bytes)?;
    match value {
        Value::Array(items) => Ok(IncomingBody::Batch(items)),
        other => Ok(IncomingBody::Single(other)),
    }
}

/// Validate one raw message as a JSON-RPC 2.0 request.
///
/// Anything without `jsonrpc: "2.0"` and a string method is rejected with
/// the raw ID (if salvageable) so the error response correlates.
pub fn validate_message(raw: &Value) -> Result<JsonRpcRequest, JsonRpcResponse> {
    let salvaged_id = raw.get("id").and_then(|v| match v {
        Value::Number(n) => n.as_i64().map(RequestId::Num),
        Value::String(s) => Some(RequestId::Str(s.clone())),
        _ => None,
    });

    let req: JsonRpcRequest = match serde_json::from_value(raw.clone()) {
        Ok(r) => r,
        Err(_) => {
            return Err(JsonRpcResponse::error(salvaged_id, INVALID_REQUEST, "Invalid Request"))
        }
    };
    if req.jsonrpc != "2.0" {
        return Err(JsonRpcResponse::error(salvaged_id, INVALID_REQUEST, "Invalid Request"));
    }
    Ok(req)
}

// -- MCP descriptor types ------------------------------------------------------

/// A tool as listed by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// A resource as listed by `resources/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A prompt as listed by `prompts/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// One entry of a `resources/read` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceContents {
    pub uri: String,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
