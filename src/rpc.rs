//! JSON-RPC 2.0 request/response plumbing (§3).
//!
//! `id` may be string, number, or null; a bare JSON array on the wire
//! denotes a batch. These types model the wire shape directly rather than
//! wrapping an external JSON-RPC crate, since the framing rules here
//! (batch-of-one-or-many, notification-yields-no-response, id echoing on
//! parse failure) are specific enough to the gateway's own dispatch loop
//! that a generic crate would fight more than it'd help.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC request id: string, number, or absent (a notification).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
    Null,
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A single JSON-RPC request object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// A request with no `id` is a notification — it must yield no
    /// response (§3: "notifications/initialized yields none").
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Either a single request or a batch — the wire accepts both.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RequestEnvelope {
    Single(JsonRpcRequest),
    Batch(Vec<JsonRpcRequest>),
}

impl RequestEnvelope {
    pub fn into_vec(self) -> Vec<JsonRpcRequest> {
        match self {
            Self::Single(r) => vec![r],
            Self::Batch(r) => r,
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }
}

/// A JSON-RPC error object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A single JSON-RPC response object: exactly one of `result`/`error`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: RequestId, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Either a single response or a batch, mirroring the shape of the request
/// that produced it (§4.9: "a single request yields the object, a batch
/// yields an array").
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum ResponseEnvelope {
    Single(JsonRpcResponse),
    Batch(Vec<JsonRpcResponse>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_has_no_id() {
        let req: JsonRpcRequest = serde_json::from_str(
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        )
        .unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn batch_detection() {
        let env: RequestEnvelope = serde_json::from_str(
            r#"[{"jsonrpc":"2.0","id":1,"method":"ping"},{"jsonrpc":"2.0","id":2,"method":"ping"}]"#,
        )
        .unwrap();
        assert!(env.is_batch());
        assert_eq!(env.into_vec().len(), 2);
    }

    #[test]
    fn single_request_is_not_a_batch() {
        let env: RequestEnvelope =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        assert!(!env.is_batch());
    }

    #[test]
    fn id_round_trips_string_and_number() {
        assert_eq!(
            serde_json::to_string(&RequestId::String("abc".to_string())).unwrap(),
            "\"abc\""
        );
        assert_eq!(serde_json::to_string(&RequestId::Number(7)).unwrap(), "7");
        assert_eq!(serde_json::to_string(&RequestId::Null).unwrap(), "null");
    }
}
