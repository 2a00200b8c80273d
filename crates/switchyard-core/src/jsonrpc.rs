//! JSON-RPC 2.0 envelopes.
//!
//! Messages are decoded from untyped JSON rather than derived, because the
//! presence (not the value) of `id` and `method` decides the message kind.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

pub const JSONRPC_VERSION: &str = "2.0";

// Standard JSON-RPC error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

// Implementation-defined server errors
pub const SERVER_ERROR: i32 = -32000;
pub const SESSION_NOT_FOUND: i32 = -32001;

/// Request id: JSON-RPC allows strings and numbers. Numbers are kept as
/// received (fractional or beyond `i64`) so the reply echoes them exactly.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(Number),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<i32> for RequestId {
    fn from(n: i32) -> Self {
        Self::Number(i64::from(n).into())
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

/// JSON-RPC error object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(PARSE_ERROR, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal_error() -> Self {
        Self::new(INTERNAL_ERROR, "Internal error")
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(SERVER_ERROR, message)
    }

    pub fn session_not_found() -> Self {
        Self::new(SESSION_NOT_FOUND, "Session not found")
    }
}

/// A decoded JSON-RPC message.
#[derive(Clone, Debug, PartialEq)]
pub enum JsonRpcMessage {
    Request {
        id: RequestId,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    /// `id` is `None` when the error could not be tied to a request.
    Response {
        id: Option<RequestId>,
        outcome: Result<Value, JsonRpcError>,
    },
}

impl JsonRpcMessage {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self::Response {
            id: Some(id),
            outcome: Ok(result),
        }
    }

    pub fn failure(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self::Response {
            id,
            outcome: Err(error),
        }
    }

    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Self::Request {
            id: id.into(),
            method: method.into(),
            params: Some(params),
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification {
            method: method.into(),
            params,
        }
    }

    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request { id, .. } => Some(id),
            Self::Response { id, .. } => id.as_ref(),
            Self::Notification { .. } => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => Some(method),
            Self::Response { .. } => None,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request { .. })
    }

    /// Decode raw bytes. Unparsable JSON is a parse error; parsable JSON
    /// that is not a JSON-RPC message is an invalid request.
    pub fn parse(bytes: &[u8]) -> Result<Self, JsonRpcError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|_| JsonRpcError::parse_error("Invalid message"))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, JsonRpcError> {
        let Value::Object(mut obj) = value else {
            return Err(JsonRpcError::invalid_request("Message must be a JSON object"));
        };

        match obj.get("jsonrpc").and_then(Value::as_str) {
            Some(JSONRPC_VERSION) => {}
            _ => return Err(JsonRpcError::invalid_request("jsonrpc must be \"2.0\"")),
        }

        let params = match obj.remove("params") {
            None | Some(Value::Null) => None,
            Some(p @ (Value::Object(_) | Value::Array(_))) => Some(p),
            Some(_) => {
                return Err(JsonRpcError::invalid_request(
                    "params must be an object or array",
                ))
            }
        };

        if let Some(method) = obj.remove("method") {
            let Value::String(method) = method else {
                return Err(JsonRpcError::invalid_request("method must be a string"));
            };
            return match obj.remove("id") {
                None => Ok(Self::Notification { method, params }),
                Some(id) => Ok(Self::Request {
                    id: decode_id(id)?.ok_or_else(|| {
                        JsonRpcError::invalid_request("Request id must not be null")
                    })?,
                    method,
                    params,
                }),
            };
        }

        let id = decode_id(obj.remove("id").unwrap_or(Value::Null))?;
        if let Some(error) = obj.remove("error") {
            let error: JsonRpcError = serde_json::from_value(error)
                .map_err(|_| JsonRpcError::invalid_request("Malformed error object"))?;
            return Ok(Self::Response { id, outcome: Err(error) });
        }
        if let Some(result) = obj.remove("result") {
            return Ok(Self::Response { id, outcome: Ok(result) });
        }

        Err(JsonRpcError::invalid_request(
            "Message is neither a request, a notification nor a response",
        ))
    }

    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
        match self {
            Self::Request { id, method, params } => {
                obj.insert("id".into(), id_to_value(id));
                obj.insert("method".into(), Value::from(method.as_str()));
                if let Some(params) = params {
                    obj.insert("params".into(), params.clone());
                }
            }
            Self::Notification { method, params } => {
                obj.insert("method".into(), Value::from(method.as_str()));
                if let Some(params) = params {
                    obj.insert("params".into(), params.clone());
                }
            }
            Self::Response { id, outcome } => {
                obj.insert("id".into(), id.as_ref().map(id_to_value).unwrap_or(Value::Null));
                match outcome {
                    Ok(result) => {
                        obj.insert("result".into(), result.clone());
                    }
                    Err(error) => {
                        obj.insert(
                            "error".into(),
                            serde_json::to_value(error).unwrap_or(Value::Null),
                        );
                    }
                }
            }
        }
        Value::Object(obj)
    }
}

impl Serialize for JsonRpcMessage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

fn decode_id(value: Value) -> Result<Option<RequestId>, JsonRpcError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(RequestId::String(s))),
        Value::Number(n) => Ok(Some(RequestId::Number(n))),
        _ => Err(JsonRpcError::invalid_request("Request id must be a number or string")),
    }
}

fn id_to_value(id: &RequestId) -> Value {
    match id {
        RequestId::Number(n) => Value::Number(n.clone()),
        RequestId::String(s) => Value::from(s.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_request() {
        let msg = JsonRpcMessage::parse(
            br#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            JsonRpcMessage::Request {
                id: RequestId::from(1),
                method: "initialize".into(),
                params: Some(json!({})),
            }
        );
        assert!(msg.is_request());
    }

    #[test]
    fn parse_string_id() {
        let msg =
            JsonRpcMessage::parse(br#"{"jsonrpc":"2.0","id":"abc","method":"ping"}"#).unwrap();
        assert_eq!(msg.id(), Some(&RequestId::String("abc".into())));
        assert_eq!(msg.method(), Some("ping"));
    }

    #[test]
    fn missing_id_is_notification() {
        let msg = JsonRpcMessage::parse(
            br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        )
        .unwrap();
        assert!(matches!(msg, JsonRpcMessage::Notification { .. }));
        assert!(msg.id().is_none());
    }

    #[test]
    fn parse_client_response() {
        let msg =
            JsonRpcMessage::parse(br#"{"jsonrpc":"2.0","id":7,"result":{"ok":true}}"#).unwrap();
        assert_eq!(msg, JsonRpcMessage::success(RequestId::from(7), json!({"ok": true})));
    }

    #[test]
    fn garbage_is_parse_error() {
        let err = JsonRpcMessage::parse(b"{not json").unwrap_err();
        assert_eq!(err.code, PARSE_ERROR);
        assert_eq!(err.message, "Invalid message");
    }

    #[test]
    fn wrong_version_is_invalid_request() {
        let err = JsonRpcMessage::parse(br#"{"jsonrpc":"1.0","id":1,"method":"x"}"#).unwrap_err();
        assert_eq!(err.code, INVALID_REQUEST);
    }

    #[test]
    fn non_object_is_invalid_request() {
        assert_eq!(JsonRpcMessage::parse(b"[1,2]").unwrap_err().code, INVALID_REQUEST);
        assert_eq!(JsonRpcMessage::parse(b"42").unwrap_err().code, INVALID_REQUEST);
    }

    #[test]
    fn null_request_id_rejected() {
        let err =
            JsonRpcMessage::parse(br#"{"jsonrpc":"2.0","id":null,"method":"x"}"#).unwrap_err();
        assert_eq!(err.code, INVALID_REQUEST);
    }

    #[test]
    fn scalar_params_rejected() {
        let err = JsonRpcMessage::parse(br#"{"jsonrpc":"2.0","id":1,"method":"x","params":3}"#)
            .unwrap_err();
        assert_eq!(err.code, INVALID_REQUEST);
    }

    #[test]
    fn success_serializes_without_error() {
        let value = JsonRpcMessage::success(RequestId::from(1), json!({"a": 1})).to_value();
        assert_eq!(value, json!({"jsonrpc": "2.0", "id": 1, "result": {"a": 1}}));
    }

    #[test]
    fn failure_without_id_serializes_null_id() {
        let value = JsonRpcMessage::failure(None, JsonRpcError::session_not_found()).to_value();
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"]["code"], SESSION_NOT_FOUND);
        assert_eq!(value["error"]["message"], "Session not found");
        assert!(value["error"].get("data").is_none());
        assert!(value.get("result").is_none());
    }

    #[test]
    fn serialize_impl_matches_to_value() {
        let msg = JsonRpcMessage::notification("notifications/progress", Some(json!({"p": 1})));
        let text = serde_json::to_string(&msg).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, msg.to_value());
        assert!(back.get("id").is_none());
    }

    #[test]
    fn non_integer_ids_echo_unchanged() {
        let msg = JsonRpcMessage::parse(br#"{"jsonrpc":"2.0","id":1.5,"method":"ping"}"#).unwrap();
        let reply = JsonRpcMessage::success(msg.id().unwrap().clone(), json!({}));
        assert_eq!(reply.to_value()["id"], json!(1.5));

        let big = br#"{"jsonrpc":"2.0","id":18446744073709551615,"method":"ping"}"#;
        let msg = JsonRpcMessage::parse(big).unwrap();
        let reply = JsonRpcMessage::success(msg.id().unwrap().clone(), json!({}));
        assert_eq!(reply.to_value()["id"], json!(u64::MAX));
    }

    #[test]
    fn boolean_id_rejected() {
        let err =
            JsonRpcMessage::parse(br#"{"jsonrpc":"2.0","id":true,"method":"x"}"#).unwrap_err();
        assert_eq!(err.code, INVALID_REQUEST);
    }

    #[test]
    fn request_id_display() {
        assert_eq!(RequestId::from(5).to_string(), "5");
        assert_eq!(RequestId::from("x").to_string(), "x");
    }
}
