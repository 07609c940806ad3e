//! JSON-RPC wire message model
//!
//! One `Message` shape covers requests, notifications and responses;
//! classification happens after parsing. Null-valued fields are omitted on
//! encode.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ServerError;

pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
/// Generic "something threw while executing the call" code.
pub const INVOCATION_ERROR: i64 = -32000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    /// Optional diagnostic detail blob.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    /// Translate a local failure into a protocol-level error: the local code
    /// when the error carries one, otherwise the generic invocation error.
    pub fn from_server_error(err: &ServerError) -> Self {
        let code = match err {
            ServerError::MethodNotFound { .. } => METHOD_NOT_FOUND,
            ServerError::InvalidParams { .. } => INVALID_PARAMS,
            ServerError::Json(_) => PARSE_ERROR,
            _ => INVOCATION_ERROR,
        };
        Self {
            code,
            message: err.to_string(),
            data: Some(Value::String(format!("{err:?}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "protocol_version")]
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

fn protocol_version() -> String {
    "2.0".to_string()
}

/// A parsed inbound message, classified by shape.
#[derive(Debug)]
pub enum Incoming {
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    Response {
        id: Value,
        result: Option<Value>,
        error: Option<ResponseError>,
    },
}

impl Message {
    fn empty() -> Self {
        Self {
            jsonrpc: protocol_version(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }

    pub fn request(id: Value, method: &str, params: Option<Value>) -> Self {
        Self {
            id: Some(id),
            method: Some(method.to_string()),
            params,
            ..Self::empty()
        }
    }

    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self {
            method: Some(method.to_string()),
            params,
            ..Self::empty()
        }
    }

    pub fn response(id: Value, result: Option<Value>) -> Self {
        Self {
            id: Some(id),
            result,
            ..Self::empty()
        }
    }

    pub fn error_response(id: Value, error: ResponseError) -> Self {
        Self {
            id: Some(id),
            error: Some(error),
            ..Self::empty()
        }
    }

    pub fn classify(self) -> Result<Incoming, ServerError> {
        match (self.id, self.method) {
            (Some(id), Some(method)) => Ok(Incoming::Request {
                id,
                method,
                params: self.params,
            }),
            (None, Some(method)) => Ok(Incoming::Notification {
                method,
                params: self.params,
            }),
            (Some(id), None) => Ok(Incoming::Response {
                id,
                result: self.result,
                error: self.error,
            }),
            (None, None) => Err(ServerError::Transport {
                message: "message has neither id nor method".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_fields_are_omitted_on_encode() {
        let message = Message::response(json!(1), None);
        let encoded = serde_json::to_string(&message).unwrap();
        assert_eq!(encoded, "{\"jsonrpc\":\"2.0\",\"id\":1}");
    }

    #[test]
    fn test_error_response_keeps_code_and_message() {
        let err = ResponseError {
            code: METHOD_NOT_FOUND,
            message: "method not found: x".into(),
            data: None,
        };
        let encoded = serde_json::to_string(&Message::error_response(json!(7), err)).unwrap();
        assert!(encoded.contains("-32601"));
        assert!(!encoded.contains("\"result\""));
        assert!(!encoded.contains("\"data\""));
    }

    #[test]
    fn test_classify_request_notification_response() {
        let request: Message =
            serde_json::from_str("{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"m\"}").unwrap();
        assert!(matches!(request.classify().unwrap(), Incoming::Request { .. }));

        let notification: Message =
            serde_json::from_str("{\"jsonrpc\":\"2.0\",\"method\":\"exit\"}").unwrap();
        assert!(matches!(
            notification.classify().unwrap(),
            Incoming::Notification { .. }
        ));

        let response: Message =
            serde_json::from_str("{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}").unwrap();
        assert!(matches!(
            response.classify().unwrap(),
            Incoming::Response { .. }
        ));
    }

    #[test]
    fn test_classify_rejects_shapeless_message() {
        let message: Message = serde_json::from_str("{\"jsonrpc\":\"2.0\"}").unwrap();
        assert!(message.classify().is_err());
    }

    #[test]
    fn test_invocation_error_code_for_generic_failures() {
        let err = ServerError::Command {
            message: "boom".into(),
        };
        let translated = ResponseError::from_server_error(&err);
        assert_eq!(translated.code, INVOCATION_ERROR);
        assert!(translated.data.is_some());
    }
}
