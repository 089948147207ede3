//! IPC wire format: newline-delimited JSON, one request per connection.
//!
//! A request is `{ "id": string, "type": RequestType, "payload"?: object }`;
//! the response echoes the id with `type` of `ok`, `state`, or `error`.
//! Unknown request types get an error response.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::editor::EditorState;

/// Request payloads, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum IpcRequestBody {
    /// Liveness probe.
    Ping,

    /// Ask the editor-host for its current [`EditorState`].
    GetState,

    /// Navigate the editor's browser view.
    Navigate { url: String },

    /// Begin interactive element selection in the editor's view.
    StartElementSelect,

    /// Cancel a pending element selection.
    CancelElementSelect,
}

/// A single IPC request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcRequest {
    /// Correlation id, echoed in the response.
    pub id: String,

    #[serde(flatten)]
    pub body: IpcRequestBody,
}

impl IpcRequest {
    /// Build a request with a fresh correlation id.
    pub fn new(body: IpcRequestBody) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            body,
        }
    }
}

/// Response payloads, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum IpcResponseBody {
    /// The request succeeded with no data.
    Ok,

    /// The editor-host's published state.
    State(EditorState),

    /// The request failed.
    Error { message: String },
}

/// A single IPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcResponse {
    /// Correlation id copied from the request (empty when the request id
    /// could not be recovered).
    pub id: String,

    #[serde(flatten)]
    pub body: IpcResponseBody,
}

impl IpcResponse {
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: IpcResponseBody::Ok,
        }
    }

    pub fn state(id: impl Into<String>, state: EditorState) -> Self {
        Self {
            id: id.into(),
            body: IpcResponseBody::State(state),
        }
    }

    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: IpcResponseBody::Error {
                message: message.into(),
            },
        }
    }

    /// Whether this is a plain `ok` response.
    pub fn is_ok(&self) -> bool {
        matches!(self.body, IpcResponseBody::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_wire_shape() {
        let request = IpcRequest {
            id: "1".to_string(),
            body: IpcRequestBody::Ping,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({"id": "1", "type": "ping"}));
    }

    #[test]
    fn test_navigate_wire_shape() {
        let request = IpcRequest {
            id: "2".to_string(),
            body: IpcRequestBody::Navigate {
                url: "https://example.com".to_string(),
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "2",
                "type": "navigate",
                "payload": {"url": "https://example.com"}
            })
        );

        let parsed: IpcRequest = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_unknown_type_fails_to_parse() {
        let result: Result<IpcRequest, _> =
            serde_json::from_str(r#"{"id": "3", "type": "reboot_editor"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_response_round_trip() {
        let response = IpcResponse::state(
            "4",
            EditorState {
                cdp_port: Some(9222),
                ..Default::default()
            },
        );
        let json = serde_json::to_string(&response).unwrap();
        let parsed: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_error_response_shape() {
        let response = IpcResponse::error("5", "nope");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["payload"]["message"], "nope");
        assert!(!response.is_ok());
    }

    #[test]
    fn test_fresh_ids_are_unique() {
        let a = IpcRequest::new(IpcRequestBody::Ping);
        let b = IpcRequest::new(IpcRequestBody::Ping);
        assert_ne!(a.id, b.id);
    }
}
