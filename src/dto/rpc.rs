//! Frames exchanged with the scoreboard over the RPC channel.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::RpcError;

/// HTTP-style verb carried by an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Read-only request.
    Get,
    /// Mutating request.
    Post,
}

/// Outbound request frame.
///
/// `request_id` is filled in by the channel only for calls that await a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// API path, e.g. `/api/v1/login`.
    pub path: String,
    /// Request verb.
    pub method: Method,
    /// Optional query string without the leading `?`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Optional JSON body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Correlation id for calls awaiting a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    /// Daemon version stamped on every frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl RpcRequest {
    fn new(path: impl Into<String>, method: Method) -> Self {
        Self {
            path: path.into(),
            method,
            query: None,
            body: None,
            request_id: None,
            version: None,
        }
    }

    /// Build a `POST` request for `path`.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(path, Method::Post)
    }

    /// Build a `GET` request for `path`.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(path, Method::Get)
    }

    /// Attach a JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach a query string.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// Response frame correlated to an earlier request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// HTTP-style status code.
    pub status: u16,
    /// JSON-encoded response document.
    #[serde(default)]
    pub body: String,
    /// Correlation id copied from the request.
    pub request_id: Uuid,
}

impl RpcResponse {
    /// Whether the server accepted the request.
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// Decode the JSON-encoded body.
    pub fn json_body<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// `{"message": ..}` wrapper used by most scoreboard responses.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageEnvelope<T> {
    /// Wrapped payload.
    pub message: T,
}

/// Unsolicited command pushed by the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerCommand {
    /// Machine the command is addressed to.
    pub uuid: String,
    /// Command name used for dispatch.
    pub cmd: String,
    /// Remaining command-specific fields.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl ServerCommand {
    /// Whether this command is addressed to `machine`.
    pub fn targets(&self, machine: Uuid) -> bool {
        Uuid::parse_str(&self.uuid).is_ok_and(|uuid| uuid == machine)
    }

    /// Decode the command payload into a typed structure.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.payload.clone()))
    }
}

/// Classified inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Response to one of our requests.
    Response(RpcResponse),
    /// Command pushed by the server.
    Command(ServerCommand),
}

impl InboundFrame {
    /// Classify a text frame: anything carrying `request_id` is a response, anything with
    /// `uuid` and `cmd` is a command.
    pub fn parse(text: &str) -> Result<Self, RpcError> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| RpcError::Protocol(err.to_string()))?;
        let Some(object) = value.as_object() else {
            return Err(RpcError::Protocol("frame is not a JSON object".into()));
        };

        if object.contains_key("request_id") {
            return serde_json::from_value(value)
                .map(Self::Response)
                .map_err(|err| RpcError::Protocol(format!("invalid response: {err}")));
        }

        if object.contains_key("uuid") && object.contains_key("cmd") {
            return serde_json::from_value(value)
                .map(Self::Command)
                .map_err(|err| RpcError::Protocol(format!("invalid command: {err}")));
        }

        Err(RpcError::Protocol(
            "frame is neither a response nor a command".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn optional_fields_are_omitted() {
        let request = RpcRequest::post("/api/v1/ping");
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded, json!({ "path": "/api/v1/ping", "method": "POST" }));
    }

    #[test]
    fn request_carries_body_and_query() {
        let request = RpcRequest::get("/api/v1/scores")
            .with_query("limit=4")
            .with_body(json!([1, 2]));
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded["method"], "GET");
        assert_eq!(encoded["query"], "limit=4");
        assert_eq!(encoded["body"], json!([1, 2]));
    }

    #[test]
    fn response_frames_are_classified() {
        let id = Uuid::new_v4();
        let text = json!({ "status": 200, "body": "{}", "request_id": id }).to_string();
        let InboundFrame::Response(response) = InboundFrame::parse(&text).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(response.request_id, id);
        assert!(response.is_success());
    }

    #[test]
    fn command_frames_keep_their_payload() {
        let machine = Uuid::new_v4();
        let text = json!({ "uuid": machine, "cmd": "logout", "position": 3 }).to_string();
        let InboundFrame::Command(command) = InboundFrame::parse(&text).unwrap() else {
            panic!("expected command");
        };
        assert!(command.targets(machine));
        assert!(!command.targets(Uuid::new_v4()));
        assert_eq!(command.payload["position"], 3);
    }

    #[test]
    fn malformed_frames_are_protocol_errors() {
        for text in ["not json", "[1,2]", r#"{"status":200}"#, r#"{"request_id":"nope"}"#] {
            assert!(
                matches!(InboundFrame::parse(text), Err(RpcError::Protocol(_))),
                "{text}"
            );
        }
    }
}
