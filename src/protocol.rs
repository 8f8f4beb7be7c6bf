//! Wire protocol for workspace collaboration sessions.
//!
//! Every frame is a JSON text message with a tagged-union envelope:
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │ { "event": "chat:send",                         │
//! │   "data": { "workspace_id": "…", "message": …, │
//! │             "kind": "text" } }                  │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! The event name selects the payload shape at compile time via the
//! [`ClientEvent`] / [`ServerEvent`] enums — malformed or unknown frames
//! fail to decode and are answered with an `error` event, never a crash.
//!
//! Document operations are relayed verbatim (`serde_json::Value`); the
//! server stamps the authoritative timestamp but never interprets the
//! operation payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Chat message category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Text,
    Code,
    System,
}

/// Call media kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Video,
    Audio,
}

/// Machine-readable error classification carried on `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    Validation,
    AccessDenied,
    InvalidCallState,
    WorkspaceFull,
}

/// Messages a client may send to the server.
///
/// The first frame on every connection must be `session:hello`; until it
/// arrives the connection has no identity and every other event is
/// rejected with a validation error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Identify this connection (first message after the transport handshake).
    #[serde(rename = "session:hello")]
    Hello {
        user_id: Uuid,
        user_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        avatar: Option<String>,
    },

    #[serde(rename = "workspace:join")]
    JoinWorkspace { workspace_id: Uuid },

    /// Leave the currently joined workspace (no-op when not joined).
    #[serde(rename = "workspace:leave")]
    LeaveWorkspace,

    #[serde(rename = "chat:send")]
    ChatSend {
        workspace_id: Uuid,
        message: String,
        kind: ChatKind,
    },

    #[serde(rename = "chat:typing")]
    Typing { workspace_id: Uuid },

    #[serde(rename = "chat:stop-typing")]
    StopTyping { workspace_id: Uuid },

    /// Incremental edit descriptor, relayed verbatim to the other members.
    #[serde(rename = "document:operation")]
    DocumentOperation {
        workspace_id: Uuid,
        document_id: Uuid,
        operation: serde_json::Value,
    },

    #[serde(rename = "call:start")]
    CallStart {
        workspace_id: Uuid,
        kind: CallKind,
    },

    #[serde(rename = "call:join")]
    CallJoin { call_id: Uuid },

    #[serde(rename = "call:leave")]
    CallLeave { call_id: Uuid },

    #[serde(rename = "call:end")]
    CallEnd { call_id: Uuid },

    #[serde(rename = "call:offer")]
    CallOffer {
        call_id: Uuid,
        to: Uuid,
        offer: serde_json::Value,
    },

    #[serde(rename = "call:answer")]
    CallAnswer {
        call_id: Uuid,
        to: Uuid,
        answer: serde_json::Value,
    },

    #[serde(rename = "call:ice-candidate")]
    CallIceCandidate {
        call_id: Uuid,
        to: Uuid,
        candidate: serde_json::Value,
    },

    #[serde(rename = "ping")]
    Ping,
}

/// Messages the server pushes to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Direct reply to a successful join: the current roster.
    #[serde(rename = "workspace:joined")]
    WorkspaceJoined {
        workspace_id: Uuid,
        joined: Vec<Uuid>,
        typing: Vec<Uuid>,
    },

    /// Announced to the rest of the room when a user joins.
    #[serde(rename = "workspace:user-joined")]
    UserJoined {
        workspace_id: Uuid,
        user_id: Uuid,
        user_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        avatar: Option<String>,
        member_count: usize,
    },

    #[serde(rename = "workspace:user-left")]
    UserLeft { workspace_id: Uuid, user_id: Uuid },

    /// Chat message with the server-assigned id and timestamp.
    #[serde(rename = "chat:message")]
    ChatMessage {
        id: Uuid,
        workspace_id: Uuid,
        user_id: Uuid,
        user_name: String,
        message: String,
        timestamp: DateTime<Utc>,
        kind: ChatKind,
    },

    #[serde(rename = "chat:typing")]
    Typing { workspace_id: Uuid, user_id: Uuid },

    #[serde(rename = "chat:stop-typing")]
    StopTyping { workspace_id: Uuid, user_id: Uuid },

    #[serde(rename = "document:operation")]
    DocumentOperation {
        document_id: Uuid,
        operation: serde_json::Value,
        user_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "call:started")]
    CallStarted {
        call_id: Uuid,
        workspace_id: Uuid,
        kind: CallKind,
        started_by: Uuid,
    },

    #[serde(rename = "call:participant-joined")]
    CallParticipantJoined { call_id: Uuid, user_id: Uuid },

    #[serde(rename = "call:participant-left")]
    CallParticipantLeft { call_id: Uuid, user_id: Uuid },

    #[serde(rename = "call:ended")]
    CallEnded { call_id: Uuid, ended_by: Uuid },

    /// Point-to-point signaling relay (never broadcast).
    #[serde(rename = "call:offer")]
    CallOffer {
        call_id: Uuid,
        from: Uuid,
        to: Uuid,
        offer: serde_json::Value,
    },

    #[serde(rename = "call:answer")]
    CallAnswer {
        call_id: Uuid,
        from: Uuid,
        to: Uuid,
        answer: serde_json::Value,
    },

    #[serde(rename = "call:ice-candidate")]
    CallIceCandidate {
        call_id: Uuid,
        from: Uuid,
        to: Uuid,
        candidate: serde_json::Value,
    },

    /// Live notification push (from the event-bus side).
    #[serde(rename = "notification:new")]
    Notification {
        id: Uuid,
        user_id: Uuid,
        title: String,
        body: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "pong")]
    Pong,

    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },
}

impl ClientEvent {
    /// Serialize to a JSON wire frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Parse a JSON wire frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

impl ServerEvent {
    /// Serialize to a JSON wire frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Parse a JSON wire frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    /// Convenience constructor for validation failures.
    pub fn validation_error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
            code: Some(ErrorCode::Validation),
        }
    }

    /// Convenience constructor for join refusals.
    pub fn access_denied(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
            code: Some(ErrorCode::AccessDenied),
        }
    }

    /// Convenience constructor for signaling failures.
    pub fn invalid_call_state(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
            code: Some(ErrorCode::InvalidCallState),
        }
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    Serialization(String),
    Deserialization(String),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "Serialization error: {e}"),
            Self::Deserialization(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_roundtrip() {
        let msg = ClientEvent::Hello {
            user_id: Uuid::new_v4(),
            user_name: "Alice".into(),
            avatar: Some("avatars/alice.png".into()),
        };

        let encoded = msg.encode().unwrap();
        let decoded = ClientEvent::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_event_name_tags() {
        let msg = ClientEvent::JoinWorkspace {
            workspace_id: Uuid::new_v4(),
        };
        let json: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(json["event"], "workspace:join");

        let msg = ClientEvent::StopTyping {
            workspace_id: Uuid::new_v4(),
        };
        let json: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(json["event"], "chat:stop-typing");

        let msg = ClientEvent::CallIceCandidate {
            call_id: Uuid::new_v4(),
            to: Uuid::new_v4(),
            candidate: serde_json::json!({"sdpMid": "0"}),
        };
        let json: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(json["event"], "call:ice-candidate");
    }

    #[test]
    fn test_chat_send_roundtrip() {
        let msg = ClientEvent::ChatSend {
            workspace_id: Uuid::new_v4(),
            message: "hi".into(),
            kind: ChatKind::Text,
        };

        let encoded = msg.encode().unwrap();
        let decoded = ClientEvent::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_document_operation_payload_verbatim() {
        let op = serde_json::json!({
            "type": "insert",
            "position": 42,
            "text": "fn main() {}",
        });
        let msg = ClientEvent::DocumentOperation {
            workspace_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            operation: op.clone(),
        };

        let decoded = ClientEvent::decode(&msg.encode().unwrap()).unwrap();
        match decoded {
            ClientEvent::DocumentOperation { operation, .. } => assert_eq!(operation, op),
            other => panic!("Expected DocumentOperation, got {other:?}"),
        }
    }

    #[test]
    fn test_server_chat_message_roundtrip() {
        let msg = ServerEvent::ChatMessage {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            user_name: "Bob".into(),
            message: "hello".into(),
            timestamp: Utc::now(),
            kind: ChatKind::Text,
        };

        let encoded = msg.encode().unwrap();
        let decoded = ServerEvent::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_error_codes_kebab_case() {
        let msg = ServerEvent::invalid_call_state("no active call");
        let json: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(json["data"]["code"], "invalid-call-state");

        let msg = ServerEvent::access_denied("not a member");
        let json: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(json["data"]["code"], "access-denied");
    }

    #[test]
    fn test_error_without_code_omits_field() {
        let msg = ServerEvent::Error {
            message: "oops".into(),
            code: None,
        };
        let json: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert!(json["data"].get("code").is_none());
    }

    #[test]
    fn test_decode_unknown_event_fails() {
        let frame = r#"{"event":"workspace:teleport","data":{}}"#;
        assert!(ClientEvent::decode(frame).is_err());
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(ClientEvent::decode("not json at all").is_err());
        assert!(ServerEvent::decode("{\"event\":").is_err());
    }

    #[test]
    fn test_decode_missing_field_fails() {
        // chat:send without a message field
        let frame = r#"{"event":"chat:send","data":{"workspace_id":"550e8400-e29b-41d4-a716-446655440000","kind":"text"}}"#;
        assert!(ClientEvent::decode(frame).is_err());
    }

    #[test]
    fn test_call_signaling_roundtrip() {
        let msg = ServerEvent::CallOffer {
            call_id: Uuid::new_v4(),
            from: Uuid::new_v4(),
            to: Uuid::new_v4(),
            offer: serde_json::json!({"sdp": "v=0...", "type": "offer"}),
        };

        let decoded = ServerEvent::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_ping_pong_frames() {
        let ping = ClientEvent::Ping.encode().unwrap();
        let json: serde_json::Value = serde_json::from_str(&ping).unwrap();
        assert_eq!(json["event"], "ping");

        let pong = ServerEvent::Pong.encode().unwrap();
        let decoded = ServerEvent::decode(&pong).unwrap();
        assert_eq!(decoded, ServerEvent::Pong);
    }

    #[test]
    fn test_chat_kind_lowercase() {
        let msg = ClientEvent::ChatSend {
            workspace_id: Uuid::new_v4(),
            message: "x".into(),
            kind: ChatKind::Code,
        };
        let json: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(json["data"]["kind"], "code");
    }

    #[test]
    fn test_call_kind_lowercase() {
        let msg = ClientEvent::CallStart {
            workspace_id: Uuid::new_v4(),
            kind: CallKind::Audio,
        };
        let json: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(json["data"]["kind"], "audio");
    }
}
