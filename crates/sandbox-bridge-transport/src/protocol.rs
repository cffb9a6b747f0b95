//! Wire protocol between session clients and the broker.
//!
//! Both directions are JSON objects tagged by a `type` field.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Payload of a `user_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessageData {
    /// Plain text or a structured message object.
    pub message: Value,
}

/// Message from client to broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputMessage {
    /// Input for the agent; queued in submission order.
    UserMessage { data: UserMessageData },
    /// Interrupt the runtime's current turn.
    Interrupt,
    /// Keepalive.
    Ping,
}

impl InputMessage {
    /// Create a plain-text user message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::UserMessage {
            data: UserMessageData {
                message: Value::String(text.into()),
            },
        }
    }
}

/// Message from broker to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputMessage {
    /// The transport is attached.
    Connected,
    /// A runtime event, forwarded as emitted.
    SdkMessage { data: Value },
    AssistantMessage { data: Value },
    ToolUse { data: Value },
    ToolResult { data: Value },
    /// The runtime's event stream ended.
    Done,
    /// Sideband diagnostic.
    Info { data: Value },
    Error { error: String },
    Pong,
}

impl OutputMessage {
    /// Informational status line for the client.
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self::Info {
            data: json!({ "message": message.into() }),
        }
    }

    /// An `error` message carrying `error` as its text.
    #[must_use]
    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_wire_shape() {
        let msg = InputMessage::user("list the files");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "user_message", "data": {"message": "list the files"}})
        );
    }

    #[test]
    fn test_control_messages_parse() {
        let parsed: InputMessage = serde_json::from_str(r#"{"type":"interrupt"}"#).unwrap();
        assert_eq!(parsed, InputMessage::Interrupt);

        let parsed: InputMessage =
            serde_json::from_str(r#"{"type":"user_message","data":{"message":{"role":"user","content":"hi"}}}"#)
                .unwrap();
        if let InputMessage::UserMessage { data } = parsed {
            assert_eq!(data.message["content"], "hi");
        } else {
            panic!("Wrong message type");
        }

        assert!(serde_json::from_str::<InputMessage>(r#"{"type":"shutdown"}"#).is_err());
    }

    #[test]
    fn test_output_serialization() {
        let json = serde_json::to_string(&OutputMessage::Connected).unwrap();
        assert_eq!(json, r#"{"type":"connected"}"#);

        let json = serde_json::to_string(&OutputMessage::error("boom")).unwrap();
        assert_eq!(json, r#"{"type":"error","error":"boom"}"#);

        let parsed: OutputMessage =
            serde_json::from_str(r#"{"type":"sdk_message","data":{"type":"assistant"}}"#).unwrap();
        assert_eq!(
            parsed,
            OutputMessage::SdkMessage {
                data: json!({"type": "assistant"})
            }
        );
        assert!(OutputMessage::error("x").is_error());
    }
}
