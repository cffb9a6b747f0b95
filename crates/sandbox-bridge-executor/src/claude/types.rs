//! Claude Code stream-json protocol types.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Messages written to the CLI's stdin.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SdkMessage {
    /// A user turn.
    User { message: Value },
    /// A request from us to the CLI.
    ControlRequest {
        request_id: String,
        request: SdkControlRequestType,
    },
    /// Our answer to a CLI control request.
    ControlResponse { response: ControlResponseType },
}

impl SdkMessage {
    /// Wrap prompt content as a user turn.
    ///
    /// Objects that already carry a `role` are passed through; anything
    /// else becomes the `content` of a user message.
    #[must_use]
    pub fn user(content: Value) -> Self {
        let message = if content.get("role").is_some() {
            content
        } else {
            json!({ "role": "user", "content": content })
        };
        Self::User { message }
    }

    /// Wrap a control request under a fresh request id.
    #[must_use]
    pub fn control(request: SdkControlRequestType) -> Self {
        Self::ControlRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            request,
        }
    }
}

/// Control requests we send.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum SdkControlRequestType {
    Initialize {},
    Interrupt {},
}

/// Control responses we send.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlResponseType {
    Success {
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<Value>,
    },
    Error {
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// A control request received from the CLI.
#[derive(Debug, Clone, Deserialize)]
pub struct CliControlRequest {
    pub request_id: String,
    pub request: ControlRequestType,
}

/// Control request subtypes the CLI sends.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlRequestType {
    CanUseTool {
        tool_name: String,
        input: Value,
        #[serde(default)]
        tool_use_id: Option<String>,
    },
    /// Any subtype we do not handle; answered with an error response.
    #[serde(other)]
    Unsupported,
}

/// Answer to a `can_use_tool` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "behavior", rename_all = "camelCase")]
pub enum PermissionResult {
    Allow {
        #[serde(rename = "updatedInput")]
        updated_input: Value,
    },
    Deny {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        interrupt: Option<bool>,
    },
}

/// Classification of one stdout line.
#[derive(Debug)]
pub enum CliLine {
    ControlRequest(CliControlRequest),
    ControlResponse(Value),
    /// Anything else is an event for the caller.
    Event(Value),
}

impl CliLine {
    /// Parse one line of CLI output.
    ///
    /// # Errors
    /// Returns error if the line is not JSON, or is a malformed control request.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(line)?;
        match value.get("type").and_then(Value::as_str) {
            Some("control_request") => Ok(Self::ControlRequest(serde_json::from_value(value)?)),
            Some("control_response") => Ok(Self::ControlResponse(value)),
            _ => Ok(Self::Event(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_wrapping() {
        let json = serde_json::to_value(SdkMessage::user(json!("hello"))).unwrap();
        assert_eq!(
            json,
            json!({"type": "user", "message": {"role": "user", "content": "hello"}})
        );

        let passthrough = json!({"role": "user", "content": [{"type": "text", "text": "hi"}]});
        let json = serde_json::to_value(SdkMessage::user(passthrough.clone())).unwrap();
        assert_eq!(json["message"], passthrough);
    }

    #[test]
    fn test_interrupt_request_shape() {
        let json = serde_json::to_value(SdkMessage::control(SdkControlRequestType::Interrupt {})).unwrap();
        assert_eq!(json["type"], "control_request");
        assert_eq!(json["request"], json!({"subtype": "interrupt"}));
        assert!(json["request_id"].as_str().is_some());
    }

    #[test]
    fn test_parse_cli_lines() {
        let line = r#"{"type":"control_request","request_id":"r1","request":{"subtype":"can_use_tool","tool_name":"Bash","input":{"command":"ls"}}}"#;
        match CliLine::parse(line).unwrap() {
            CliLine::ControlRequest(req) => {
                assert_eq!(req.request_id, "r1");
                assert!(matches!(req.request, ControlRequestType::CanUseTool { ref tool_name, .. } if tool_name == "Bash"));
            }
            other => panic!("unexpected: {other:?}"),
        }

        let line = r#"{"type":"control_request","request_id":"r2","request":{"subtype":"hook_callback","callback_id":"c1"}}"#;
        assert!(matches!(
            CliLine::parse(line).unwrap(),
            CliLine::ControlRequest(CliControlRequest { request: ControlRequestType::Unsupported, .. })
        ));

        let line = r#"{"type":"assistant","message":{"content":[]}}"#;
        assert!(matches!(CliLine::parse(line).unwrap(), CliLine::Event(_)));
        assert!(CliLine::parse("not json").is_err());
    }

    #[test]
    fn test_permission_result_shape() {
        let deny = PermissionResult::Deny {
            message: "nope".into(),
            interrupt: None,
        };
        assert_eq!(
            serde_json::to_value(deny).unwrap(),
            json!({"behavior": "deny", "message": "nope"})
        );
    }
}
