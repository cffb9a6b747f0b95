//! The seam between the broker and the agent engine.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::EffectiveConfig;

/// One structured event emitted by the runtime, forwarded verbatim.
pub type RuntimeEvent = Value;

/// A user-originated message bound for the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPrompt {
    /// Plain text or a structured message object.
    pub message: Value,
}

impl UserPrompt {
    /// Create a plain-text prompt.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            message: Value::String(text.into()),
        }
    }

    /// The prompt text when the message is a plain string.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        self.message.as_str()
    }
}

/// Out-of-band control for a running runtime stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeControl {
    /// Stop the current turn; the stream itself keeps running.
    Interrupt,
}

/// Handle to a started runtime.
///
/// `events` is single-consumer and forward-only: once an item is taken it
/// is gone, and the stream cannot be restarted.
pub struct RuntimeStream {
    pub events: BoxStream<'static, Result<RuntimeEvent, RuntimeError>>,
    pub control: mpsc::UnboundedSender<RuntimeControl>,
}

/// Runtime error.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Command build error: {0}")]
    CommandBuild(String),
    #[error("Agent error: {0}")]
    Agent(String),
}

/// Trait for agent engines the broker can drive.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Start a runtime stream.
    ///
    /// `prompts` delivers user messages in submission order for as long as
    /// the runtime runs.
    async fn start(
        &self,
        config: &EffectiveConfig,
        prompts: mpsc::UnboundedReceiver<UserPrompt>,
    ) -> Result<RuntimeStream, RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_text_accessors() {
        let prompt = UserPrompt::text("hello");
        assert_eq!(prompt.as_text(), Some("hello"));

        let structured = UserPrompt {
            message: serde_json::json!({"role": "user", "content": "hi"}),
        };
        assert!(structured.as_text().is_none());
    }
}
