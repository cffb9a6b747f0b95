//! Claude Code stream-json protocol handler.

use std::sync::Arc;

use sandbox_bridge_core::{RuntimeControl, RuntimeError, RuntimeEvent, UserPrompt};
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{Mutex, mpsc},
    task::JoinHandle,
};

use super::{
    permissions::ToolPermissions,
    types::{CliControlRequest, CliLine, ControlRequestType, ControlResponseType, SdkControlRequestType, SdkMessage},
};

type EventSender = mpsc::UnboundedSender<Result<RuntimeEvent, RuntimeError>>;

/// Channels the peer multiplexes onto the CLI's stdin and stdout.
pub struct PeerChannels {
    pub prompts: mpsc::UnboundedReceiver<UserPrompt>,
    pub control: mpsc::UnboundedReceiver<RuntimeControl>,
    pub events: EventSender,
}

/// Handles bidirectional stream-json communication with the CLI.
#[derive(Clone)]
pub struct ProtocolPeer {
    stdin: Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>,
}

impl ProtocolPeer {
    /// Create a peer writing to `stdin`.
    #[must_use]
    pub fn new(stdin: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            stdin: Arc::new(Mutex::new(Box::new(stdin))),
        }
    }

    /// Spawn the protocol loop.
    ///
    /// The loop ends on stdout EOF, at which point `channels.events` is
    /// dropped and the runtime's event stream ends.
    pub fn spawn(
        stdin: impl AsyncWrite + Send + Unpin + 'static,
        stdout: impl AsyncRead + Send + Unpin + 'static,
        permissions: ToolPermissions,
        channels: PeerChannels,
    ) -> (Self, JoinHandle<()>) {
        let peer = Self::new(stdin);
        let loop_peer = peer.clone();
        let handle = tokio::spawn(async move {
            loop_peer.run(stdout, permissions, channels).await;
        });
        (peer, handle)
    }

    async fn run(
        &self,
        stdout: impl AsyncRead + Unpin,
        permissions: ToolPermissions,
        channels: PeerChannels,
    ) {
        let PeerChannels {
            mut prompts,
            mut control,
            events,
        } = channels;

        if let Err(e) = self.initialize().await {
            tracing::error!("Failed to initialize Claude protocol: {e}");
            let _ = events.send(Err(e));
            return;
        }

        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => self.handle_line(&line, &permissions, &events).await,
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdout: {e}");
                        let _ = events.send(Err(e.into()));
                        break;
                    }
                },
                Some(prompt) = prompts.recv() => {
                    if let Err(e) = self.send_user_message(prompt.message).await {
                        tracing::error!("Failed to send user message: {e}");
                        let _ = events.send(Err(e));
                    }
                }
                Some(RuntimeControl::Interrupt) = control.recv() => {
                    if let Err(e) = self.interrupt().await {
                        tracing::debug!("Failed to send interrupt to Claude: {e}");
                    }
                }
            }
        }
        tracing::debug!("Claude protocol loop finished");
    }

    async fn handle_line(&self, line: &str, permissions: &ToolPermissions, events: &EventSender) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        match CliLine::parse(line) {
            Ok(CliLine::ControlRequest(request)) => {
                self.handle_control_request(permissions, request).await;
            }
            Ok(CliLine::ControlResponse(response)) => {
                tracing::debug!("Control response: {response}");
            }
            Ok(CliLine::Event(event)) => {
                let _ = events.send(Ok(event));
            }
            Err(e) => {
                tracing::warn!("Unparseable CLI output: {e}");
                let _ = events.send(Err(e.into()));
            }
        }
    }

    async fn handle_control_request(&self, permissions: &ToolPermissions, request: CliControlRequest) {
        let CliControlRequest {
            request_id,
            request,
        } = request;

        let response = match request {
            ControlRequestType::CanUseTool {
                tool_name, input, ..
            } => serde_json::to_value(permissions.decide(&tool_name, input)).map_err(|e| e.to_string()),
            ControlRequestType::Unsupported => Err("Unsupported control request".to_string()),
        };

        let result = match response {
            Ok(response) => self.send_response(request_id, response).await,
            Err(error) => self.send_error(request_id, error).await,
        };
        if let Err(e) = result {
            tracing::error!("Failed to answer control request: {e}");
        }
    }

    async fn send_response(&self, request_id: String, response: Value) -> Result<(), RuntimeError> {
        self.send_json(&SdkMessage::ControlResponse {
            response: ControlResponseType::Success {
                request_id,
                response: Some(response),
            },
        })
        .await
    }

    async fn send_error(&self, request_id: String, error: String) -> Result<(), RuntimeError> {
        self.send_json(&SdkMessage::ControlResponse {
            response: ControlResponseType::Error {
                request_id,
                error: Some(error),
            },
        })
        .await
    }

    async fn send_json(&self, message: &SdkMessage) -> Result<(), RuntimeError> {
        let json = serde_json::to_string(message)?;
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Send a user turn.
    ///
    /// # Errors
    /// Returns error if write fails.
    pub async fn send_user_message(&self, content: Value) -> Result<(), RuntimeError> {
        self.send_json(&SdkMessage::user(content)).await
    }

    /// Initialize the control protocol.
    ///
    /// # Errors
    /// Returns error if write fails.
    pub async fn initialize(&self) -> Result<(), RuntimeError> {
        self.send_json(&SdkMessage::control(SdkControlRequestType::Initialize {}))
            .await
    }

    /// Interrupt the current turn.
    ///
    /// # Errors
    /// Returns error if write fails.
    pub async fn interrupt(&self) -> Result<(), RuntimeError> {
        self.send_json(&SdkMessage::control(SdkControlRequestType::Interrupt {}))
            .await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, duplex};

    use super::*;

    struct Harness {
        sdk_out: Lines<BufReader<DuplexStream>>,
        cli_out: DuplexStream,
        prompts: mpsc::UnboundedSender<UserPrompt>,
        control: mpsc::UnboundedSender<RuntimeControl>,
        events: mpsc::UnboundedReceiver<Result<RuntimeEvent, RuntimeError>>,
    }

    impl Harness {
        async fn next_written(&mut self) -> Value {
            let line = self.sdk_out.next_line().await.unwrap().expect("line written");
            serde_json::from_str(&line).unwrap()
        }
    }

    fn harness(allowed: &[&str]) -> Harness {
        let (stdin, stdin_peer) = duplex(4096);
        let (stdout_peer, stdout) = duplex(4096);
        let (prompt_tx, prompts) = mpsc::unbounded_channel();
        let (control_tx, control) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();

        let permissions = ToolPermissions::new(allowed.iter().map(ToString::to_string).collect());
        let _ = ProtocolPeer::spawn(
            stdin,
            stdout,
            permissions,
            PeerChannels {
                prompts,
                control,
                events: event_tx,
            },
        );

        Harness {
            sdk_out: BufReader::new(stdin_peer).lines(),
            cli_out: stdout_peer,
            prompts: prompt_tx,
            control: control_tx,
            events,
        }
    }

    #[tokio::test]
    async fn test_initialize_then_prompts_in_order() {
        let mut h = harness(&[]);
        let init = h.next_written().await;
        assert_eq!(init["request"]["subtype"], "initialize");

        h.prompts.send(UserPrompt::text("first")).unwrap();
        h.prompts.send(UserPrompt::text("second")).unwrap();
        assert_eq!(h.next_written().await["message"]["content"], "first");
        assert_eq!(h.next_written().await["message"]["content"], "second");
    }

    #[tokio::test]
    async fn test_can_use_tool_answered_from_allow_list() {
        let mut h = harness(&["Read"]);
        h.next_written().await;

        let request = json!({
            "type": "control_request",
            "request_id": "req-1",
            "request": {"subtype": "can_use_tool", "tool_name": "Bash", "input": {"command": "rm -rf /"}}
        });
        h.cli_out.write_all(format!("{request}\n").as_bytes()).await.unwrap();

        let response = h.next_written().await;
        assert_eq!(response["type"], "control_response");
        assert_eq!(response["response"]["request_id"], "req-1");
        assert_eq!(response["response"]["response"]["behavior"], "deny");
    }

    #[tokio::test]
    async fn test_unknown_control_request_gets_error_response() {
        let mut h = harness(&["Read"]);
        h.next_written().await;

        let request = json!({
            "type": "control_request",
            "request_id": "req-2",
            "request": {"subtype": "hook_callback", "callback_id": "cb-1", "input": {}}
        });
        h.cli_out.write_all(format!("{request}\n").as_bytes()).await.unwrap();

        let response = h.next_written().await;
        assert_eq!(response["type"], "control_response");
        assert_eq!(response["response"]["subtype"], "error");
        assert_eq!(response["response"]["request_id"], "req-2");
    }

    #[tokio::test]
    async fn test_events_forwarded_and_stream_ends_on_eof() {
        let mut h = harness(&[]);
        h.next_written().await;

        h.cli_out
            .write_all(b"{\"type\":\"assistant\",\"message\":{\"content\":[]}}\nnot json\n")
            .await
            .unwrap();

        let event = h.events.recv().await.unwrap().unwrap();
        assert_eq!(event["type"], "assistant");
        assert!(h.events.recv().await.unwrap().is_err());

        drop(h.cli_out);
        assert!(h.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_interrupt_writes_control_request() {
        let mut h = harness(&[]);
        h.next_written().await;

        h.control.send(RuntimeControl::Interrupt).unwrap();
        let written = h.next_written().await;
        assert_eq!(written["type"], "control_request");
        assert_eq!(written["request"]["subtype"], "interrupt");
    }
}
