//! `AgentRuntime` backed by the `claude` CLI.

use std::process::Stdio;

use async_trait::async_trait;
use command_group::AsyncCommandGroup;
use futures::StreamExt;
use sandbox_bridge_core::{AgentRuntime, EffectiveConfig, RuntimeError, RuntimeStream, UserPrompt};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    sync::mpsc,
};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{
    permissions::ToolPermissions,
    protocol::{PeerChannels, ProtocolPeer},
};
use crate::command::{CommandBuildError, CommandBuilder, claude_args};

/// Default base command.
pub const DEFAULT_CLAUDE_COMMAND: &str = "claude";

/// Runs one `claude` process per runtime stream.
#[derive(Debug, Clone)]
pub struct ClaudeRuntime {
    command: CommandBuilder,
}

impl Default for ClaudeRuntime {
    fn default() -> Self {
        Self::new(DEFAULT_CLAUDE_COMMAND)
    }
}

impl ClaudeRuntime {
    /// Create a runtime launching `base` (e.g. `claude` or
    /// `npx -y @anthropic-ai/claude-code`).
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            command: CommandBuilder::new(base),
        }
    }
}

fn build_error(e: CommandBuildError) -> RuntimeError {
    match e {
        CommandBuildError::NotFound(program) => RuntimeError::ExecutableNotFound(program),
        other => RuntimeError::CommandBuild(other.to_string()),
    }
}

#[async_trait]
impl AgentRuntime for ClaudeRuntime {
    async fn start(
        &self,
        config: &EffectiveConfig,
        prompts: mpsc::UnboundedReceiver<UserPrompt>,
    ) -> Result<RuntimeStream, RuntimeError> {
        let (program, args) = self
            .command
            .clone()
            .extend_params(claude_args(config))
            .build()
            .and_then(|parts| parts.into_resolved())
            .map_err(build_error)?;

        let mut command = Command::new(&program);
        command
            .args(&args)
            .current_dir(&config.workspace_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(key) = &config.anthropic_api_key {
            command.env("ANTHROPIC_API_KEY", key);
        }

        let mut child = command
            .group_spawn()
            .map_err(|e| RuntimeError::SpawnFailed(format!("{}: {e}", program.display())))?;
        let stdin = child
            .inner()
            .stdin
            .take()
            .ok_or_else(|| RuntimeError::SpawnFailed("stdin not captured".into()))?;
        let stdout = child
            .inner()
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::SpawnFailed("stdout not captured".into()))?;
        let stderr = child.inner().stderr.take();

        tracing::info!(program = %program.display(), model = %config.model, "Spawned Claude process");

        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "claude_stderr", "{line}");
                }
            });
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (_peer, protocol_task) = ProtocolPeer::spawn(
            stdin,
            stdout,
            ToolPermissions::from_config(config),
            PeerChannels {
                prompts,
                control: control_rx,
                events: event_tx,
            },
        );

        // Keep the process group alive until the protocol loop ends, then reap it.
        tokio::spawn(async move {
            let _ = protocol_task.await;
            match child.wait().await {
                Ok(status) => tracing::info!("Claude process exited: {status}"),
                Err(e) => tracing::error!("Failed to wait for Claude process: {e}"),
            }
        });

        Ok(RuntimeStream {
            events: UnboundedReceiverStream::new(event_rx).boxed(),
            control: control_tx,
        })
    }
}

#[cfg(test)]
mod tests {
    use sandbox_bridge_core::{AgentOptions, SessionConfig, resolve_config};

    use super::*;

    #[tokio::test]
    async fn test_missing_executable_fails_start() {
        let runtime = ClaudeRuntime::new("definitely-not-a-real-binary-4821");
        let config = resolve_config(&AgentOptions::default(), &SessionConfig::default());
        let (_tx, rx) = mpsc::unbounded_channel();

        match runtime.start(&config, rx).await {
            Err(RuntimeError::ExecutableNotFound(program)) => {
                assert_eq!(program, "definitely-not-a-real-binary-4821");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("start should fail"),
        }
    }

    #[tokio::test]
    async fn test_empty_command_fails_start() {
        let runtime = ClaudeRuntime::new("   ");
        let config = resolve_config(&AgentOptions::default(), &SessionConfig::default());
        let (_tx, rx) = mpsc::unbounded_channel();
        assert!(matches!(
            runtime.start(&config, rx).await,
            Err(RuntimeError::CommandBuild(_))
        ));
    }
}
