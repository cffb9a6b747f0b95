//! Connection broker.
//!
//! Owns the broker process's mutable state: the current session config,
//! the token store, the input queue, the connection slot and the runtime
//! stream. Everything is reached through the methods below.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use sandbox_bridge_core::{
    AgentOptions, AgentRuntime, EffectiveConfig, InputQueue, RuntimeControl, RuntimeError,
    SessionConfig, TokenStore, UserPrompt, resolve_config,
};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    bridge::{ConnectionSlot, StreamBridge},
    protocol::{InputMessage, OutputMessage},
};

/// Broker error.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Invalid or expired connection token")]
    Unauthorized,
    #[error("A connection is already active")]
    Conflict,
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("No runtime stream is running")]
    NotRunning,
}

/// Lifecycle phase of the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerPhase {
    Idle,
    Configured,
    Streaming,
}

/// A transport admitted through the upgrade handshake.
pub struct Attachment {
    pub id: Uuid,
    /// Messages for this connection, in delivery order.
    pub outbound: mpsc::UnboundedReceiver<OutputMessage>,
}

struct RunningStream {
    control: mpsc::UnboundedSender<RuntimeControl>,
    bridge: StreamBridge,
}

/// Server side of the session protocol.
pub struct Broker {
    runtime: Arc<dyn AgentRuntime>,
    startup: AgentOptions,
    tokens: TokenStore,
    config: Mutex<SessionConfig>,
    phase: Mutex<BrokerPhase>,
    queue: Arc<InputQueue<UserPrompt>>,
    slot: ConnectionSlot,
    stream: tokio::sync::Mutex<Option<RunningStream>>,
}

impl Broker {
    /// Create a broker driving `runtime`, with `startup` as the middle tier
    /// of configuration.
    #[must_use]
    pub fn new(runtime: Arc<dyn AgentRuntime>, startup: AgentOptions) -> Self {
        Self {
            runtime,
            startup,
            tokens: TokenStore::default(),
            config: Mutex::new(SessionConfig::default()),
            phase: Mutex::new(BrokerPhase::Idle),
            queue: Arc::new(InputQueue::new()),
            slot: ConnectionSlot::default(),
            stream: tokio::sync::Mutex::new(None),
        }
    }

    /// Override the connection token lifetime.
    #[must_use]
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.tokens = TokenStore::new(ttl);
        self
    }

    /// Replace the session config and issue a fresh connection token.
    pub fn configure(&self, config: SessionConfig) -> String {
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config;

        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase != BrokerPhase::Streaming {
            *phase = BrokerPhase::Configured;
        }
        drop(phase);

        let token = self.tokens.issue();
        tracing::info!("Session configured, connection token issued");
        token
    }

    /// Startup options merged with the last negotiated config.
    #[must_use]
    pub fn effective_config(&self) -> EffectiveConfig {
        let negotiated = self.config.lock().unwrap_or_else(PoisonError::into_inner);
        resolve_config(&self.startup, &negotiated)
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> BrokerPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a runtime stream is live.
    pub async fn runtime_running(&self) -> bool {
        self.stream
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| !s.bridge.is_finished())
    }

    /// Admit a transport.
    ///
    /// An occupied slot is reported as [`BrokerError::Conflict`] before the
    /// token is looked at, so a valid token is not burnt by a conflicting
    /// attempt.
    ///
    /// # Errors
    /// Returns `Conflict` if a transport is attached, `Unauthorized` if the
    /// token is missing, unknown, consumed or expired.
    pub fn attach(&self, token: Option<&str>) -> Result<Attachment, BrokerError> {
        let admit = || match token {
            Some(t) if self.tokens.validate_and_consume(t) => Ok(()),
            _ => Err(BrokerError::Unauthorized),
        };

        match self.slot.attach_with(admit, BrokerError::Conflict) {
            Ok((id, outbound)) => {
                *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = BrokerPhase::Streaming;
                tracing::info!(connection_id = %id, "Transport attached");
                Ok(Attachment { id, outbound })
            }
            Err(e) => {
                tracing::warn!("Rejected transport upgrade: {e}");
                Err(e)
            }
        }
    }

    /// Release the slot held by connection `id`.
    ///
    /// The runtime stream keeps running.
    pub fn detach(&self, id: Uuid) {
        if self.slot.detach(id) {
            *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = BrokerPhase::Idle;
            tracing::info!(connection_id = %id, "Transport detached");
        }
    }

    /// Send a message to the attached transport, if any.
    pub fn deliver(&self, msg: OutputMessage) -> bool {
        self.slot.deliver(msg)
    }

    /// Start the runtime stream unless one is already running.
    ///
    /// Returns `true` if a new stream was started. A stream whose events
    /// have ended is replaced.
    ///
    /// # Errors
    /// Returns error if the workspace cannot be created or the runtime fails
    /// to start.
    pub async fn ensure_runtime(&self) -> Result<bool, BrokerError> {
        let mut running = self.stream.lock().await;
        if running.as_ref().is_some_and(|s| !s.bridge.is_finished()) {
            return Ok(false);
        }
        if let Some(stale) = running.take() {
            stale.bridge.abort();
        }

        let config = self.effective_config();
        tokio::fs::create_dir_all(&config.workspace_dir)
            .await
            .map_err(RuntimeError::from)?;

        let (prompt_tx, prompt_rx) = mpsc::unbounded_channel();
        let stream = self.runtime.start(&config, prompt_rx).await?;
        let bridge = StreamBridge::spawn(
            Arc::clone(&self.queue),
            prompt_tx,
            stream.events,
            self.slot.clone(),
        );
        *running = Some(RunningStream {
            control: stream.control,
            bridge,
        });

        tracing::info!(
            model = %config.model,
            workspace = %config.workspace_dir.display(),
            "Agent runtime started"
        );
        self.slot.deliver(OutputMessage::info("agent runtime started"));
        Ok(true)
    }

    /// Interrupt the runtime's current turn.
    ///
    /// # Errors
    /// Returns `NotRunning` if there is no live runtime stream.
    pub async fn interrupt(&self) -> Result<(), BrokerError> {
        let running = self.stream.lock().await;
        match running.as_ref() {
            Some(s) if !s.bridge.is_finished() => s
                .control
                .send(RuntimeControl::Interrupt)
                .map_err(|_| BrokerError::NotRunning),
            _ => Err(BrokerError::NotRunning),
        }
    }

    /// Handle one message received on the active transport.
    pub async fn handle_inbound(&self, msg: InputMessage) {
        match msg {
            InputMessage::UserMessage { data } => {
                self.queue.push(UserPrompt {
                    message: data.message,
                });
            }
            InputMessage::Interrupt => {
                if let Err(e) = self.interrupt().await {
                    self.deliver(OutputMessage::error(e.to_string()));
                }
            }
            InputMessage::Ping => {
                self.deliver(OutputMessage::Pong);
            }
        }
    }

    /// Number of prompts waiting to be drained.
    #[must_use]
    pub fn pending_inputs(&self) -> usize {
        self.queue.len()
    }
}
