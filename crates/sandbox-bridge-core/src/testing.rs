//! In-process runtime for tests.
//!
//! `EchoRuntime` answers every prompt with an `echo` event. Two prompt
//! texts are special: `"fail"` yields a runtime error item and `"exit"`
//! ends the event stream.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    AgentRuntime, EffectiveConfig, RuntimeControl, RuntimeError, RuntimeStream, UserPrompt,
};

#[derive(Default)]
struct Recorded {
    prompts: Vec<UserPrompt>,
    configs: Vec<EffectiveConfig>,
}

/// Runtime that echoes prompts back as events.
#[derive(Clone, Default)]
pub struct EchoRuntime {
    starts: Arc<AtomicUsize>,
    recorded: Arc<Mutex<Recorded>>,
}

impl EchoRuntime {
    /// Create a runtime with nothing recorded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times a runtime stream was started.
    #[must_use]
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Every prompt received so far, in arrival order.
    #[must_use]
    pub fn prompts(&self) -> Vec<UserPrompt> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .prompts
            .clone()
    }

    /// The configuration of the most recent start.
    #[must_use]
    pub fn last_config(&self) -> Option<EffectiveConfig> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .configs
            .last()
            .cloned()
    }
}

#[async_trait]
impl AgentRuntime for EchoRuntime {
    async fn start(
        &self,
        config: &EffectiveConfig,
        mut prompts: mpsc::UnboundedReceiver<UserPrompt>,
    ) -> Result<RuntimeStream, RuntimeError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .configs
            .push(config.clone());

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let recorded = Arc::clone(&self.recorded);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(prompt) = prompts.recv() => {
                        recorded
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .prompts
                            .push(prompt.clone());
                        let item = match prompt.as_text() {
                            Some("exit") => break,
                            Some("fail") => Err(RuntimeError::Agent("requested failure".into())),
                            _ => Ok(json!({"type": "echo", "message": prompt.message})),
                        };
                        if event_tx.send(item).is_err() {
                            break;
                        }
                    }
                    Some(RuntimeControl::Interrupt) = control_rx.recv() => {
                        let _ = event_tx.send(Ok(json!({"type": "interrupted"})));
                    }
                    else => break,
                }
            }
        });

        Ok(RuntimeStream {
            events: UnboundedReceiverStream::new(event_rx).boxed(),
            control: control_tx,
        })
    }
}
