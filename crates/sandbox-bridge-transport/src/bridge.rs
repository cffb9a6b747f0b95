//! Relays between the input queue, the runtime and the active transport.

use std::sync::{Arc, Mutex, PoisonError};

use futures::{StreamExt, stream::BoxStream};
use sandbox_bridge_core::{InputQueue, RuntimeError, RuntimeEvent, UserPrompt};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::protocol::OutputMessage;

struct ActiveConnection {
    id: Uuid,
    outbound: mpsc::UnboundedSender<OutputMessage>,
}

/// Holder for the one live transport, if any.
///
/// At most one connection is attached at a time; attaching while another
/// is live fails.
#[derive(Clone, Default)]
pub struct ConnectionSlot {
    inner: Arc<Mutex<Option<ActiveConnection>>>,
}

impl ConnectionSlot {
    /// Attach a connection if the slot is free.
    ///
    /// `admit` runs under the slot lock after the vacancy check and must
    /// return `Ok` for the attach to proceed. The new connection's first
    /// message is always `connected`.
    pub(crate) fn attach_with<E>(
        &self,
        admit: impl FnOnce() -> Result<(), E>,
        occupied: E,
    ) -> Result<(Uuid, mpsc::UnboundedReceiver<OutputMessage>), E> {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(occupied);
        }
        admit()?;

        let (outbound, rx) = mpsc::unbounded_channel();
        let _ = outbound.send(OutputMessage::Connected);
        let id = Uuid::new_v4();
        *slot = Some(ActiveConnection { id, outbound });
        Ok((id, rx))
    }

    /// Clear the slot if `id` is still the attached connection.
    pub fn detach(&self, id: Uuid) -> bool {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|c| c.id == id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    /// Send to the attached connection. Returns `false` if there is none.
    pub fn deliver(&self, msg: OutputMessage) -> bool {
        let slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref()
            .is_some_and(|conn| conn.outbound.send(msg).is_ok())
    }

    /// Whether a transport currently holds the slot.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// The drain and emit relays of one runtime stream.
pub struct StreamBridge {
    drain: JoinHandle<()>,
    emit: JoinHandle<()>,
}

impl StreamBridge {
    /// Start both relays.
    ///
    /// The drain loop moves queued prompts into `prompts` in FIFO order.
    /// The emit loop forwards each runtime event to whatever connection is
    /// attached when the event arrives; with nothing attached the event is
    /// dropped. When the events end the drain loop stops, leaving undelivered
    /// prompts queued for the next stream.
    #[must_use]
    pub fn spawn(
        queue: Arc<InputQueue<UserPrompt>>,
        prompts: mpsc::UnboundedSender<UserPrompt>,
        events: BoxStream<'static, Result<RuntimeEvent, RuntimeError>>,
        slot: ConnectionSlot,
    ) -> Self {
        let (ended_tx, ended_rx) = oneshot::channel();
        let drain = tokio::spawn(drain_loop(queue, prompts, ended_rx));
        let emit = tokio::spawn(emit_loop(events, slot, ended_tx));
        Self { drain, emit }
    }

    /// Whether the runtime's event stream has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.emit.is_finished()
    }

    /// Stop both loops.
    pub fn abort(&self) {
        self.drain.abort();
        self.emit.abort();
    }
}

impl Drop for StreamBridge {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn drain_loop(
    queue: Arc<InputQueue<UserPrompt>>,
    prompts: mpsc::UnboundedSender<UserPrompt>,
    mut ended: oneshot::Receiver<()>,
) {
    loop {
        let batch = tokio::select! {
            biased;
            _ = &mut ended => return,
            batch = queue.next_batch() => batch,
        };

        let mut batch = batch.into_iter();
        while let Some(prompt) = batch.next() {
            if let Err(mpsc::error::SendError(prompt)) = prompts.send(prompt) {
                tracing::warn!("Runtime stopped accepting prompts, requeueing input");
                queue.push_front_all(std::iter::once(prompt).chain(batch));
                return;
            }
        }
    }
}

async fn emit_loop(
    mut events: BoxStream<'static, Result<RuntimeEvent, RuntimeError>>,
    slot: ConnectionSlot,
    ended: oneshot::Sender<()>,
) {
    while let Some(event) = events.next().await {
        let msg = match event {
            Ok(data) => OutputMessage::SdkMessage { data },
            Err(e) => {
                tracing::error!("Runtime error: {e}");
                OutputMessage::error(e.to_string())
            }
        };
        if !slot.deliver(msg) {
            tracing::debug!("No active connection, dropping runtime event");
        }
    }

    tracing::info!("Runtime event stream ended");
    let _ = ended.send(());
    slot.deliver(OutputMessage::Done);
}
