//! Client-side session lifecycle.
//!
//! `start` resolves credentials, optionally provisions a sandbox, negotiates
//! the agent configuration, and opens the transport. Messages from the broker
//! are dispatched to every subscriber in arrival order.

use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use sandbox_bridge_core::SessionConfig;
use sandbox_bridge_transport::{InputMessage, OutputMessage};
use serde::Deserialize;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        Message,
        client::IntoClientRequest,
        http::{HeaderName, HeaderValue},
    },
};

use crate::{
    error::SessionError,
    options::{ResolvedOptions, SessionOptions},
    platform::{PlatformClient, SandboxDescriptor, StartSandboxRequest, StopSandboxRequest, read_json},
    target::{ConnectionMode, ConnectionTarget},
};

type Callback = Arc<dyn Fn(&OutputMessage) + Send + Sync>;
type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    callbacks: Vec<(u64, Callback)>,
}

impl Subscribers {
    fn snapshot(&self) -> Vec<Callback> {
        self.callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect()
    }
}

fn dispatch(subscribers: &Mutex<Subscribers>, message: &OutputMessage) {
    let callbacks = lock(subscribers).snapshot();
    for callback in callbacks {
        callback(message);
    }
}

/// Handle returned by [`SessionManager::on_message`].
#[must_use = "dropping a Subscription keeps the callback registered; call unsubscribe to remove it"]
pub struct Subscription {
    id: u64,
    subscribers: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    /// Remove the callback. Messages dispatched afterwards do not reach it.
    pub fn unsubscribe(self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            lock(&subscribers).callbacks.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Open transport to the broker.
/// How long the writer may take to flush the close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

struct Connection {
    outbound: mpsc::UnboundedSender<Message>,
    open: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }

    async fn close(self) {
        let Self {
            outbound,
            open,
            reader,
            mut writer,
        } = self;
        open.store(false, Ordering::SeqCst);
        reader.abort();
        let _ = outbound.send(Message::Close(None));
        drop(outbound);
        if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
            tracing::debug!("Close frame not flushed in time, aborting writer");
            writer.abort();
        }
    }
}

/// A sandbox this session provisioned and must release.
struct Provisioned {
    platform: PlatformClient,
    sandbox: SandboxDescriptor,
    client_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    connection_token: Option<String>,
}

impl ConfigReply {
    fn into_token(self) -> Result<String, SessionError> {
        match self.connection_token {
            Some(token) if self.success && !token.is_empty() => Ok(token),
            _ => Err(SessionError::Configuration("no connection token in configuration response".into())),
        }
    }
}

/// Drives one agent session from the client side.
pub struct SessionManager {
    options: SessionOptions,
    http: reqwest::Client,
    env: EnvLookup,
    subscribers: Arc<Mutex<Subscribers>>,
    connection: Mutex<Option<Connection>>,
    provisioned: Mutex<Option<Provisioned>>,
    mode: Mutex<Option<ConnectionMode>>,
}

impl SessionManager {
    /// Create a manager that falls back to process environment variables.
    #[must_use]
    pub fn new(options: SessionOptions) -> Self {
        Self::with_env(options, |key| std::env::var(key).ok())
    }

    /// Create a manager with a custom environment lookup.
    pub fn with_env<F>(options: SessionOptions, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            options,
            http: reqwest::Client::new(),
            env: Box::new(env),
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
            connection: Mutex::new(None),
            provisioned: Mutex::new(None),
            mode: Mutex::new(None),
        }
    }

    /// Start the session.
    ///
    /// On any failure after a sandbox was provisioned, the sandbox is torn
    /// down before the error is returned.
    ///
    /// # Errors
    /// - `Configuration` if credentials are missing or configuration never succeeds
    /// - `UnexpectedStatus`/`Http` if provisioning fails
    /// - `Transport` if the transport cannot be opened
    pub async fn start(&self) -> Result<(), SessionError> {
        if self.is_connected() {
            return Err(SessionError::AlreadyStarted);
        }
        if lock(&self.connection).is_some() || lock(&self.provisioned).is_some() {
            tracing::info!("Clearing previous session before restart");
            self.stop().await;
        }
        let resolved = self.options.resolve_with(|key| (self.env)(key))?;

        let target = match &self.options.direct_url {
            Some(url) => ConnectionTarget::local(url)?,
            None => self.provision(&resolved).await?,
        };
        self.set_mode(Some(target.mode));
        tracing::info!(mode = %target.mode, config_url = %target.config_url, "Connecting to broker");

        let mut config = self.options.config.clone();
        config.anthropic_api_key = Some(resolved.credential);

        let result = async {
            let token = self.negotiate(&target, &config).await?;
            self.open_transport(&target, &token).await
        }
        .await;

        match result {
            Ok(connection) => {
                *lock(&self.connection) = Some(connection);
                tracing::info!("Session started");
                Ok(())
            }
            Err(e) => {
                tracing::error!("Session start failed: {e}");
                self.release_sandbox(true).await;
                self.set_mode(None);
                Err(e)
            }
        }
    }

    async fn provision(&self, resolved: &ResolvedOptions) -> Result<ConnectionTarget, SessionError> {
        let client_id = resolved.client_id.clone().ok_or_else(|| {
            SessionError::Configuration("client id required for sandbox provisioning".into())
        })?;
        let platform_url = resolved.platform_url.clone().ok_or_else(|| {
            SessionError::Configuration("platform URL required when no broker URL is given".into())
        })?;

        let platform = PlatformClient::new(self.http.clone(), platform_url, resolved.platform_api_key.clone());
        let sandbox = platform
            .start_sandbox(&StartSandboxRequest {
                snapshot: self.options.snapshot().to_string(),
                labels: self.options.labels.clone(),
                volume: self.options.volume.clone(),
                client_id: client_id.clone(),
            })
            .await?;
        tracing::info!(sandbox_id = %sandbox.id, "Sandbox provisioned");

        let target = ConnectionTarget::for_sandbox(
            &sandbox,
            resolved.use_proxy,
            resolved.platform_api_key.as_deref(),
        );
        *lock(&self.provisioned) = Some(Provisioned {
            platform,
            sandbox,
            client_id,
        });

        if target.is_err() {
            self.release_sandbox(true).await;
        }
        target
    }

    /// `POST /config` until it succeeds or the retry policy is exhausted,
    /// then take the connection token from the reply.
    async fn negotiate(&self, target: &ConnectionTarget, config: &SessionConfig) -> Result<String, SessionError> {
        let policy = self.options.retry;
        let attempts = policy.attempts.max(1);
        let mut last_error = String::from("no response");

        for attempt in 1..=attempts {
            match self.post_config(target, config).await {
                Ok(reply) => return reply.into_token(),
                Err(e) => {
                    tracing::warn!(attempt, attempts, "Broker configuration failed: {e}");
                    last_error = e.to_string();
                }
            }
            if attempt < attempts {
                tokio::time::sleep(policy.delay).await;
            }
        }

        Err(SessionError::Configuration(format!(
            "broker configuration failed after {attempts} attempts: {last_error}"
        )))
    }

    async fn post_config(&self, target: &ConnectionTarget, config: &SessionConfig) -> Result<ConfigReply, SessionError> {
        let mut request = self.http.post(target.config_url.clone()).json(config);
        for (name, value) in &target.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        read_json(request.send().await?).await
    }

    async fn open_transport(&self, target: &ConnectionTarget, token: &str) -> Result<Connection, SessionError> {
        let mut request = target.transport_url(token).as_str().into_client_request()?;
        for (name, value) in &target.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SessionError::Configuration(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SessionError::Configuration(format!("invalid header value: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (stream, _response) = connect_async(request).await?;
        let (mut sink, mut source) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let open = Arc::new(AtomicBool::new(true));

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if sink.send(message).await.is_err() || closing {
                    break;
                }
            }
        });

        let subscribers = Arc::clone(&self.subscribers);
        let reader_open = Arc::clone(&open);
        let writer_abort = writer.abort_handle();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let payload = match frame {
                    Ok(Message::Text(text)) => text.as_str().to_owned(),
                    Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!("Transport error: {e}");
                        dispatch(&subscribers, &OutputMessage::error(format!("transport error: {e}")));
                        break;
                    }
                };
                match serde_json::from_str::<OutputMessage>(&payload) {
                    Ok(message) => dispatch(&subscribers, &message),
                    Err(e) => {
                        tracing::warn!("Unparseable broker message: {e}");
                        dispatch(&subscribers, &OutputMessage::error(format!("invalid broker message: {e}")));
                    }
                }
            }
            reader_open.store(false, Ordering::SeqCst);
            writer_abort.abort();
            tracing::debug!("Transport closed");
        });

        Ok(Connection {
            outbound,
            open,
            reader,
            writer,
        })
    }

    /// Send a message to the broker.
    ///
    /// # Errors
    /// Returns `NotConnected` if the transport is not open.
    pub fn send(&self, message: &InputMessage) -> Result<(), SessionError> {
        let json = serde_json::to_string(message)?;
        let guard = lock(&self.connection);
        let connection = guard
            .as_ref()
            .filter(|c| c.is_open())
            .ok_or(SessionError::NotConnected)?;
        connection
            .outbound
            .send(Message::Text(json.into()))
            .map_err(|_| SessionError::NotConnected)
    }

    /// Register a callback for every message from the broker.
    pub fn on_message<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&OutputMessage) + Send + Sync + 'static,
    {
        let mut subs = lock(&self.subscribers);
        subs.next_id += 1;
        let id = subs.next_id;
        subs.callbacks.push((id, Arc::new(callback)));
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Close the transport and delete any provisioned sandbox.
    pub async fn stop(&self) {
        self.stop_with(true).await;
    }

    /// Close the transport and stop any provisioned sandbox, deleting it when
    /// `delete` is set. Safe to call repeatedly; teardown failures are logged.
    pub async fn stop_with(&self, delete: bool) {
        let connection = lock(&self.connection).take();
        if let Some(connection) = connection {
            connection.close().await;
            tracing::info!("Transport closed by client");
        }
        self.release_sandbox(delete).await;
        self.set_mode(None);
    }

    async fn release_sandbox(&self, delete: bool) {
        let Some(provisioned) = lock(&self.provisioned).take() else {
            return;
        };
        let Provisioned {
            platform,
            sandbox,
            client_id,
        } = provisioned;

        let request = StopSandboxRequest {
            sandbox_id: sandbox.id.clone(),
            delete,
            client_id,
        };
        match platform.stop_sandbox(&request).await {
            Ok(()) => tracing::info!(sandbox_id = %sandbox.id, delete, "Sandbox stopped"),
            Err(e) => tracing::error!(sandbox_id = %sandbox.id, "Failed to stop sandbox: {e}"),
        }
    }

    /// Whether the transport is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        lock(&self.connection).as_ref().is_some_and(Connection::is_open)
    }

    /// Id of the sandbox this session provisioned, if any.
    #[must_use]
    pub fn sandbox_id(&self) -> Option<String> {
        lock(&self.provisioned).as_ref().map(|p| p.sandbox.id.clone())
    }

    /// Mode of the current connection.
    #[must_use]
    pub fn mode(&self) -> Option<ConnectionMode> {
        *lock(&self.mode)
    }

    fn set_mode(&self, mode: Option<ConnectionMode>) {
        *lock(&self.mode) = mode;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
