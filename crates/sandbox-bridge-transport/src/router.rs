//! HTTP surface of the broker: `/config`, `/ws` and `/health`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt};
use sandbox_bridge_core::{EffectiveConfig, SessionConfig};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    broker::{Attachment, Broker, BrokerError, BrokerPhase},
    protocol::{InputMessage, OutputMessage},
};

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Runtime(_) | Self::NotRunning => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Response body of `POST /config`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub success: bool,
    pub config: EffectiveConfig,
    pub connection_token: String,
}

/// Response body of `GET /health`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    phase: BrokerPhase,
    runtime_running: bool,
}

#[derive(Debug, Deserialize)]
struct WsParams {
    token: Option<String>,
}

/// Create the broker router.
///
/// # Example
/// ```ignore
/// let broker = Arc::new(Broker::new(runtime, AgentOptions::default()));
/// let app = create_broker_router(broker);
/// axum::serve(listener, app).await?;
/// ```
#[must_use]
pub fn create_broker_router(broker: Arc<Broker>) -> Router {
    Router::new()
        .route("/config", get(get_config).post(post_config))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(broker)
}

async fn post_config(
    State(broker): State<Arc<Broker>>,
    Json(config): Json<SessionConfig>,
) -> Json<ConfigResponse> {
    let connection_token = broker.configure(config);
    Json(ConfigResponse {
        success: true,
        config: broker.effective_config().redacted(),
        connection_token,
    })
}

async fn get_config(State(broker): State<Arc<Broker>>) -> Json<EffectiveConfig> {
    Json(broker.effective_config().redacted())
}

async fn health(State(broker): State<Arc<Broker>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        phase: broker.phase(),
        runtime_running: broker.runtime_running().await,
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(broker): State<Arc<Broker>>,
) -> Result<Response, BrokerError> {
    let attachment = broker.attach(params.token.as_deref())?;
    let id = attachment.id;
    let on_failure = Arc::clone(&broker);

    Ok(ws
        .on_failed_upgrade(move |e| {
            tracing::warn!("WebSocket upgrade failed: {e}");
            on_failure.detach(id);
        })
        .on_upgrade(move |socket| handle_socket(socket, broker, attachment)))
}

async fn handle_socket(socket: WebSocket, broker: Arc<Broker>, attachment: Attachment) {
    let Attachment { id, mut outbound } = attachment;
    let (mut sender, mut receiver) = socket.split();

    // Forward broker output to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    match serde_json::to_string(&OutputMessage::error(format!(
                        "Failed to serialize message: {e}"
                    ))) {
                        Ok(j) => j,
                        Err(_) => continue,
                    }
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    if let Err(e) = broker.ensure_runtime().await {
        tracing::error!("Failed to start agent runtime: {e}");
        broker.deliver(OutputMessage::error(e.to_string()));
    }

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        match serde_json::from_str::<InputMessage>(&text) {
            Ok(input) => broker.handle_inbound(input).await,
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                broker.deliver(OutputMessage::error(format!("Invalid message: {e}")));
            }
        }
    }

    broker.detach(id);
    send_task.abort();
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request},
    };
    use sandbox_bridge_core::{AgentOptions, testing::EchoRuntime};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;

    fn app() -> (Arc<Broker>, Router) {
        let startup = AgentOptions {
            workspace_dir: Some(std::env::temp_dir().join("sandbox-bridge-router-tests")),
            ..AgentOptions::default()
        };
        let broker = Arc::new(Broker::new(Arc::new(EchoRuntime::new()), startup));
        let router = create_broker_router(Arc::clone(&broker));
        (broker, router)
    }

    async fn send(router: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = router.oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn test_post_config_returns_token() {
        let (broker, router) = app();
        let (status, body) = send(
            router,
            Method::POST,
            "/config",
            Some(json!({"model": "claude-opus-4-1", "anthropicApiKey": "sk-test"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let parsed: ConfigResponse = serde_json::from_slice(&body).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.config.model, "claude-opus-4-1");
        assert_ne!(parsed.config.anthropic_api_key.as_deref(), Some("sk-test"));
        assert!(!parsed.connection_token.is_empty());
        assert_eq!(broker.phase(), BrokerPhase::Configured);
    }

    #[tokio::test]
    async fn test_get_config_reflects_last_post() {
        let (_broker, router) = app();
        send(router.clone(), Method::POST, "/config", Some(json!({"model": "a"}))).await;
        send(router.clone(), Method::POST, "/config", Some(json!({"model": "b"}))).await;

        let (status, body) = send(router, Method::GET, "/config", None).await;
        assert_eq!(status, StatusCode::OK);
        let config: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(config["model"], "b");
    }

    #[tokio::test]
    async fn test_health_reports_phase() {
        let (_broker, router) = app();
        let (status, body) = send(router, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        let health: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health, json!({"status": "ok", "phase": "idle", "runtimeRunning": false}));
    }

    #[test]
    fn test_broker_errors_map_to_status() {
        assert_eq!(
            BrokerError::Unauthorized.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(BrokerError::Conflict.into_response().status(), StatusCode::CONFLICT);
    }
}
