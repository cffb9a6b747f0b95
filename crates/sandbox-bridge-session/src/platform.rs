//! Client for the sandbox provisioning platform.

use std::collections::BTreeMap;

use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::SessionError;

/// Body of `POST /sandbox/start`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSandboxRequest {
    pub snapshot: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    pub client_id: String,
}

/// Body of `POST /sandbox/stop`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopSandboxRequest {
    pub sandbox_id: String,
    pub delete: bool,
    pub client_id: String,
}

/// A provisioned sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxDescriptor {
    pub id: String,
    /// Broker base URL reachable directly.
    pub url: String,
    /// Platform-hosted path that forwards to the broker.
    #[serde(default)]
    pub proxy_url: Option<String>,
    /// Headers required on direct connections.
    #[serde(default)]
    pub auth_headers: BTreeMap<String, String>,
    /// Query parameters required on direct connections.
    #[serde(default)]
    pub auth_params: BTreeMap<String, String>,
}

/// HTTP client for the sandbox platform's start and stop endpoints.
#[derive(Clone)]
pub struct PlatformClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl PlatformClient {
    /// `api_key`, when set, is sent as a bearer token on every request.
    pub fn new(http: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Provision a sandbox.
    ///
    /// # Errors
    /// Returns error if the request fails or the platform rejects it.
    pub async fn start_sandbox(&self, request: &StartSandboxRequest) -> Result<SandboxDescriptor, SessionError> {
        let res = self.post("/sandbox/start").json(request).send().await?;
        read_json(res).await
    }

    /// Stop a sandbox, deleting it when `delete` is set.
    ///
    /// # Errors
    /// Returns error if the request fails or the platform rejects it.
    pub async fn stop_sandbox(&self, request: &StopSandboxRequest) -> Result<(), SessionError> {
        let res = self.post("/sandbox/stop").json(request).send().await?;
        if res.status().is_success() {
            Ok(())
        } else {
            Err(unexpected(res).await)
        }
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let builder = self.http.post(format!("{}{path}", self.base_url));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

pub(crate) async fn read_json<T: DeserializeOwned>(res: Response) -> Result<T, SessionError> {
    if res.status().is_success() {
        Ok(res.json::<T>().await?)
    } else {
        Err(unexpected(res).await)
    }
}

pub(crate) async fn unexpected(res: Response) -> SessionError {
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    SessionError::UnexpectedStatus { status, body }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_start_request_shape() {
        let request = StartSandboxRequest {
            snapshot: "claude-agent".into(),
            labels: BTreeMap::new(),
            volume: None,
            client_id: "client-1".into(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"snapshot": "claude-agent", "clientId": "client-1"})
        );

        let stop = StopSandboxRequest {
            sandbox_id: "sbx-1".into(),
            delete: true,
            client_id: "client-1".into(),
        };
        assert_eq!(
            serde_json::to_value(&stop).unwrap(),
            json!({"sandboxId": "sbx-1", "delete": true, "clientId": "client-1"})
        );
    }

    #[test]
    fn test_descriptor_optional_fields() {
        let minimal: SandboxDescriptor =
            serde_json::from_value(json!({"id": "sbx-1", "url": "https://sbx-1.example"})).unwrap();
        assert!(minimal.proxy_url.is_none());
        assert!(minimal.auth_headers.is_empty());

        let full: SandboxDescriptor = serde_json::from_value(json!({
            "id": "sbx-2",
            "url": "https://sbx-2.example",
            "proxyUrl": "https://platform.example/proxy/sbx-2",
            "authHeaders": {"x-sandbox-auth": "secret"},
            "authParams": {"sig": "abc"}
        }))
        .unwrap();
        assert_eq!(full.auth_headers["x-sandbox-auth"], "secret");
        assert_eq!(full.auth_params["sig"], "abc");
    }
}
