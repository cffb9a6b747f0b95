//! Connection target resolution.
//!
//! A session talks to its broker through two endpoints derived from one
//! base URL: `{base}/config` over HTTP and `{base}/ws` over WebSocket.

use std::{collections::BTreeMap, fmt};

use url::Url;

use crate::{error::SessionError, platform::SandboxDescriptor};

/// How the session reaches its broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Caller-supplied broker URL; nothing is provisioned.
    Local,
    /// Provisioned sandbox reached at its own URL with its auth material.
    Direct,
    /// Provisioned sandbox reached through the platform proxy.
    Proxy,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::Direct => "direct",
            Self::Proxy => "proxy",
        };
        f.write_str(name)
    }
}

/// Resolved endpoints and auth material for one broker.
#[derive(Debug, Clone)]
pub struct ConnectionTarget {
    pub mode: ConnectionMode,
    pub config_url: Url,
    ws_url: Url,
    /// Sent on both the config request and the transport upgrade.
    pub headers: BTreeMap<String, String>,
    /// Appended to the transport URL after the connection token.
    pub params: BTreeMap<String, String>,
}

impl ConnectionTarget {
    /// Target a broker at a caller-supplied URL (`http(s)://` or `ws(s)://`).
    ///
    /// # Errors
    /// Returns error if the URL cannot be parsed or has an unsupported scheme.
    pub fn local(base: &str) -> Result<Self, SessionError> {
        Self::from_base(ConnectionMode::Local, base, BTreeMap::new(), BTreeMap::new())
    }

    /// Target a provisioned sandbox.
    ///
    /// Proxy mode is used only when requested and the platform supplied a
    /// proxy path; the platform key, if any, authenticates the proxy hop.
    ///
    /// # Errors
    /// Returns error if the sandbox URL cannot be parsed.
    pub fn for_sandbox(
        sandbox: &SandboxDescriptor,
        use_proxy: bool,
        platform_api_key: Option<&str>,
    ) -> Result<Self, SessionError> {
        match (&sandbox.proxy_url, use_proxy) {
            (Some(proxy), true) => {
                let mut headers = BTreeMap::new();
                if let Some(key) = platform_api_key {
                    headers.insert("authorization".to_string(), format!("Bearer {key}"));
                }
                Self::from_base(ConnectionMode::Proxy, proxy, headers, BTreeMap::new())
            }
            _ => Self::from_base(
                ConnectionMode::Direct,
                &sandbox.url,
                sandbox.auth_headers.clone(),
                sandbox.auth_params.clone(),
            ),
        }
    }

    fn from_base(
        mode: ConnectionMode,
        base: &str,
        headers: BTreeMap<String, String>,
        params: BTreeMap<String, String>,
    ) -> Result<Self, SessionError> {
        let base = base.trim_end_matches('/');
        let mut config_url = Url::parse(&format!("{base}/config"))?;
        let mut ws_url = Url::parse(&format!("{base}/ws"))?;

        let (http_scheme, ws_scheme) = match config_url.scheme() {
            "http" | "ws" => ("http", "ws"),
            "https" | "wss" => ("https", "wss"),
            other => {
                return Err(SessionError::Configuration(format!(
                    "unsupported broker URL scheme: {other}"
                )));
            }
        };
        config_url
            .set_scheme(http_scheme)
            .and_then(|()| ws_url.set_scheme(ws_scheme))
            .map_err(|()| SessionError::Configuration(format!("cannot derive endpoints from {base}")))?;

        Ok(Self {
            mode,
            config_url,
            ws_url,
            headers,
            params,
        })
    }

    /// Transport URL carrying `token` and any auth params.
    #[must_use]
    pub fn transport_url(&self, token: &str) -> Url {
        let mut url = self.ws_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("token", token);
            for (key, value) in &self.params {
                query.append_pair(key, value);
            }
        }
        url
    }
}
