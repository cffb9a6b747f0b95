//! Session options and environment resolution.

use std::{collections::BTreeMap, time::Duration};

use sandbox_bridge_core::SessionConfig;

use crate::error::SessionError;

/// Agent credential forwarded to the broker in the negotiated config.
pub const ENV_CREDENTIAL: &str = "ANTHROPIC_API_KEY";
pub const ENV_CLIENT_ID: &str = "SANDBOX_CLIENT_ID";
pub const ENV_PLATFORM_API_KEY: &str = "SANDBOX_PLATFORM_API_KEY";
pub const ENV_PLATFORM_URL: &str = "SANDBOX_PLATFORM_URL";
/// Set to `false`, `0`, `no` or `off` to connect to sandboxes directly.
pub const ENV_USE_PROXY: &str = "SANDBOX_USE_PROXY";

/// Snapshot requested when none is configured.
pub const DEFAULT_SNAPSHOT: &str = "claude-agent";

/// How often, and how far apart, `POST /config` is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(3),
        }
    }
}

/// Caller options for a session.
///
/// Unset credential and platform fields fall back to the environment when
/// the session starts.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Broker base URL; when set, no sandbox is provisioned.
    pub direct_url: Option<String>,
    pub credential: Option<String>,
    pub client_id: Option<String>,
    pub platform_api_key: Option<String>,
    pub platform_url: Option<String>,
    pub use_proxy: Option<bool>,
    pub snapshot: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub volume: Option<String>,
    /// Agent configuration negotiated with the broker.
    pub config: SessionConfig,
    pub retry: RetryPolicy,
}

/// Options after environment fallback.
#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    pub credential: String,
    pub client_id: Option<String>,
    pub platform_api_key: Option<String>,
    pub platform_url: Option<String>,
    pub use_proxy: bool,
}

impl SessionOptions {
    /// Fill unset fields from `env`.
    ///
    /// # Errors
    /// Returns `Configuration` if no agent credential is available.
    pub fn resolve_with<F>(&self, env: F) -> Result<ResolvedOptions, SessionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |explicit: &Option<String>, key: &str| {
            explicit
                .clone()
                .or_else(|| env(key))
                .filter(|v| !v.trim().is_empty())
        };

        let credential = pick(&self.credential, ENV_CREDENTIAL).ok_or_else(|| {
            SessionError::Configuration(format!("agent credential required (set {ENV_CREDENTIAL})"))
        })?;
        let use_proxy = self
            .use_proxy
            .unwrap_or_else(|| env(ENV_USE_PROXY).is_none_or(|v| parse_flag(&v)));

        Ok(ResolvedOptions {
            credential,
            client_id: pick(&self.client_id, ENV_CLIENT_ID),
            platform_api_key: pick(&self.platform_api_key, ENV_PLATFORM_API_KEY),
            platform_url: pick(&self.platform_url, ENV_PLATFORM_URL),
            use_proxy,
        })
    }

    /// Snapshot to provision from, falling back to the default.
    #[must_use]
    pub fn snapshot(&self) -> &str {
        self.snapshot.as_deref().unwrap_or(DEFAULT_SNAPSHOT)
    }
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "false" | "0" | "no" | "off"
    )
}
