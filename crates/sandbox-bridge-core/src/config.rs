//! Agent configuration and its three-tier resolution.
//!
//! Precedence, lowest to highest:
//! 1. library defaults (constants in this module)
//! 2. startup options supplied when the broker process starts
//! 3. the configuration most recently negotiated over `POST /config`
//!
//! Resolution is field by field: a field left unset at a higher tier falls
//! through to the next tier down.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Model used when neither startup options nor the caller pick one.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// Tools the agent may use when no allow-list is configured.
pub const DEFAULT_ALLOWED_TOOLS: &[&str] = &["Read", "Write", "Edit", "Bash", "Glob", "Grep"];

const REDACTED: &str = "[redacted]";

/// Caller-supplied agent parameters.
///
/// Every field is optional; unset fields inherit from startup options or
/// library defaults when resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Agent session to resume instead of starting fresh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_session_id: Option<String>,
    /// Credential handed to the runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
}

/// Options fixed when the broker process starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOptions {
    #[serde(flatten)]
    pub session: SessionConfig,
    /// Directory the runtime works in; created before the runtime starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,
}

/// Fully resolved configuration the runtime is started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveConfig {
    pub system_prompt: Option<String>,
    pub allowed_tools: Vec<String>,
    pub model: String,
    pub resume_session_id: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub max_turns: Option<u32>,
    pub permission_mode: Option<String>,
    pub workspace_dir: PathBuf,
}

impl EffectiveConfig {
    /// Copy with the credential masked, for introspection endpoints and logs.
    #[must_use]
    pub fn redacted(&self) -> Self {
        Self {
            anthropic_api_key: self.anthropic_api_key.as_ref().map(|_| REDACTED.to_string()),
            ..self.clone()
        }
    }

    /// Whether `tool` is on the allow-list.
    #[must_use]
    pub fn allows_tool(&self, tool: &str) -> bool {
        self.allowed_tools.iter().any(|t| t == tool)
    }
}

/// Library default for the workspace directory.
#[must_use]
pub fn default_workspace_dir() -> PathBuf {
    dirs::home_dir().map_or_else(|| PathBuf::from("workspace"), |home| home.join("workspace"))
}

fn pick<T: Clone>(negotiated: Option<&T>, startup: Option<&T>) -> Option<T> {
    negotiated.or(startup).cloned()
}

/// Resolve the configuration the runtime should run with.
#[must_use]
pub fn resolve_config(startup: &AgentOptions, negotiated: &SessionConfig) -> EffectiveConfig {
    let base = &startup.session;

    EffectiveConfig {
        system_prompt: pick(negotiated.system_prompt.as_ref(), base.system_prompt.as_ref()),
        allowed_tools: pick(negotiated.allowed_tools.as_ref(), base.allowed_tools.as_ref())
            .unwrap_or_else(|| DEFAULT_ALLOWED_TOOLS.iter().map(ToString::to_string).collect()),
        model: pick(negotiated.model.as_ref(), base.model.as_ref())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        resume_session_id: pick(
            negotiated.resume_session_id.as_ref(),
            base.resume_session_id.as_ref(),
        ),
        anthropic_api_key: pick(
            negotiated.anthropic_api_key.as_ref(),
            base.anthropic_api_key.as_ref(),
        ),
        max_turns: pick(negotiated.max_turns.as_ref(), base.max_turns.as_ref()),
        permission_mode: pick(
            negotiated.permission_mode.as_ref(),
            base.permission_mode.as_ref(),
        ),
        workspace_dir: startup
            .workspace_dir
            .clone()
            .unwrap_or_else(default_workspace_dir),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_defaults_fill_gaps() {
        let resolved = resolve_config(&AgentOptions::default(), &SessionConfig::default());
        assert_eq!(resolved.model, DEFAULT_MODEL);
        assert_eq!(resolved.allowed_tools.len(), DEFAULT_ALLOWED_TOOLS.len());
        assert!(resolved.system_prompt.is_none());
        assert_eq!(resolved.workspace_dir, default_workspace_dir());
    }

    #[test]
    fn test_negotiated_overrides_startup() {
        let startup = AgentOptions {
            session: SessionConfig {
                model: Some("startup-model".into()),
                system_prompt: Some("startup prompt".into()),
                ..SessionConfig::default()
            },
            workspace_dir: Some(PathBuf::from("/tmp/ws")),
        };
        let negotiated = SessionConfig {
            model: Some("caller-model".into()),
            allowed_tools: Some(vec!["Read".into()]),
            ..SessionConfig::default()
        };

        let resolved = resolve_config(&startup, &negotiated);
        assert_eq!(resolved.model, "caller-model");
        assert_eq!(resolved.system_prompt.as_deref(), Some("startup prompt"));
        assert_eq!(resolved.allowed_tools, vec!["Read".to_string()]);
        assert_eq!(resolved.workspace_dir, PathBuf::from("/tmp/ws"));
    }

    #[test]
    fn test_wire_names_are_camel_case() {
        let json = r#"{"systemPrompt":"be brief","allowedTools":["Bash"],"resumeSessionId":"abc"}"#;
        let config: SessionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.system_prompt.as_deref(), Some("be brief"));
        assert_eq!(config.resume_session_id.as_deref(), Some("abc"));

        let out = serde_json::to_value(&config).unwrap();
        assert!(out.get("allowedTools").is_some());
        assert!(out.get("model").is_none());
    }

    #[test]
    fn test_redacted_masks_credential() {
        let negotiated = SessionConfig {
            anthropic_api_key: Some("sk-secret".into()),
            ..SessionConfig::default()
        };
        let resolved = resolve_config(&AgentOptions::default(), &negotiated);
        let shown = resolved.redacted();
        assert_eq!(shown.anthropic_api_key.as_deref(), Some(REDACTED));
        assert!(resolved.allows_tool("Bash"));
        assert!(!resolved.allows_tool("WebFetch"));
    }
}
