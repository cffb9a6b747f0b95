//! Tool permission decisions for `can_use_tool` requests.

use sandbox_bridge_core::EffectiveConfig;
use serde_json::Value;

use super::types::PermissionResult;

/// Allow-list based permission policy.
#[derive(Debug, Clone, Default)]
pub struct ToolPermissions {
    allowed: Vec<String>,
}

impl ToolPermissions {
    /// Create a policy allowing exactly `allowed`.
    #[must_use]
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed }
    }

    /// Create a policy from the session's allowed tools.
    #[must_use]
    pub fn from_config(config: &EffectiveConfig) -> Self {
        Self::new(config.allowed_tools.clone())
    }

    /// Whether `tool_name` is on the allow-list.
    #[must_use]
    pub fn is_allowed(&self, tool_name: &str) -> bool {
        self.allowed.iter().any(|t| t == tool_name)
    }

    /// Decide a `can_use_tool` request.
    #[must_use]
    pub fn decide(&self, tool_name: &str, input: Value) -> PermissionResult {
        if self.is_allowed(tool_name) {
            PermissionResult::Allow {
                updated_input: input,
            }
        } else {
            tracing::info!("Denied tool '{tool_name}': not on the allow-list");
            PermissionResult::Deny {
                message: format!("Tool '{tool_name}' is not allowed in this session"),
                interrupt: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_allow_list_decisions() {
        let permissions = ToolPermissions::new(vec!["Read".into(), "Bash".into()]);
        let input = json!({"command": "ls"});

        assert_eq!(
            permissions.decide("Bash", input.clone()),
            PermissionResult::Allow {
                updated_input: input.clone()
            }
        );
        assert!(matches!(
            permissions.decide("WebFetch", input),
            PermissionResult::Deny { .. }
        ));
    }
}
