//! Command building utilities.

use std::path::{Path, PathBuf};

use sandbox_bridge_core::EffectiveConfig;
use thiserror::Error;

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Base command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("Base command is empty after parsing")]
    EmptyCommand,
    #[error("Executable not found: {0}")]
    NotFound(String),
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandParts {
    /// Create parts from a resolved program and its arguments.
    #[must_use]
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Resolve the program to an absolute path.
    ///
    /// # Errors
    /// Returns error if executable not found.
    pub fn into_resolved(self) -> Result<(PathBuf, Vec<String>), CommandBuildError> {
        let Self { program, args } = self;
        let executable = resolve_executable(&program)
            .ok_or_else(|| CommandBuildError::NotFound(program.clone()))?;
        Ok((executable, args))
    }
}

fn resolve_executable(program: &str) -> Option<PathBuf> {
    if program.trim().is_empty() {
        return None;
    }
    let path = Path::new(program);
    if path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }
    which::which(program).ok()
}

/// Builder for constructing commands.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    /// Base executable command, possibly with leading arguments.
    pub base: String,
    /// Optional parameters to append.
    pub params: Option<Vec<String>>,
}

impl CommandBuilder {
    /// Create a builder from a shell-style base command.
    #[must_use]
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self {
            base: base.into(),
            params: None,
        }
    }

    /// Add parameters.
    #[must_use]
    pub fn params<I>(mut self, params: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.params = Some(params.into_iter().map(Into::into).collect());
        self
    }

    /// Extend parameters.
    #[must_use]
    pub fn extend_params<I>(mut self, more: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let extra: Vec<String> = more.into_iter().map(Into::into).collect();
        match &mut self.params {
            Some(p) => p.extend(extra),
            None => self.params = Some(extra),
        }
        self
    }

    /// Build the command.
    ///
    /// # Errors
    /// Returns error if command is invalid.
    pub fn build(&self) -> Result<CommandParts, CommandBuildError> {
        let mut parts = split_command_line(&self.base)?;
        if parts.is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }
        if let Some(ref params) = self.params {
            parts.extend(params.iter().cloned());
        }

        let program = parts.remove(0);
        Ok(CommandParts::new(program, parts))
    }
}

/// CLI flags for a runtime started with `config`.
#[must_use]
pub fn claude_args(config: &EffectiveConfig) -> Vec<String> {
    let mut args: Vec<String> = [
        "-p",
        "--verbose",
        "--output-format=stream-json",
        "--input-format=stream-json",
        "--permission-prompt-tool=stdio",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    args.extend(["--model".to_string(), config.model.clone()]);
    if let Some(prompt) = &config.system_prompt {
        args.extend(["--system-prompt".to_string(), prompt.clone()]);
    }
    if !config.allowed_tools.is_empty() {
        args.extend(["--allowedTools".to_string(), config.allowed_tools.join(",")]);
    }
    if let Some(session_id) = &config.resume_session_id {
        args.extend(["--resume".to_string(), session_id.clone()]);
    }
    if let Some(turns) = config.max_turns {
        args.extend(["--max-turns".to_string(), turns.to_string()]);
    }
    if let Some(mode) = &config.permission_mode {
        args.extend(["--permission-mode".to_string(), mode.clone()]);
    }
    args
}

fn split_command_line(input: &str) -> Result<Vec<String>, CommandBuildError> {
    #[cfg(windows)]
    {
        let parts = winsplit::split(input);
        if parts.is_empty() {
            Err(CommandBuildError::EmptyCommand)
        } else {
            Ok(parts)
        }
    }

    #[cfg(not(windows))]
    {
        shlex::split(input).ok_or_else(|| CommandBuildError::InvalidBase(input.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use sandbox_bridge_core::{AgentOptions, SessionConfig, resolve_config};

    use super::*;

    #[test]
    fn test_base_with_arguments_is_split() {
        let parts = CommandBuilder::new("npx -y @anthropic-ai/claude-code")
            .params(["--verbose"])
            .extend_params(["-p"])
            .build()
            .unwrap();
        assert_eq!(parts.program, "npx");
        assert_eq!(parts.args, vec!["-y", "@anthropic-ai/claude-code", "--verbose", "-p"]);
    }

    #[test]
    fn test_empty_and_unbalanced_bases_rejected() {
        assert!(matches!(CommandBuilder::new("").build(), Err(CommandBuildError::EmptyCommand)));
        #[cfg(not(windows))]
        assert!(matches!(
            CommandBuilder::new("claude \"unterminated").build(),
            Err(CommandBuildError::InvalidBase(_))
        ));
    }

    #[test]
    fn test_claude_args_follow_config() {
        let negotiated = SessionConfig {
            system_prompt: Some("be terse".into()),
            allowed_tools: Some(vec!["Read".into(), "Grep".into()]),
            resume_session_id: Some("sess-1".into()),
            max_turns: Some(3),
            ..SessionConfig::default()
        };
        let config = resolve_config(&AgentOptions::default(), &negotiated);
        let args = claude_args(&config);

        let joined = args.join(" ");
        assert!(joined.contains("--system-prompt be terse"));
        assert!(joined.contains("--allowedTools Read,Grep"));
        assert!(joined.contains("--resume sess-1"));
        assert!(joined.contains("--max-turns 3"));
        assert!(!joined.contains("--permission-mode"));
    }

    #[test]
    fn test_missing_executable_reported() {
        let parts = CommandParts::new("definitely-not-a-real-binary-4821".into(), vec![]);
        assert!(matches!(parts.into_resolved(), Err(CommandBuildError::NotFound(_))));
    }
}
