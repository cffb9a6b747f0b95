//! Process-backed agent runtime.
//!
//! Provides:
//! - Claude Code stream-json protocol types and peer
//! - `ClaudeRuntime` - `AgentRuntime` backed by the `claude` CLI
//! - Command building utilities

pub mod claude;
pub mod command;

pub use claude::{ClaudeRuntime, ToolPermissions};
pub use command::{CommandBuilder, CommandParts};
