//! Claude Code runtime and stream-json protocol.

pub mod permissions;
pub mod protocol;
pub mod runtime;
pub mod types;

pub use permissions::ToolPermissions;
pub use protocol::ProtocolPeer;
pub use runtime::ClaudeRuntime;
