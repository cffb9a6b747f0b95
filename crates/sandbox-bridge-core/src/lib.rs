//! Core building blocks for brokering sandboxed agent sessions.
//!
//! This crate provides:
//! - `SessionConfig` / `AgentOptions` and the three-tier `resolve_config`
//! - `TokenStore` - Single-use, time-limited connection tokens
//! - `InputQueue` - FIFO buffer with wake-on-push
//! - `AgentRuntime` - The seam to the agent engine
//! - `testing::EchoRuntime` - In-process runtime (feature: test-utils)

pub mod config;
pub mod queue;
pub mod runtime;
pub mod token;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::{AgentOptions, EffectiveConfig, SessionConfig, resolve_config};
pub use queue::InputQueue;
pub use runtime::{AgentRuntime, RuntimeControl, RuntimeError, RuntimeEvent, RuntimeStream, UserPrompt};
pub use token::{DEFAULT_TOKEN_TTL, TokenStore};
