//! Client-side session management for sandboxed agent brokers.
//!
//! Provides:
//! - `SessionManager` - Provision, configure, connect, subscribe, tear down
//! - `PlatformClient` - Sandbox provisioning API client
//! - Connection target resolution (local / direct / proxy)

pub mod error;
pub mod manager;
pub mod options;
pub mod platform;
pub mod target;

pub use error::SessionError;
pub use manager::{SessionManager, Subscription};
pub use options::{RetryPolicy, SessionOptions};
pub use platform::{PlatformClient, SandboxDescriptor};
pub use target::{ConnectionMode, ConnectionTarget};

pub use sandbox_bridge_core::SessionConfig;
pub use sandbox_bridge_transport::{InputMessage, OutputMessage};
