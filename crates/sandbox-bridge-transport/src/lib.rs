//! Wire protocol and connection broker.
//!
//! Provides:
//! - Wire protocol (tagged JSON records)
//! - Connection broker, stream bridge and axum router (feature: broker)

pub mod protocol;

#[cfg(feature = "broker")]
pub mod bridge;
#[cfg(feature = "broker")]
pub mod broker;
#[cfg(feature = "broker")]
pub mod router;

pub use protocol::{InputMessage, OutputMessage, UserMessageData};

#[cfg(feature = "broker")]
pub use broker::{Broker, BrokerError, BrokerPhase};
#[cfg(feature = "broker")]
pub use router::create_broker_router;
