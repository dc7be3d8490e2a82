// msgport-proxy
//! In-application client proxy for the message-port broker.
//!
//! The proxy opens two connections to the broker: a request channel for
//! register/check/send calls and a reverse channel on which the broker
//! writes asynchronous deliveries. Registered callbacks are invoked on the
//! reverse-channel task with system metadata stripped from the bundle.

pub mod error;
pub mod proxy;
mod tables;

pub use error::ProxyError;
pub use proxy::{MessagePortProxy, ProxyConfig};
pub use tables::{DeliveredMessage, MessageCallback, PortId};
