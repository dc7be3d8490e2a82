// msgport-broker
//! The message-port broker daemon.
//!
//! Applications register named ports (trusted or untrusted) and send bundles
//! to ports owned by other applications. The broker mediates every
//! registration, lookup, and delivery over a local UNIX socket, identifying
//! each peer by its socket credentials and enforcing preload/certificate
//! rules for trusted traffic.

pub mod registry;
pub mod server;
pub mod service;

pub use registry::{ClientId, PortKey, PortRegistry};
pub use server::{Broker, BrokerConfig, BrokerError, DEFAULT_SOCKET_DIR, SERVER_NAME};
pub use service::MessagePortService;
