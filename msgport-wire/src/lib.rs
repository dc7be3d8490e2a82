// msgport-wire
//! Wire types shared by the message-port broker and its client proxy.

pub mod bundle;
pub mod error;
pub mod frame;

pub use bundle::{flag, keys, Bundle};
pub use error::{ErrorCode, WireError};
pub use frame::{find_next, Frame, FrameCodec, FrameKind, Hello, HEADER_LEN};

/// Maximum encoded size of a user message bundle: 8 KiB.
///
/// Enforced by the proxy before transmission; the broker forwards any frame
/// it can fully receive.
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024;
