//! Error codes exchanged with clients and wire-level failures.

use thiserror::Error;

/// Numeric result codes carried in `Reply` frames.
///
/// Zero is success; every failure is a distinct negative value so the proxy
/// can hand the code back to its caller verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    None = 0,
    IoError = -1,
    OutOfMemory = -2,
    InvalidParameter = -3,
    MessageportNotFound = -4,
    CertificateNotMatch = -5,
    MaxExceeded = -6,
}

impl ErrorCode {
    pub fn as_status(self) -> i32 {
        self as i32
    }

    /// Map a wire status back to a code. Unknown values are reported as
    /// `IoError` so a newer daemon cannot wedge an older proxy.
    pub fn from_status(status: i32) -> Self {
        match status {
            0 => ErrorCode::None,
            -2 => ErrorCode::OutOfMemory,
            -3 => ErrorCode::InvalidParameter,
            -4 => ErrorCode::MessageportNotFound,
            -5 => ErrorCode::CertificateNotMatch,
            -6 => ErrorCode::MaxExceeded,
            _ => ErrorCode::IoError,
        }
    }

    pub fn is_ok(self) -> bool {
        self == ErrorCode::None
    }
}

/// Errors raised while encoding or decoding wire data.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("CBOR encode error: {0}")]
    Encode(String),
    #[error("CBOR decode error: {0}")]
    Decode(String),
    #[error("Unknown frame kind: {0}")]
    UnknownKind(u32),
    #[error("Truncated frame: have {have} bytes, need {need}")]
    Truncated { have: usize, need: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for code in [
            ErrorCode::None,
            ErrorCode::IoError,
            ErrorCode::OutOfMemory,
            ErrorCode::InvalidParameter,
            ErrorCode::MessageportNotFound,
            ErrorCode::CertificateNotMatch,
            ErrorCode::MaxExceeded,
        ] {
            assert_eq!(ErrorCode::from_status(code.as_status()), code);
        }
    }

    #[test]
    fn test_unknown_status_maps_to_io_error() {
        assert_eq!(ErrorCode::from_status(-99), ErrorCode::IoError);
        assert_eq!(ErrorCode::from_status(7), ErrorCode::IoError);
    }

    #[test]
    fn test_is_ok() {
        assert!(ErrorCode::None.is_ok());
        assert!(!ErrorCode::IoError.is_ok());
    }
}
