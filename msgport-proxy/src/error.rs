//! Proxy-side errors, mapped onto the broker's numeric codes.

use thiserror::Error;

use msgport_platform::{AppId, PlatformError};
use msgport_wire::{ErrorCode, WireError, MAX_MESSAGE_SIZE};

use crate::tables::PortId;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Broker refused the request: {0:?}")]
    Broker(ErrorCode),
    #[error("The remote application {0} is not signed with the same certificate")]
    CertificateNotMatch(AppId),
    #[error("Encoded message is {size} bytes (max {MAX_MESSAGE_SIZE})")]
    MaxExceeded { size: usize },
    #[error("Unknown port identifier: {0}")]
    UnknownPort(PortId),
    #[error("Platform lookup failed: {0}")]
    Platform(#[from] PlatformError),
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// The numeric code this error presents to callers.
    pub fn code(&self) -> ErrorCode {
        match self {
            ProxyError::Broker(code) => *code,
            ProxyError::CertificateNotMatch(_) => ErrorCode::CertificateNotMatch,
            ProxyError::MaxExceeded { .. } => ErrorCode::MaxExceeded,
            ProxyError::UnknownPort(_) => ErrorCode::InvalidParameter,
            ProxyError::Platform(_) | ProxyError::Wire(_) | ProxyError::Io(_) => {
                ErrorCode::IoError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ProxyError::Broker(ErrorCode::MessageportNotFound).code(),
            ErrorCode::MessageportNotFound
        );
        assert_eq!(
            ProxyError::CertificateNotMatch(AppId::from("app")).code(),
            ErrorCode::CertificateNotMatch
        );
        assert_eq!(
            ProxyError::MaxExceeded { size: 9000 }.code(),
            ErrorCode::MaxExceeded
        );
        assert_eq!(
            ProxyError::UnknownPort(7).code(),
            ErrorCode::InvalidParameter
        );
        assert_eq!(
            ProxyError::Io(std::io::Error::other("boom")).code(),
            ErrorCode::IoError
        );
    }
}
