// msgport-platform
//! Platform collaborator interfaces for the message-port system.
//!
//! The broker and proxy consult two device services: an identity service that
//! maps a peer process to its canonical application identifier, and a package
//! manager that answers preload and signing-certificate questions. Both are
//! expressed as traits here, with a JSON-manifest-backed implementation for
//! deployments and tests.

mod manifest;

pub use manifest::{AppRecord, ManifestPlatform};

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical application identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(String);

impl AppId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AppId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Errors from platform service lookups.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("No application registered for process {0}")]
    UnknownPid(i32),
    #[error("Unknown application: {0}")]
    UnknownApp(AppId),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result of comparing two applications' signing certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertMatch {
    Match,
    Mismatch,
}

/// Maps a connected peer's process identifier to its application identifier.
pub trait IdentityService: Send + Sync {
    fn app_id_for_pid(&self, pid: i32) -> Result<AppId, PlatformError>;
}

/// Answers preload and certificate questions about installed applications.
pub trait PackageManager: Send + Sync {
    /// Whether the application shipped with the device image. Unknown
    /// applications are reported as not preloaded.
    fn is_preload(&self, app_id: &AppId) -> bool;

    /// Compare the signing-certificate fingerprints of two applications.
    fn compare_certificates(&self, a: &AppId, b: &AppId) -> Result<CertMatch, PlatformError>;
}
