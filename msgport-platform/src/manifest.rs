//! JSON-manifest-backed platform information.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{AppId, CertMatch, IdentityService, PackageManager, PlatformError};

/// One installed application as described by the platform manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    /// Canonical application identifier.
    pub app_id: AppId,
    /// Whether the application shipped with the device image.
    #[serde(default)]
    pub preloaded: bool,
    /// Signing-certificate fingerprint.
    pub certificate: String,
    /// Process identifiers currently running this application.
    #[serde(default)]
    pub pids: Vec<i32>,
}

/// Platform information loaded from a JSON manifest file.
///
/// Stands in for the device's package-manager and identity services: the
/// manifest lists each installed application with its certificate
/// fingerprint, preload flag, and running process identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestPlatform {
    pub apps: Vec<AppRecord>,
}

impl ManifestPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a manifest from a JSON file.
    pub fn load(path: &Path) -> Result<Self, PlatformError> {
        let content = fs::read_to_string(path)?;
        let manifest = serde_json::from_str(&content)?;
        Ok(manifest)
    }

    /// Save the manifest to a JSON file.
    pub fn save(&self, path: &Path) -> Result<(), PlatformError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Add or replace an application record.
    pub fn upsert(&mut self, record: AppRecord) {
        if let Some(existing) = self.apps.iter_mut().find(|a| a.app_id == record.app_id) {
            *existing = record;
        } else {
            self.apps.push(record);
        }
    }

    /// Associate a running process with an application.
    pub fn register_pid(&mut self, app_id: &AppId, pid: i32) -> Result<(), PlatformError> {
        let record = self
            .apps
            .iter_mut()
            .find(|a| &a.app_id == app_id)
            .ok_or_else(|| PlatformError::UnknownApp(app_id.clone()))?;
        if !record.pids.contains(&pid) {
            record.pids.push(pid);
        }
        Ok(())
    }

    fn record(&self, app_id: &AppId) -> Option<&AppRecord> {
        self.apps.iter().find(|a| &a.app_id == app_id)
    }
}

impl IdentityService for ManifestPlatform {
    fn app_id_for_pid(&self, pid: i32) -> Result<AppId, PlatformError> {
        self.apps
            .iter()
            .find(|a| a.pids.contains(&pid))
            .map(|a| a.app_id.clone())
            .ok_or(PlatformError::UnknownPid(pid))
    }
}

impl PackageManager for ManifestPlatform {
    fn is_preload(&self, app_id: &AppId) -> bool {
        self.record(app_id).is_some_and(|a| a.preloaded)
    }

    fn compare_certificates(&self, a: &AppId, b: &AppId) -> Result<CertMatch, PlatformError> {
        let left = self
            .record(a)
            .ok_or_else(|| PlatformError::UnknownApp(a.clone()))?;
        let right = self
            .record(b)
            .ok_or_else(|| PlatformError::UnknownApp(b.clone()))?;
        if left.certificate == right.certificate {
            Ok(CertMatch::Match)
        } else {
            Ok(CertMatch::Mismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> ManifestPlatform {
        ManifestPlatform {
            apps: vec![
                AppRecord {
                    app_id: AppId::from("com.example.alpha"),
                    preloaded: true,
                    certificate: "cert-a".to_string(),
                    pids: vec![100, 101],
                },
                AppRecord {
                    app_id: AppId::from("com.example.beta"),
                    preloaded: false,
                    certificate: "cert-a".to_string(),
                    pids: vec![200],
                },
                AppRecord {
                    app_id: AppId::from("com.example.gamma"),
                    preloaded: false,
                    certificate: "cert-g".to_string(),
                    pids: vec![],
                },
            ],
        }
    }

    #[test]
    fn test_identity_lookup() {
        let platform = sample();
        assert_eq!(
            platform.app_id_for_pid(101).unwrap(),
            AppId::from("com.example.alpha")
        );
        assert!(matches!(
            platform.app_id_for_pid(999),
            Err(PlatformError::UnknownPid(999))
        ));
    }

    #[test]
    fn test_is_preload() {
        let platform = sample();
        assert!(platform.is_preload(&AppId::from("com.example.alpha")));
        assert!(!platform.is_preload(&AppId::from("com.example.beta")));
        assert!(!platform.is_preload(&AppId::from("com.example.unknown")));
    }

    #[test]
    fn test_compare_certificates() {
        let platform = sample();
        let alpha = AppId::from("com.example.alpha");
        let beta = AppId::from("com.example.beta");
        let gamma = AppId::from("com.example.gamma");

        assert_eq!(
            platform.compare_certificates(&alpha, &beta).unwrap(),
            CertMatch::Match
        );
        assert_eq!(
            platform.compare_certificates(&alpha, &gamma).unwrap(),
            CertMatch::Mismatch
        );
        assert!(platform
            .compare_certificates(&alpha, &AppId::from("com.example.unknown"))
            .is_err());
    }

    #[test]
    fn test_register_pid() {
        let mut platform = sample();
        let gamma = AppId::from("com.example.gamma");
        platform.register_pid(&gamma, 300).unwrap();
        platform.register_pid(&gamma, 300).unwrap();
        assert_eq!(platform.app_id_for_pid(300).unwrap(), gamma);

        let unknown = AppId::from("com.example.unknown");
        assert!(platform.register_pid(&unknown, 400).is_err());
    }

    #[test]
    fn test_upsert_replaces() {
        let mut platform = sample();
        platform.upsert(AppRecord {
            app_id: AppId::from("com.example.beta"),
            preloaded: true,
            certificate: "cert-b2".to_string(),
            pids: vec![],
        });
        assert_eq!(platform.apps.len(), 3);
        assert!(platform.is_preload(&AppId::from("com.example.beta")));
    }

    #[test]
    fn test_manifest_file_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("platform.json");

        let platform = sample();
        platform.save(&path).unwrap();
        let loaded = ManifestPlatform::load(&path).unwrap();
        assert_eq!(platform, loaded);
    }

    #[test]
    fn test_manifest_load_minimal_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("platform.json");
        let json = r#"{
            "apps": [
                { "app_id": "com.example.solo", "certificate": "cert-s" }
            ]
        }"#;
        std::fs::write(&path, json).unwrap();

        let platform = ManifestPlatform::load(&path).unwrap();
        assert_eq!(platform.apps.len(), 1);
        assert!(!platform.apps[0].preloaded);
        assert!(platform.apps[0].pids.is_empty());
    }
}
