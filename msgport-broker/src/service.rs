//! Request handling and authorization for the message-port service.
//!
//! Pure broker logic over the registry and the platform services; socket
//! plumbing lives in [`crate::server`]. The authenticated application
//! identity of the requesting client always comes from the client record
//! established at hello time, never from client-supplied bundle keys.

use std::sync::Arc;

use msgport_platform::{AppId, CertMatch, PackageManager};
use msgport_wire::{keys, Bundle, ErrorCode};

use crate::registry::{ClientId, PortKey, PortRegistry};

/// A delivery the server loop must write to the destination's reverse
/// channel.
#[derive(Debug)]
pub struct Outbound {
    pub client: ClientId,
    pub metadata: Bundle,
    pub payload: Bundle,
}

pub struct MessagePortService {
    registry: PortRegistry,
    packages: Arc<dyn PackageManager>,
}

impl MessagePortService {
    pub fn new(packages: Arc<dyn PackageManager>) -> Self {
        Self {
            registry: PortRegistry::new(),
            packages,
        }
    }

    pub fn registry(&self) -> &PortRegistry {
        &self.registry
    }

    /// Handle `RegisterPort`. The registry key is formed from the
    /// authenticated identity; `LOCAL_APPID` in the bundle is ignored.
    pub fn register_port(
        &mut self,
        client: ClientId,
        client_app: &AppId,
        bundle: &Bundle,
    ) -> ErrorCode {
        let Some(port) = bundle.get(keys::LOCAL_PORT) else {
            return ErrorCode::InvalidParameter;
        };
        let Some(trusted) = bundle.get(keys::TRUSTED_LOCAL) else {
            return ErrorCode::InvalidParameter;
        };
        let trusted = trusted == "TRUE";

        tracing::info!("register message port {client_app}:{port} (trusted={trusted}) for client {client}");

        let key = PortKey::new(client_app.clone(), port);
        match self.registry.register(key, trusted, client) {
            Ok(()) => ErrorCode::None,
            Err(err) => {
                tracing::error!("{err}");
                ErrorCode::IoError
            }
        }
    }

    /// Handle `CheckRemotePort`: existence in the selected namespace, plus
    /// the trust check for trusted lookups.
    pub fn check_remote_port(&self, client_app: &AppId, bundle: &Bundle) -> ErrorCode {
        let (key, trusted) = match remote_key(bundle, keys::TRUSTED_REMOTE) {
            Some(parts) => parts,
            None => return ErrorCode::InvalidParameter,
        };

        tracing::debug!("check remote message port {}:{}", key.app_id, key.port);

        if self.registry.lookup(&key, trusted).is_none() {
            return ErrorCode::MessageportNotFound;
        }

        if trusted {
            return self.trust_check(client_app, &key.app_id);
        }
        ErrorCode::None
    }

    /// Handle `SendMessage`: resolve the destination, authorize trusted
    /// traffic, and synthesize the delivery envelope by merging metadata
    /// into the payload.
    pub fn send_message(
        &self,
        client_app: &AppId,
        metadata: &Bundle,
        payload: &Bundle,
    ) -> Result<Outbound, ErrorCode> {
        let (key, trusted) = remote_key(metadata, keys::TRUSTED_MESSAGE)
            .ok_or(ErrorCode::InvalidParameter)?;

        tracing::debug!("send message to {}:{}", key.app_id, key.port);

        let Some(owner) = self.registry.lookup(&key, trusted) else {
            return Err(ErrorCode::MessageportNotFound);
        };

        if trusted {
            let verdict = self.trust_check(client_app, &key.app_id);
            if !verdict.is_ok() {
                return Err(verdict);
            }
        }

        let mut merged = payload.clone();
        merged.merge_from(metadata);

        Ok(Outbound {
            client: owner,
            metadata: metadata.clone(),
            payload: merged,
        })
    }

    /// Purge every registration owned by a disconnected client.
    pub fn unregister_client(&mut self, client: ClientId) {
        self.registry.unregister_client(client);
    }

    /// Trusted traffic is allowed when both endpoints are preloaded or both
    /// are signed with the same certificate.
    fn trust_check(&self, local: &AppId, remote: &AppId) -> ErrorCode {
        if self.packages.is_preload(local) && self.packages.is_preload(remote) {
            return ErrorCode::None;
        }
        match self.packages.compare_certificates(local, remote) {
            Ok(CertMatch::Match) => ErrorCode::None,
            Ok(CertMatch::Mismatch) => {
                tracing::warn!("certificate mismatch between {local} and {remote}");
                ErrorCode::CertificateNotMatch
            }
            Err(err) => {
                tracing::error!("certificate lookup failed: {err}");
                ErrorCode::IoError
            }
        }
    }
}

fn remote_key(bundle: &Bundle, trust_key: &str) -> Option<(PortKey, bool)> {
    let app_id = bundle.get(keys::REMOTE_APPID)?;
    let port = bundle.get(keys::REMOTE_PORT)?;
    let trusted = bundle.get(trust_key)? == "TRUE";
    Some((PortKey::new(AppId::from(app_id), port), trusted))
}
