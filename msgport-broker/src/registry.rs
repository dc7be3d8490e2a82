//! Port name registry: two disjoint namespaces mapping ports to owners.

use std::collections::HashMap;

use thiserror::Error;

use msgport_platform::AppId;

/// Broker-side client identifier: the peer's process id from its socket
/// credentials.
pub type ClientId = i32;

/// Registry key: owning application plus port name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortKey {
    pub app_id: AppId,
    pub port: String,
}

impl PortKey {
    pub fn new(app_id: AppId, port: impl Into<String>) -> Self {
        Self {
            app_id,
            port: port.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The same client registered the same port twice.
    #[error("Port {0}:{1} is already registered by this client")]
    AlreadyRegistered(AppId, String),
}

/// The two name-to-owner maps, one per trust namespace.
///
/// The same `(app, port)` pair may exist in both namespaces at once; they are
/// distinct ports.
#[derive(Debug, Default)]
pub struct PortRegistry {
    ports: HashMap<PortKey, ClientId>,
    trusted_ports: HashMap<PortKey, ClientId>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, trusted: bool) -> &HashMap<PortKey, ClientId> {
        if trusted {
            &self.trusted_ports
        } else {
            &self.ports
        }
    }

    fn map_mut(&mut self, trusted: bool) -> &mut HashMap<PortKey, ClientId> {
        if trusted {
            &mut self.trusted_ports
        } else {
            &mut self.ports
        }
    }

    /// Register `key` to `owner` in the selected namespace.
    ///
    /// A prior entry with a different owner is treated as stale and replaced;
    /// a prior entry with the same owner is an error and leaves the registry
    /// untouched.
    pub fn register(
        &mut self,
        key: PortKey,
        trusted: bool,
        owner: ClientId,
    ) -> Result<(), RegistryError> {
        let map = self.map_mut(trusted);
        if let Some(&existing) = map.get(&key) {
            if existing == owner {
                return Err(RegistryError::AlreadyRegistered(key.app_id, key.port));
            }
            tracing::info!(
                "evicting stale registration of {}:{} (owner {existing})",
                key.app_id,
                key.port
            );
            map.remove(&key);
        }
        map.insert(key, owner);
        Ok(())
    }

    /// Look up the owner of `key` in the selected namespace.
    pub fn lookup(&self, key: &PortKey, trusted: bool) -> Option<ClientId> {
        self.map(trusted).get(key).copied()
    }

    /// Remove every entry owned by `owner` from both namespaces.
    ///
    /// A full sweep; port counts per device are small enough that no
    /// secondary index is kept.
    pub fn unregister_client(&mut self, owner: ClientId) {
        self.ports.retain(|_, v| *v != owner);
        self.trusted_ports.retain(|_, v| *v != owner);
    }

    pub fn len(&self, trusted: bool) -> usize {
        self.map(trusted).len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty() && self.trusted_ports.is_empty()
    }
}
