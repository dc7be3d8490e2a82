//! Local port tables: callbacks and identifiers per trust namespace.

use std::collections::HashMap;
use std::sync::Arc;

use msgport_wire::Bundle;

/// Identifier of a locally registered port, unique within the proxy process.
pub type PortId = i32;

/// A message delivered to a registered port, with system metadata stripped.
#[derive(Clone)]
pub struct DeliveredMessage {
    pub port_id: PortId,
    /// Sender application; present for bidirectional messages.
    pub peer_app_id: Option<String>,
    /// Sender reply port; present for bidirectional messages.
    pub peer_port: Option<String>,
    /// Whether the sender's reply port is in the trusted namespace.
    pub trusted_peer: bool,
    pub bundle: Bundle,
}

/// Callback invoked on the proxy's reverse-channel task for each delivery.
pub type MessageCallback = Arc<dyn Fn(DeliveredMessage) + Send + Sync>;

#[derive(Default)]
struct Namespace {
    callbacks: HashMap<String, MessageCallback>,
    ids: HashMap<String, PortId>,
    names: HashMap<PortId, String>,
}

/// Registered ports of one proxy: two namespaces plus the identifier
/// counter. Identifiers are per `(namespace, name)` and stable for the
/// lifetime of the proxy.
#[derive(Default)]
pub(crate) struct PortTables {
    next_id: PortId,
    untrusted: Namespace,
    trusted: Namespace,
}

impl PortTables {
    fn namespace(&self, trusted: bool) -> &Namespace {
        if trusted {
            &self.trusted
        } else {
            &self.untrusted
        }
    }

    fn namespace_mut(&mut self, trusted: bool) -> &mut Namespace {
        if trusted {
            &mut self.trusted
        } else {
            &mut self.untrusted
        }
    }

    /// Existing identifier for `(name, trusted)`, if registered.
    pub fn existing_id(&self, name: &str, trusted: bool) -> Option<PortId> {
        self.namespace(trusted).ids.get(name).copied()
    }

    /// Replace the callback of an already-registered port.
    pub fn set_callback(&mut self, name: &str, trusted: bool, callback: MessageCallback) {
        self.namespace_mut(trusted)
            .callbacks
            .insert(name.to_string(), callback);
    }

    /// Register a new port, minting a fresh identifier.
    pub fn insert(&mut self, name: &str, trusted: bool, callback: MessageCallback) -> PortId {
        self.next_id += 1;
        let id = self.next_id;
        let namespace = self.namespace_mut(trusted);
        namespace.callbacks.insert(name.to_string(), callback);
        namespace.ids.insert(name.to_string(), id);
        namespace.names.insert(id, name.to_string());
        id
    }

    /// Callback and identifier bound to a delivery target, if any.
    pub fn delivery_target(&self, name: &str, trusted: bool) -> Option<(PortId, MessageCallback)> {
        let namespace = self.namespace(trusted);
        let id = namespace.ids.get(name)?;
        let callback = namespace.callbacks.get(name)?;
        Some((*id, callback.clone()))
    }

    /// Name and namespace bound to an identifier.
    pub fn name_of(&self, id: PortId) -> Option<(&str, bool)> {
        if let Some(name) = self.untrusted.names.get(&id) {
            return Some((name, false));
        }
        self.trusted.names.get(&id).map(|name| (name.as_str(), true))
    }
}
