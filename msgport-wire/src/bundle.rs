//! String key/value bundle used for both user payloads and system envelopes.

use std::collections::btree_map;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// System bundle keys attached by the proxy and stripped before delivery.
pub mod keys {
    pub const MESSAGE_TYPE: &str = "MESSAGE_TYPE";

    pub const LOCAL_APPID: &str = "LOCAL_APPID";
    pub const LOCAL_PORT: &str = "LOCAL_PORT";
    pub const TRUSTED_LOCAL: &str = "TRUSTED_LOCAL";

    pub const REMOTE_APPID: &str = "REMOTE_APPID";
    pub const REMOTE_PORT: &str = "REMOTE_PORT";
    pub const TRUSTED_REMOTE: &str = "TRUSTED_REMOTE";
    pub const TRUSTED_MESSAGE: &str = "TRUSTED_MESSAGE";

    pub const UNI_DIR: &str = "UNI-DIR";
    pub const BI_DIR: &str = "BI-DIR";
}

/// Encode a trust flag the way it travels in system keys.
pub fn flag(trusted: bool) -> &'static str {
    if trusted {
        "TRUE"
    } else {
        "FALSE"
    }
}

/// An unordered string-to-string mapping, serializable to a byte sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bundle {
    entries: BTreeMap<String, String>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.entries.iter()
    }

    /// Merge `other` into `self`; entries in `other` overwrite existing keys.
    pub fn merge_from(&mut self, other: &Bundle) {
        for (k, v) in other.iter() {
            self.entries.insert(k.clone(), v.clone());
        }
    }

    /// Encode to the canonical CBOR byte form.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| WireError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Reconstruct a bundle from its encoded byte form.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        ciborium::from_reader(bytes).map_err(|e| WireError::Decode(e.to_string()))
    }
}

impl FromIterator<(String, String)> for Bundle {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
