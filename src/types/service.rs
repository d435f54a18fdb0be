//! Service descriptors and their content fingerprints
//!
//! A descriptor is identified by what it says, not where it came from: two
//! announcements with the same address, port and endpoint are the same
//! logical service, on the client and in the registry alike.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Prefix for storage keys derived from a fingerprint
pub const KEY_PREFIX: &str = "service";

/// A service announced to the registry
///
/// Field order is part of the fingerprint; do not reorder.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Service {
    /// Network address (hostname or IP)
    pub address: String,
    /// Port the callback endpoint listens on
    pub port: u16,
    /// Callback path, e.g. "/webhook"
    pub endpoint: String,
}

impl Service {
    /// Create a new service descriptor
    pub fn new(address: impl Into<String>, port: u16, endpoint: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port,
            endpoint: endpoint.into(),
        }
    }

    /// Content fingerprint of this descriptor
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }

    /// URL the dispatcher posts messages to
    pub fn callback_url(&self) -> String {
        format!("http://{}:{}{}", self.address, self.port, self.endpoint)
    }

    /// Form fields for the registration endpoint
    pub fn form_fields(&self) -> [(&'static str, String); 3] {
        [
            ("address", self.address.clone()),
            ("port", self.port.to_string()),
            ("endpoint", self.endpoint.clone()),
        ]
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.address, self.port, self.endpoint)
    }
}

/// SHA-256 over the canonical JSON form of a [`Service`]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Compute the fingerprint of a service
    pub fn of(service: &Service) -> Self {
        // Struct serialization keeps declaration order, so the bytes are
        // stable across processes.
        let canonical =
            serde_json::to_vec(service).unwrap_or_else(|_| service.to_string().into_bytes());

        let digest = Sha256::digest(&canonical);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Key used in the backing store: `service-<hex>`
    pub fn storage_key(&self) -> String {
        format!("{}-{}", KEY_PREFIX, self.to_hex())
    }

    /// Short form for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}
