//! The single VLESS Reality node this tool deploys.
//!
//! - **codec** — `config.json` encode/decode.
//! - **share** — `vless://` import URI.

pub mod codec;
pub mod share;

use tracing::info;

use crate::config::{NodeDefaults, PortRange};
use crate::error::AppError;
use crate::identity;

pub use codec::{decode, encode, read_config, write_config};
pub use share::share_uri;

/// Identity of one proxy endpoint.
///
/// Created once per install; a refresh replaces the whole node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub port: u16,
    pub uuid: String,
    pub server_name: String,
    pub handshake_host: String,
    pub handshake_port: u16,
    pub flow: String,
    pub fingerprint: String,
    /// X25519 private key, URL-safe unpadded base64.
    pub private_key: String,
    pub short_id: String,
}

impl Node {
    /// Generate a node with fresh keys, id, short id and a free port.
    pub fn generate(defaults: &NodeDefaults, ports: &PortRange) -> Result<Self, AppError> {
        let port = identity::allocate_free_port(ports)?;
        let uuid = identity::new_identifier()?;
        let short_id = identity::new_short_id()?;
        let keys = identity::generate_keypair()?;

        info!(port, %uuid, "generated node");

        Ok(Self {
            port,
            uuid,
            server_name: defaults.server_name.clone(),
            handshake_host: defaults.handshake_host.clone(),
            handshake_port: defaults.handshake_port,
            flow: defaults.flow.clone(),
            fingerprint: defaults.fingerprint.clone(),
            private_key: keys.private_key,
            short_id,
        })
    }
}
