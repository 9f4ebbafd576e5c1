//! `vless://` import URI for client apps.

use std::net::IpAddr;

use reqwest::Url;

use crate::error::AppError;

use super::Node;

/// Host used when the public IP lookup failed; the operator edits it by hand.
pub const PLACEHOLDER_HOST: &str = "your_ip";

/// Build the share URI for `node`.
///
/// Query parameters are emitted sorted by key so the string is stable across
/// runs. An empty `public_ip` becomes [`PLACEHOLDER_HOST`].
pub fn share_uri(node: &Node, public_ip: &str, public_key: &str) -> Result<String, AppError> {
    let host = match public_ip.trim() {
        "" => PLACEHOLDER_HOST.to_string(),
        ip => match ip.parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) => format!("[{v6}]"),
            _ => ip.to_string(),
        },
    };

    let mut url = Url::parse(&format!("vless://{}@{}:{}", node.uuid, host, node.port))
        .map_err(|e| AppError::Config(format!("cannot build share URI for host {host}: {e}")))?;

    url.query_pairs_mut()
        .append_pair("encryption", "none")
        .append_pair("flow", &node.flow)
        .append_pair("fp", &node.fingerprint)
        .append_pair("pbk", public_key)
        .append_pair("security", "reality")
        .append_pair("sid", &node.short_id)
        .append_pair("sni", &node.server_name)
        .append_pair("type", "tcp");
    url.set_fragment(Some(&format!("alpine-reality-{}-{}", host, node.port)));

    Ok(url.into())
}
