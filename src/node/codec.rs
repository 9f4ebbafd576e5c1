//! `config.json` encode/decode.
//!
//! The document holds one VLESS inbound with one user and one Reality short
//! id. Keys are emitted in sorted order so output is byte-stable for a given
//! node and diffs cleanly against configs written by earlier releases.
//!
//! Decoding is deliberately lossy: fingerprint and handshake port are not in
//! the document, so they come back as the configured defaults, and the
//! handshake host is taken from `server_name`.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::config::NodeDefaults;
use crate::error::AppError;
use crate::system::fs::write_atomic;

use super::Node;

// ── wire shape (write side) ──────────────────────────────────────────────────

#[derive(Serialize)]
struct Document<'a> {
    inbounds: [Inbound<'a>; 1],
    log: Log<'a>,
    outbounds: [Outbound; 2],
}

#[derive(Serialize)]
struct Log<'a> {
    level: &'static str,
    output: &'a str,
    timestamp: bool,
}

#[derive(Serialize)]
struct Inbound<'a> {
    listen: &'static str,
    listen_port: u16,
    tag: &'static str,
    tls: Tls<'a>,
    #[serde(rename = "type")]
    kind: &'static str,
    users: [User<'a>; 1],
}

#[derive(Serialize)]
struct User<'a> {
    flow: &'a str,
    uuid: &'a str,
}

#[derive(Serialize)]
struct Tls<'a> {
    enabled: bool,
    reality: Reality<'a>,
    server_name: &'a str,
}

#[derive(Serialize)]
struct Reality<'a> {
    enabled: bool,
    handshake: Handshake<'a>,
    private_key: &'a str,
    /// A list on the wire; this tool always writes exactly one.
    short_id: [&'a str; 1],
}

#[derive(Serialize)]
struct Handshake<'a> {
    server: &'a str,
    server_port: u16,
}

#[derive(Serialize)]
struct Outbound {
    tag: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
}

// ── wire shape (read side) ───────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    inbounds: Vec<RawInbound>,
}

#[derive(Deserialize)]
struct RawInbound {
    #[serde(default)]
    listen_port: u16,
    #[serde(default)]
    users: Vec<RawUser>,
    #[serde(default)]
    tls: RawTls,
}

#[derive(Deserialize)]
struct RawUser {
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    flow: String,
}

#[derive(Deserialize, Default)]
struct RawTls {
    #[serde(default)]
    server_name: String,
    #[serde(default)]
    reality: RawReality,
}

#[derive(Deserialize, Default)]
struct RawReality {
    #[serde(default)]
    private_key: String,
    #[serde(default)]
    short_id: Vec<String>,
}

// ── codec ────────────────────────────────────────────────────────────────────

/// Render the sing-box config for `node`, pretty-printed with a trailing newline.
pub fn encode(node: &Node, log_path: &Path) -> Result<String, AppError> {
    let log_output = log_path.to_string_lossy();
    let doc = Document {
        inbounds: [Inbound {
            listen: "::",
            listen_port: node.port,
            tag: "vless-reality",
            tls: Tls {
                enabled: true,
                reality: Reality {
                    enabled: true,
                    handshake: Handshake {
                        server: &node.handshake_host,
                        server_port: node.handshake_port,
                    },
                    private_key: &node.private_key,
                    short_id: [&node.short_id],
                },
                server_name: &node.server_name,
            },
            kind: "vless",
            users: [User { flow: &node.flow, uuid: &node.uuid }],
        }],
        log: Log { level: "info", output: &log_output, timestamp: true },
        outbounds: [
            Outbound { tag: "direct", kind: "direct" },
            Outbound { tag: "block", kind: "block" },
        ],
    };

    let mut out = serde_json::to_string_pretty(&doc)
        .map_err(|e| AppError::Config(format!("cannot serialise config: {e}")))?;
    out.push('\n');
    Ok(out)
}

/// Recover the node from a config document.
pub fn decode(document: &str, defaults: &NodeDefaults) -> Result<Node, AppError> {
    let raw: RawDocument = serde_json::from_str(document)
        .map_err(|e| AppError::MalformedConfig(format!("invalid JSON: {e}")))?;

    let inbound = raw
        .inbounds
        .into_iter()
        .next()
        .ok_or_else(|| AppError::MalformedConfig("missing inbounds".into()))?;
    let user = inbound
        .users
        .into_iter()
        .next()
        .ok_or_else(|| AppError::MalformedConfig("missing users".into()))?;
    let short_id = inbound
        .tls
        .reality
        .short_id
        .into_iter()
        .next()
        .ok_or_else(|| AppError::MalformedConfig("missing reality.short_id".into()))?;

    let server_name = inbound.tls.server_name;
    Ok(Node {
        port: inbound.listen_port,
        uuid: user.uuid,
        handshake_host: server_name.clone(),
        server_name,
        handshake_port: defaults.handshake_port,
        flow: user.flow,
        fingerprint: defaults.fingerprint.clone(),
        private_key: inbound.tls.reality.private_key,
        short_id,
    })
}

/// Encode and write `node` to `path` with mode 0600.
pub fn write_config(path: &Path, log_path: &Path, node: &Node) -> Result<(), AppError> {
    let doc = encode(node, log_path)?;
    write_atomic(path, doc.as_bytes(), 0o600)?;
    Ok(())
}

pub fn read_config(path: &Path, defaults: &NodeDefaults) -> Result<Node, AppError> {
    let doc = fs::read_to_string(path)?;
    decode(&doc, defaults)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::TempDir;

    fn sample_node() -> Node {
        Node {
            port: 34567,
            uuid: "0b7e2d3a-5c1f-4e8a-9d2b-6f1a3c4e5d6f".into(),
            server_name: "dash.cloudflare.com".into(),
            handshake_host: "dash.cloudflare.com".into(),
            handshake_port: 443,
            flow: "xtls-rprx-vision".into(),
            fingerprint: "chrome".into(),
            private_key: "cKYnG4y1cE6Jv2v0oZ1lBq8b1m3aQpM7hWJkJx9o0Wc".into(),
            short_id: "a1b2c3d4e5f60718".into(),
        }
    }

    #[test]
    fn round_trip_preserves_managed_fields() {
        let node = sample_node();
        let doc = encode(&node, Path::new("/data/sing-box.log")).unwrap();
        let back = decode(&doc, &NodeDefaults::default()).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn re_encoding_is_byte_identical() {
        let doc = encode(&sample_node(), Path::new("/data/sing-box.log")).unwrap();
        let back = decode(&doc, &NodeDefaults::default()).unwrap();
        assert_eq!(encode(&back, Path::new("/data/sing-box.log")).unwrap(), doc);
    }

    #[test]
    fn document_shape_matches_sing_box_schema() {
        let doc = encode(&sample_node(), Path::new("/data/sing-box.log")).unwrap();
        assert!(doc.ends_with("}\n"));

        let v: Value = serde_json::from_str(&doc).unwrap();
        let inbound = &v["inbounds"][0];
        assert_eq!(inbound["type"], "vless");
        assert_eq!(inbound["listen"], "::");
        assert_eq!(inbound["listen_port"], 34567);
        assert_eq!(inbound["tls"]["reality"]["short_id"].as_array().unwrap().len(), 1);
        assert_eq!(inbound["tls"]["reality"]["handshake"]["server_port"], 443);
        assert_eq!(v["log"]["output"], "/data/sing-box.log");
        assert_eq!(v["outbounds"][1]["type"], "block");
    }

    #[test]
    fn keys_are_emitted_in_sorted_order() {
        let doc = encode(&sample_node(), Path::new("/l")).unwrap();
        let i = |needle: &str| doc.find(needle).unwrap();
        assert!(i("\"inbounds\"") < i("\"log\""));
        assert!(i("\"log\"") < i("\"outbounds\""));
        assert!(i("\"listen\"") < i("\"listen_port\""));
        assert!(i("\"tls\"") < i("\"type\""));
    }

    #[test]
    fn decode_fills_unpersisted_fields_from_defaults() {
        let mut node = sample_node();
        node.fingerprint = "firefox".into();
        node.handshake_port = 8443;
        node.handshake_host = "other.example".into();

        let doc = encode(&node, Path::new("/l")).unwrap();
        let back = decode(&doc, &NodeDefaults::default()).unwrap();
        assert_eq!(back.fingerprint, "chrome");
        assert_eq!(back.handshake_port, 443);
        assert_eq!(back.handshake_host, back.server_name);
    }

    #[test]
    fn missing_structure_is_named() {
        let d = NodeDefaults::default();
        let cases = [
            (r#"{}"#, "inbounds"),
            (r#"{"inbounds":[{"listen_port":1}]}"#, "users"),
            (
                r#"{"inbounds":[{"users":[{"uuid":"u"}],"tls":{"reality":{"short_id":[]}}}]}"#,
                "reality.short_id",
            ),
        ];
        for (doc, field) in cases {
            let err = decode(doc, &d).unwrap_err();
            assert!(matches!(err, AppError::MalformedConfig(_)));
            assert!(err.to_string().contains(field), "{doc} -> {err}");
        }
        assert!(matches!(decode("not json", &d).unwrap_err(), AppError::MalformedConfig(_)));
    }

    #[test]
    fn write_and_read_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        write_config(&path, &dir.path().join("sing-box.log"), &sample_node()).unwrap();
        let node = read_config(&path, &NodeDefaults::default()).unwrap();
        assert_eq!(node, sample_node());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
