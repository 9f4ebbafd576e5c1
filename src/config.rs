//! Configuration loading with env-var overrides.
//!
//! Reads `$ALPINE_VLESS_CONFIG` or, failing that, `config/default.toml`
//! relative to the current working directory. The default file is optional:
//! a host that only has the binary runs on built-in defaults. Afterwards
//! `ALPINE_VLESS_HOME` and `ALPINE_VLESS_LOG_LEVEL` are applied on top.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Camouflage and transport parameters stamped onto every generated node.
///
/// The codec reuses these when decoding, because fingerprint and handshake
/// port are not persisted in the config document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDefaults {
    pub server_name: String,
    pub handshake_host: String,
    pub handshake_port: u16,
    pub flow: String,
    pub fingerprint: String,
}

impl Default for NodeDefaults {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            handshake_host: default_server_name(),
            handshake_port: default_handshake_port(),
            flow: default_flow(),
            fingerprint: default_fingerprint(),
        }
    }
}

/// Range probed by the port allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
    /// Bind attempts before giving up with `NoFreePort`.
    pub attempts: u32,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            min: default_port_min(),
            max: default_port_max(),
            attempts: default_port_attempts(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct ReleaseConfig {
    /// GitHub "latest release" API endpoint.
    pub api_url: String,
    /// Prefix for `v{ver}/sing-box-{ver}-linux-{arch}.tar.gz`.
    pub download_base: String,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// Data root override (already expanded, no `~`). `None` means "beside
    /// the executable".
    pub home_override: Option<PathBuf>,
    pub node: NodeDefaults,
    pub ports: PortRange,
    pub http: HttpConfig,
    pub release: ReleaseConfig,
    /// From `GITHUB_TOKEN` only. Never sourced from TOML.
    pub github_token: Option<String>,
}

/// Raw TOML shape — `serde` target before resolution.
#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    general: RawGeneral,
    #[serde(default)]
    node: RawNode,
    #[serde(default)]
    http: RawHttp,
    #[serde(default)]
    release: RawRelease,
}

#[derive(Deserialize)]
struct RawGeneral {
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    home: Option<String>,
}

impl Default for RawGeneral {
    fn default() -> Self {
        Self { log_level: default_log_level(), home: None }
    }
}

#[derive(Deserialize)]
struct RawNode {
    #[serde(default = "default_server_name")]
    server_name: String,
    /// Falls back to `server_name` when absent.
    #[serde(default)]
    handshake_host: Option<String>,
    #[serde(default = "default_handshake_port")]
    handshake_port: u16,
    #[serde(default = "default_flow")]
    flow: String,
    #[serde(default = "default_fingerprint")]
    fingerprint: String,
    #[serde(default = "default_port_min")]
    port_min: u16,
    #[serde(default = "default_port_max")]
    port_max: u16,
    #[serde(default = "default_port_attempts")]
    port_attempts: u32,
}

impl Default for RawNode {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            handshake_host: None,
            handshake_port: default_handshake_port(),
            flow: default_flow(),
            fingerprint: default_fingerprint(),
            port_min: default_port_min(),
            port_max: default_port_max(),
            port_attempts: default_port_attempts(),
        }
    }
}

#[derive(Deserialize)]
struct RawHttp {
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default = "default_user_agent")]
    user_agent: String,
}

impl Default for RawHttp {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Deserialize)]
struct RawRelease {
    #[serde(default = "default_api_url")]
    api_url: String,
    #[serde(default = "default_download_base")]
    download_base: String,
}

impl Default for RawRelease {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            download_base: default_download_base(),
        }
    }
}

fn default_log_level() -> String { "warn".to_string() }
fn default_server_name() -> String { "dash.cloudflare.com".to_string() }
fn default_handshake_port() -> u16 { 443 }
fn default_flow() -> String { "xtls-rprx-vision".to_string() }
fn default_fingerprint() -> String { "chrome".to_string() }
fn default_port_min() -> u16 { 20000 }
fn default_port_max() -> u16 { 60000 }
fn default_port_attempts() -> u32 { 100 }
fn default_timeout_seconds() -> u64 { 30 }
fn default_user_agent() -> String { "alpine-vless-installer".to_string() }
fn default_api_url() -> String {
    "https://api.github.com/repos/SagerNet/sing-box/releases/latest".to_string()
}
fn default_download_base() -> String {
    "https://github.com/SagerNet/sing-box/releases/download".to_string()
}

/// Load config, then apply env-var overrides.
pub fn load() -> Result<Config, AppError> {
    let home_override = env::var("ALPINE_VLESS_HOME").ok().filter(|v| !v.is_empty());
    let log_level_override = env::var("ALPINE_VLESS_LOG_LEVEL").ok().filter(|v| !v.is_empty());

    if let Ok(explicit) = env::var("ALPINE_VLESS_CONFIG") {
        return load_from(
            Path::new(&explicit),
            home_override.as_deref(),
            log_level_override.as_deref(),
        );
    }

    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    if default_path.exists() {
        load_from(default_path, home_override.as_deref(), log_level_override.as_deref())
    } else {
        resolve(
            RawConfig::default(),
            home_override.as_deref(),
            log_level_override.as_deref(),
        )
    }
}

/// Internal loader — accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    home_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    resolve(parsed, home_override, log_level_override)
}

fn resolve(
    parsed: RawConfig,
    home_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let n = parsed.node;

    if n.port_min == 0 || n.port_min > n.port_max {
        return Err(AppError::Config(format!(
            "invalid port range {}..={}",
            n.port_min, n.port_max
        )));
    }
    if n.port_attempts == 0 {
        return Err(AppError::Config("port_attempts must be at least 1".into()));
    }

    let home_override = home_override
        .map(str::to_string)
        .or(parsed.general.home)
        .map(|h| expand_home(&h));
    let log_level = log_level_override
        .map(str::to_string)
        .unwrap_or(parsed.general.log_level);

    Ok(Config {
        log_level,
        home_override,
        node: NodeDefaults {
            handshake_host: n.handshake_host.unwrap_or_else(|| n.server_name.clone()),
            server_name: n.server_name,
            handshake_port: n.handshake_port,
            flow: n.flow,
            fingerprint: n.fingerprint,
        },
        ports: PortRange {
            min: n.port_min,
            max: n.port_max,
            attempts: n.port_attempts,
        },
        http: HttpConfig {
            timeout_seconds: parsed.http.timeout_seconds,
            user_agent: parsed.http.user_agent,
        },
        release: ReleaseConfig {
            api_url: parsed.release.api_url,
            download_base: parsed.release.download_base,
        },
        github_token: env::var("GITHUB_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// Built-in defaults with no env lookups — safe for unit tests.
#[cfg(test)]
impl Config {
    pub fn test_default() -> Self {
        Self {
            log_level: "warn".into(),
            home_override: None,
            node: NodeDefaults::default(),
            ports: PortRange::default(),
            http: HttpConfig {
                timeout_seconds: 1,
                user_agent: default_user_agent(),
            },
            release: ReleaseConfig {
                api_url: "http://127.0.0.1:0/latest".into(),
                download_base: "http://127.0.0.1:0/download".into(),
            },
            github_token: None,
        }
    }
}
