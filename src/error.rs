//! Application-wide error types.
//!
//! Every variant renders as a single line; the menu loop prints it verbatim.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unsupported environment: {0}")]
    EnvironmentUnsupported(String),

    #[error("root privileges required")]
    PrivilegeRequired,

    #[error("refusing to touch {}: file exists but is not managed by alpine-vless", path.display())]
    OwnershipConflict { path: PathBuf },

    #[error("crypto failure: {0}")]
    CryptoFailure(String),

    #[error("invalid private key encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("invalid private key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("malformed config: {0}")]
    MalformedConfig(String),

    #[error(
        "kernel does not offer bbr (tcp_available_congestion_control={available:?}); \
         install/load the tcp_bbr module or switch to a kernel with BBR"
    )]
    UnsupportedKernel { available: String },

    #[error("failed to apply sysctl: {0}")]
    ApplyFailed(String),

    #[error(
        "bbr not effective: tcp_congestion_control={congestion_control:?} default_qdisc={default_qdisc:?}"
    )]
    NotEffective {
        congestion_control: String,
        default_qdisc: String,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("no free port found after {attempts} attempts")]
    NoFreePort { attempts: u32 },

    #[error("`{program} {args}` failed: {output}")]
    Command {
        program: String,
        args: String,
        output: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
