//! Filesystem layout.
//!
//! Everything the tool owns lives under one private data root:
//! ```text
//! <root>/
//! ├── sing-box          (downloaded binary, 0755)
//! ├── config.json       (node config, 0600)
//! ├── sing-box.log
//! ├── openrc.out.log
//! └── openrc.err.log
//! ```
//! The root is `$ALPINE_VLESS_HOME` when set, otherwise
//! `<exe_dir>/alpine-vless-data`. The OpenRC script is the only file written
//! outside it (plus the BBR persistence files, see [`crate::bbr`]).

use std::{
    env,
    path::{Component, Path, PathBuf},
};

use crate::error::AppError;

pub const SERVICE_NAME: &str = "alpine-vless";
pub const LEGACY_SERVICE_NAME: &str = "sing-box";

const INIT_DIR: &str = "/etc/init.d";
const RUN_DIR: &str = "/run";
const DATA_DIR_NAME: &str = "alpine-vless-data";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub root_dir: PathBuf,
    pub binary_path: PathBuf,
    pub config_path: PathBuf,
    pub log_path: PathBuf,
    pub openrc_out_log: PathBuf,
    pub openrc_err_log: PathBuf,
    pub service_name: String,
    pub service_file: PathBuf,
    pub legacy_service_name: String,
    pub legacy_service_file: PathBuf,
}

/// What the OpenRC script needs to know. Derived from [`Paths`], never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub file: PathBuf,
    pub command: PathBuf,
    pub config_path: PathBuf,
    pub pid_file: PathBuf,
    pub output_log: PathBuf,
    pub error_log: PathBuf,
}

impl Paths {
    /// Resolve the data root and derive every other path from it.
    pub fn discover(home_override: Option<&Path>) -> Result<Self, AppError> {
        if let Some(home) = home_override {
            let cwd = env::current_dir()?;
            let root = clean(&cwd.join(home));
            if root == Path::new("/") || root == cwd {
                return Err(AppError::Config(format!(
                    "ALPINE_VLESS_HOME={} is invalid: must not be the filesystem root or the current directory",
                    home.display()
                )));
            }
            return Ok(Self::from_root(root));
        }

        let exe = env::current_exe()?;
        let exe_dir = exe
            .parent()
            .filter(|d| !d.as_os_str().is_empty() && *d != Path::new("/"))
            .ok_or_else(|| {
                AppError::Config(format!(
                    "cannot determine a writable data directory next to {}",
                    exe.display()
                ))
            })?;

        Ok(Self::from_root(exe_dir.join(DATA_DIR_NAME)))
    }

    pub fn from_root(root_dir: PathBuf) -> Self {
        Self {
            binary_path: root_dir.join("sing-box"),
            config_path: root_dir.join("config.json"),
            log_path: root_dir.join("sing-box.log"),
            openrc_out_log: root_dir.join("openrc.out.log"),
            openrc_err_log: root_dir.join("openrc.err.log"),
            service_name: SERVICE_NAME.to_string(),
            service_file: Path::new(INIT_DIR).join(SERVICE_NAME),
            legacy_service_name: LEGACY_SERVICE_NAME.to_string(),
            legacy_service_file: Path::new(INIT_DIR).join(LEGACY_SERVICE_NAME),
            root_dir,
        }
    }

    pub fn service(&self) -> ServiceDescriptor {
        ServiceDescriptor {
            name: self.service_name.clone(),
            file: self.service_file.clone(),
            command: self.binary_path.clone(),
            config_path: self.config_path.clone(),
            pid_file: Path::new(RUN_DIR).join(format!("{}.pid", self.service_name)),
            output_log: self.openrc_out_log.clone(),
            error_log: self.openrc_err_log.clone(),
        }
    }
}

/// Lexically normalise an absolute path: drop `.`, resolve `..`.
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
