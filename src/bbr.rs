//! BBR congestion control (`fq` qdisc + `bbr`), applied now and persisted
//! for boot.
//!
//! A straight pipeline, safe to re-run:
//!   1. snapshot current values (reporting only)
//!   2. best-effort `modprobe sch_fq tcp_bbr`
//!   3. check the kernel offers `bbr`
//!   4. `sysctl -w` both keys
//!   5. read back and verify
//!   6. persist the sysctl file (guarded) and the module list
//!   7. best-effort register/restart the boot replay services

use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::AppError;
use crate::guard::{self, MANAGED_MARKER};
use crate::system::fs::read_trimmed;
use crate::system::{Attempt, CommandRunner, attempt};

pub const TARGET_ALGORITHM: &str = "bbr";
pub const TARGET_QDISC: &str = "fq";
pub const ALGORITHM_MODULE: &str = "tcp_bbr";
pub const QDISC_MODULE: &str = "sch_fq";

const KEY_QDISC: &str = "net.core.default_qdisc";
const KEY_ALGORITHM: &str = "net.ipv4.tcp_congestion_control";
const KEY_AVAILABLE: &str = "net.ipv4.tcp_available_congestion_control";

/// Where kernel state is read and persisted.
#[derive(Debug, Clone)]
pub struct TuningPaths {
    /// Usually `/proc/sys`.
    pub proc_sys: PathBuf,
    pub sysctl_conf: PathBuf,
    pub modules_file: PathBuf,
}

impl Default for TuningPaths {
    fn default() -> Self {
        Self {
            proc_sys: PathBuf::from("/proc/sys"),
            sysctl_conf: PathBuf::from("/etc/sysctl.d/99-alpine-vless-bbr.conf"),
            modules_file: PathBuf::from("/etc/modules"),
        }
    }
}

impl TuningPaths {
    /// `/proc/sys` file for a dotted sysctl key.
    pub fn proc_file(&self, key: &str) -> PathBuf {
        self.proc_sys.join(key.replace('.', "/"))
    }
}

#[derive(Debug, Clone)]
pub struct TuningReport {
    /// Both values were already on target before this run.
    pub already_enabled: bool,
    pub congestion_control: String,
    pub default_qdisc: String,
    pub available_algorithms: String,
    pub best_effort: Vec<Attempt>,
}

pub struct BbrTuner<'a> {
    runner: &'a dyn CommandRunner,
    cancel: &'a CancellationToken,
    paths: &'a TuningPaths,
}

impl<'a> BbrTuner<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        cancel: &'a CancellationToken,
        paths: &'a TuningPaths,
    ) -> Self {
        Self { runner, cancel, paths }
    }

    pub async fn enable(&self) -> Result<TuningReport, AppError> {
        if !self.runner.exists("sysctl") {
            return Err(AppError::ApplyFailed("sysctl command not found".into()));
        }

        let before_cc = self.read_key(KEY_ALGORITHM).unwrap_or_default();
        let before_qdisc = self.read_key(KEY_QDISC).unwrap_or_default();
        let already_enabled = before_cc == TARGET_ALGORITHM && before_qdisc == TARGET_QDISC;
        debug!(%before_cc, %before_qdisc, already_enabled, "current tcp tuning");

        let mut best_effort = Vec::new();
        if self.runner.exists("modprobe") {
            for module in [QDISC_MODULE, ALGORITHM_MODULE] {
                best_effort.push(attempt(self.runner, self.cancel, "modprobe", &[module]).await?);
            }
        }

        // An unreadable list is not proof of absence; step 5 still verifies.
        let available = self.read_key(KEY_AVAILABLE).unwrap_or_default();
        if !available.is_empty() && !contains_word(&available, TARGET_ALGORITHM) {
            return Err(AppError::UnsupportedKernel { available });
        }

        for setting in [
            format!("{KEY_QDISC}={TARGET_QDISC}"),
            format!("{KEY_ALGORITHM}={TARGET_ALGORITHM}"),
        ] {
            match self.runner.run(self.cancel, "sysctl", &["-w", setting.as_str()]).await {
                Ok(()) => {}
                Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                Err(e) => return Err(AppError::ApplyFailed(e.to_string())),
            }
        }

        let congestion_control = self.read_key(KEY_ALGORITHM)?;
        let default_qdisc = self.read_key(KEY_QDISC)?;
        if congestion_control != TARGET_ALGORITHM || default_qdisc != TARGET_QDISC {
            return Err(AppError::NotEffective { congestion_control, default_qdisc });
        }

        guard::install(&self.paths.sysctl_conf, &sysctl_conf_content(), 0o644)?;
        if ensure_module_listed(&self.paths.modules_file, ALGORITHM_MODULE)? {
            info!(module = ALGORITHM_MODULE, file = %self.paths.modules_file.display(), "module persisted");
        }

        let conf = self.paths.sysctl_conf.to_string_lossy();
        best_effort.push(attempt(self.runner, self.cancel, "sysctl", &["-p", conf.as_ref()]).await?);
        if self.runner.exists("rc-update") {
            for unit in ["sysctl", "modules"] {
                best_effort.push(attempt(self.runner, self.cancel, "rc-update", &["add", unit, "boot"]).await?);
            }
        }
        if self.runner.exists("rc-service") {
            for unit in ["sysctl", "modules"] {
                best_effort.push(attempt(self.runner, self.cancel, "rc-service", &[unit, "restart"]).await?);
            }
        }

        info!(%congestion_control, %default_qdisc, already_enabled, "bbr enabled");
        Ok(TuningReport {
            already_enabled,
            congestion_control,
            default_qdisc,
            available_algorithms: available,
            best_effort,
        })
    }

    fn read_key(&self, key: &str) -> Result<String, AppError> {
        Ok(read_trimmed(&self.paths.proc_file(key))?)
    }
}

pub fn sysctl_conf_content() -> String {
    format!("{MANAGED_MARKER}\n{KEY_QDISC}={TARGET_QDISC}\n{KEY_ALGORITHM}={TARGET_ALGORITHM}\n")
}

/// Append `module` to a boot module list unless already present.
///
/// A line equal to `module`, or `module` followed by parameters, counts as
/// present. Other lines are kept as-is. Returns `true` if a line was added.
pub fn ensure_module_listed(path: &Path, module: &str) -> Result<bool, AppError> {
    let existing = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            fs::write(path, format!("{module}\n"))?;
            return Ok(true);
        }
        Err(e) => return Err(e.into()),
    };

    let listed = existing.lines().map(str::trim).any(|line| {
        line == module
            || line
                .strip_prefix(module)
                .is_some_and(|rest| rest.starts_with(char::is_whitespace))
    });
    if listed {
        return Ok(false);
    }

    let mut file = OpenOptions::new().append(true).open(path)?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        file.write_all(b"\n")?;
    }
    file.write_all(format!("{module}\n").as_bytes())?;
    Ok(true)
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack.split_whitespace().any(|w| w == word)
}
