//! OpenRC service lifecycle for the sing-box process.
//!
//! The init script is a guarded file (see [`crate::guard`]). Stop and
//! deregister steps are best-effort: a service that is already stopped or
//! was never added to a runlevel must not block install or uninstall.

use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AppError;
use crate::guard::{self, MANAGED_MARKER, ResourceState};
use crate::paths::ServiceDescriptor;
use crate::system::{Attempt, CommandRunner, attempt};

const DEFAULT_RUNLEVEL: &str = "default";

/// Render the init script for `svc`.
pub fn render_service(svc: &ServiceDescriptor) -> String {
    format!(
        r#"#!/sbin/openrc-run
{MANAGED_MARKER}
command="{command}"
command_args="run -c \"{config}\""
command_background=yes
pidfile="{pid}"
output_log="{out}"
error_log="{err}"

depend() {{
    need net
}}
"#,
        command = svc.command.display(),
        config = svc.config_path.display(),
        pid = svc.pid_file.display(),
        out = svc.output_log.display(),
        err = svc.error_log.display(),
    )
}

/// Drives `rc-service` / `rc-update` through a [`CommandRunner`].
pub struct OpenRc<'a> {
    runner: &'a dyn CommandRunner,
    cancel: &'a CancellationToken,
}

impl<'a> OpenRc<'a> {
    pub fn new(runner: &'a dyn CommandRunner, cancel: &'a CancellationToken) -> Self {
        Self { runner, cancel }
    }

    /// Write the init script. A foreign script at the same path is an
    /// [`AppError::OwnershipConflict`].
    pub fn install(&self, svc: &ServiceDescriptor) -> Result<ResourceState, AppError> {
        guard::install(&svc.file, &render_service(svc), 0o755)
    }

    /// Add to the default runlevel (best-effort), then restart, falling back
    /// to a plain start. Only the final start failure is returned.
    pub async fn enable_and_start(&self, name: &str) -> Result<Vec<Attempt>, AppError> {
        let added = attempt(self.runner, self.cancel, "rc-update", &["add", name, DEFAULT_RUNLEVEL]).await?;

        match self.runner.run(self.cancel, "rc-service", &[name, "restart"]).await {
            Ok(()) => {}
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            Err(e) => {
                info!(service = name, error = %e, "restart failed; trying start");
                self.runner.run(self.cancel, "rc-service", &[name, "start"]).await?;
            }
        }

        info!(service = name, "service running");
        Ok(vec![added])
    }

    /// Absorb a service installed under an older name.
    ///
    /// Only acts when `legacy_file` is ours. Stop and deregister are
    /// best-effort; failing to delete the file is returned.
    pub async fn migrate_legacy(
        &self,
        legacy_name: &str,
        legacy_file: &Path,
    ) -> Result<Vec<Attempt>, AppError> {
        if !guard::is_claimed(legacy_file) {
            return Ok(Vec::new());
        }

        info!(service = legacy_name, "removing legacy service");
        let steps = vec![
            attempt(self.runner, self.cancel, "rc-service", &[legacy_name, "stop"]).await?,
            attempt(self.runner, self.cancel, "rc-update", &["del", legacy_name, DEFAULT_RUNLEVEL]).await?,
        ];
        guard::remove(legacy_file)?;
        Ok(steps)
    }

    /// Stop, deregister and delete the service, then sweep any legacy
    /// leftovers. Refuses if the script at `svc.file` is foreign.
    pub async fn stop_disable_and_remove(
        &self,
        svc: &ServiceDescriptor,
        legacy_name: &str,
        legacy_file: &Path,
    ) -> Result<Vec<Attempt>, AppError> {
        guard::ensure_not_foreign(&svc.file)?;

        let mut steps = vec![
            attempt(self.runner, self.cancel, "rc-service", &[svc.name.as_str(), "stop"]).await?,
            attempt(self.runner, self.cancel, "rc-update", &["del", svc.name.as_str(), DEFAULT_RUNLEVEL]).await?,
        ];
        guard::remove(&svc.file)?;

        match self.migrate_legacy(legacy_name, legacy_file).await {
            Ok(legacy) => steps.extend(legacy),
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            Err(e) => warn!(error = %e, "legacy cleanup failed; continuing"),
        }

        info!(service = %svc.name, "service removed");
        Ok(steps)
    }
}
