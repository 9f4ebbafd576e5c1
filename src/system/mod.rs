//! Host primitives — external command execution and best-effort bookkeeping.
//!
//! All process execution goes through [`CommandRunner`] so the OpenRC and
//! BBR controllers can be driven by a recording fake in tests. The real
//! implementation is [`SystemRunner`].

pub mod fs;
pub mod preflight;

#[cfg(test)]
pub(crate) mod fake;

use std::{future::Future, pin::Pin, process::Stdio};

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AppError;

pub type RunFuture<'a> = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

/// Executes host commands.
///
/// `run` resolves to `Ok(())` on exit status 0. Any other outcome is an
/// [`AppError::Command`] whose message carries the combined stdout/stderr, or
/// [`AppError::Cancelled`] if `cancel` fired first.
pub trait CommandRunner: Send + Sync {
    /// Returns `true` if `program` resolves to an executable on `PATH`.
    fn exists(&self, program: &str) -> bool;

    fn run<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        program: &'a str,
        args: &'a [&'a str],
    ) -> RunFuture<'a>;
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn exists(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }

    fn run<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        program: &'a str,
        args: &'a [&'a str],
    ) -> RunFuture<'a> {
        Box::pin(async move {
            debug!(program, ?args, "exec");

            // kill_on_drop: losing the select below must not leave an orphan.
            let mut command = Command::new(program);
            command.args(args).stdin(Stdio::null()).kill_on_drop(true);
            let child = command.output();

            let output = tokio::select! {
                biased;

                _ = cancel.cancelled() => return Err(AppError::Cancelled),

                out = child => out.map_err(|e| command_error(program, args, e.to_string()))?,
            };

            if output.status.success() {
                return Ok(());
            }

            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push(' ');
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            Err(command_error(
                program,
                args,
                format!("{}: {}", output.status, combined),
            ))
        })
    }
}

/// Builds a single-line [`AppError::Command`].
pub fn command_error(program: &str, args: &[&str], output: String) -> AppError {
    AppError::Command {
        program: program.to_string(),
        args: args.join(" "),
        output: output.split_whitespace().collect::<Vec<_>>().join(" "),
    }
}

// ── best-effort steps ────────────────────────────────────────────────────────

/// Result of a step whose failure is tolerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BestEffort {
    Done,
    /// Attempted; the failure was swallowed.
    Ignored(String),
}

/// One best-effort step and how it went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// The command line, e.g. `"rc-update del sing-box default"`.
    pub step: String,
    pub outcome: BestEffort,
}

impl Attempt {
    pub fn ignored(&self) -> bool {
        matches!(self.outcome, BestEffort::Ignored(_))
    }
}

/// Run a command whose failure is not fatal.
///
/// Every error except cancellation is recorded and swallowed; cancellation
/// still aborts the caller's pipeline.
pub async fn attempt(
    runner: &dyn CommandRunner,
    cancel: &CancellationToken,
    program: &str,
    args: &[&str],
) -> Result<Attempt, AppError> {
    let step = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");

    let outcome = match runner.run(cancel, program, args).await {
        Ok(()) => BestEffort::Done,
        Err(AppError::Cancelled) => return Err(AppError::Cancelled),
        Err(e) => {
            warn!(%step, error = %e, "best-effort step failed; continuing");
            BestEffort::Ignored(e.to_string())
        }
    };

    Ok(Attempt { step, outcome })
}
