//! Recording [`CommandRunner`] for unit tests.

use std::collections::HashSet;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use super::{CommandRunner, RunFuture, command_error};
use crate::error::AppError;

type Hook = Box<dyn Fn(&str, &[&str]) -> Result<(), AppError> + Send + Sync>;

/// Records every command line and fails the ones registered with [`fail`].
///
/// [`fail`]: FakeRunner::fail
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<String>>,
    missing: HashSet<String>,
    failing: Vec<String>,
    hook: Option<Hook>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `program` is not installed.
    pub fn missing(mut self, program: &str) -> Self {
        self.missing.insert(program.to_string());
        self
    }

    /// Fail every command line starting with `prefix`.
    pub fn fail(mut self, prefix: &str) -> Self {
        self.failing.push(prefix.to_string());
        self
    }

    /// Side effect run for every successful command (e.g. writing fake
    /// `/proc` files on `sysctl -w`).
    pub fn on_run(
        mut self,
        hook: impl Fn(&str, &[&str]) -> Result<(), AppError> + Send + Sync + 'static,
    ) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ran(&self, line: &str) -> bool {
        self.calls().iter().any(|c| c == line)
    }

    pub fn ran_prefix(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }
}

impl CommandRunner for FakeRunner {
    fn exists(&self, program: &str) -> bool {
        !self.missing.contains(program)
    }

    fn run<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        program: &'a str,
        args: &'a [&'a str],
    ) -> RunFuture<'a> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            let line = std::iter::once(program)
                .chain(args.iter().copied())
                .collect::<Vec<_>>()
                .join(" ");
            self.calls.lock().unwrap().push(line.clone());

            if self.failing.iter().any(|p| line.starts_with(p.as_str())) {
                return Err(command_error(program, args, "exit status: 1".into()));
            }
            match &self.hook {
                Some(hook) => hook(program, args),
                None => Ok(()),
            }
        })
    }
}
