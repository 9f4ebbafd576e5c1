//! Pre-flight checks run before any host mutation.

use std::{fs, path::Path};

use crate::error::AppError;

use super::CommandRunner;

const OS_RELEASE: &str = "/etc/os-release";

/// Linux, root, Alpine and OpenRC — in that order.
pub fn check(runner: &dyn CommandRunner) -> Result<(), AppError> {
    if !cfg!(target_os = "linux") {
        return Err(AppError::EnvironmentUnsupported(
            "only Linux (Alpine) is supported".into(),
        ));
    }
    if !is_root() {
        return Err(AppError::PrivilegeRequired);
    }
    if !is_alpine(Path::new(OS_RELEASE)) {
        return Err(AppError::EnvironmentUnsupported(
            "only Alpine Linux is supported".into(),
        ));
    }
    if !runner.exists("rc-service") || !runner.exists("rc-update") {
        return Err(AppError::EnvironmentUnsupported(
            "OpenRC not detected (rc-service/rc-update missing)".into(),
        ));
    }
    Ok(())
}

#[cfg(unix)]
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_root() -> bool {
    false
}

pub fn is_alpine(os_release: &Path) -> bool {
    fs::read_to_string(os_release)
        .ok()
        .and_then(|content| os_release_id(&content))
        .is_some_and(|id| id.eq_ignore_ascii_case("alpine"))
}

/// The first `ID=` value, unquoted.
pub fn os_release_id(content: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("ID="))
        .map(|v| v.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::fake::FakeRunner;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parses_quoted_and_bare_ids() {
        assert_eq!(os_release_id("NAME=\"Alpine Linux\"\nID=alpine\n").as_deref(), Some("alpine"));
        assert_eq!(os_release_id("ID=\"debian\"").as_deref(), Some("debian"));
        assert_eq!(os_release_id("ID_LIKE=debian\nVERSION_ID=12").as_deref(), None);
    }

    #[test]
    fn detects_alpine_from_file() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "NAME=\"Alpine Linux\"\nID='Alpine'\nVERSION_ID=3.20.0").unwrap();
        assert!(is_alpine(f.path()));
        assert!(!is_alpine(Path::new("/nonexistent/os-release")));
    }

    #[test]
    fn missing_openrc_or_privileges_fail_preflight() {
        let runner = FakeRunner::new().missing("rc-update");
        let err = check(&runner).unwrap_err();
        // Whichever gate trips first on the test host, it is a pre-flight error.
        assert!(matches!(
            err,
            AppError::EnvironmentUnsupported(_) | AppError::PrivilegeRequired
        ));
    }
}
