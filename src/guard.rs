//! Ownership guard for files written outside the data root.
//!
//! Every such file carries [`MANAGED_MARKER`] in its header. A path is
//! `Unclaimed` (absent), `Claimed` (present, marker found) or `Foreign`
//! (present, no marker). Foreign files are never overwritten; the operator
//! has to move them out of the way.

use std::{
    fs,
    io::{self, ErrorKind},
    path::Path,
};

use tracing::{debug, info};

use crate::error::AppError;
use crate::system::fs::write_atomic;

pub const MANAGED_MARKER: &str = "# managed-by: alpine-vless";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Unclaimed,
    Claimed,
    Foreign,
}

/// Inspect `path`. Read errors other than "not found" propagate.
pub fn state(path: &Path) -> Result<ResourceState, AppError> {
    match fs::read(path) {
        Ok(bytes) if contains_marker(&bytes) => Ok(ResourceState::Claimed),
        Ok(_) => Ok(ResourceState::Foreign),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(ResourceState::Unclaimed),
        Err(e) => Err(e.into()),
    }
}

/// `true` iff the file exists and carries the marker.
pub fn is_claimed(path: &Path) -> bool {
    matches!(state(path), Ok(ResourceState::Claimed))
}

/// Fail with [`AppError::OwnershipConflict`] if `path` is foreign.
pub fn ensure_not_foreign(path: &Path) -> Result<ResourceState, AppError> {
    match state(path)? {
        ResourceState::Foreign => Err(AppError::OwnershipConflict { path: path.to_path_buf() }),
        other => Ok(other),
    }
}

/// Atomically write `content` to `path` unless a foreign file occupies it.
///
/// `content` must open with the marker, optionally preceded by a `#!` line.
/// Returns the state found before the write.
pub fn install(path: &Path, content: &str, mode: u32) -> Result<ResourceState, AppError> {
    if !has_marker_header(content) {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("content for {} lacks the ownership marker", path.display()),
        )
        .into());
    }

    let before = ensure_not_foreign(path)?;
    if before == ResourceState::Claimed && fs::read(path)? == content.as_bytes() {
        set_mode(path, mode)?;
        debug!(path = %path.display(), "managed file already up to date");
        return Ok(before);
    }
    write_atomic(path, content.as_bytes(), mode)?;
    info!(path = %path.display(), ?before, "managed file written");
    Ok(before)
}

/// Delete `path`. Already-absent is fine.
///
/// No ownership check: callers verify before removing anything they did not
/// just install.
pub fn remove(path: &Path) -> Result<(), AppError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "managed file removed");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), AppError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), AppError> {
    Ok(())
}

fn contains_marker(bytes: &[u8]) -> bool {
    let marker = MANAGED_MARKER.as_bytes();
    bytes.windows(marker.len()).any(|w| w == marker)
}

fn has_marker_header(content: &str) -> bool {
    let mut lines = content.lines();
    match lines.next() {
        Some(first) if first.starts_with("#!") => lines.next() == Some(MANAGED_MARKER),
        Some(first) => first == MANAGED_MARKER,
        None => false,
    }
}
