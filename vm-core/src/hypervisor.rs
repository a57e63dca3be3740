//! Hypervisor executable discovery.
//!
//! Nothing here is cached: the tool can be uninstalled or moved between two
//! lifecycle operations, so callers resolve again before each one.

use std::path::{Component, Path, PathBuf};

use tracing::debug;
use which::which;

use crate::error::{Result, VmError};

/// Turn the configured hypervisor location into an executable path.
///
/// A bare program name (no path separator) is looked up on `PATH`. Anything
/// else must point at an existing regular file, and on Unix that file must
/// carry at least one execute bit.
pub fn resolve_executable(configured: &Path) -> Result<PathBuf> {
    if configured.as_os_str().is_empty() {
        return Err(unavailable(configured, "no hypervisor path configured"));
    }

    if is_bare_program_name(configured) {
        return which(configured).map_err(|e| {
            unavailable(configured, &format!("not found on PATH ({})", e))
        });
    }

    let metadata = std::fs::metadata(configured)
        .map_err(|e| unavailable(configured, &format!("cannot access file ({})", e)))?;

    if !metadata.is_file() {
        return Err(unavailable(configured, "not a regular file"));
    }

    if !is_executable(&metadata) {
        return Err(unavailable(configured, "file is not executable"));
    }

    debug!("Resolved hypervisor executable: {}", configured.display());
    Ok(configured.to_path_buf())
}

fn is_bare_program_name(path: &Path) -> bool {
    let mut components = path.components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    true
}

fn unavailable(path: &Path, reason: &str) -> VmError {
    VmError::Unavailable {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
