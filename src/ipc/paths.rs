//! Socket path resolution.
//!
//! The socket lives in the first usable runtime directory:
//!
//! 1. `$XDG_RUNTIME_DIR`
//! 2. `/run/user/<uid>` if it exists
//! 3. `/tmp/termtile-<uid>`, created with mode `0700`

use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// File name of the daemon socket inside the runtime directory.
pub const SOCKET_NAME: &str = "termtile.sock";

/// Errors from resolving the runtime directory.
#[derive(Debug, thiserror::Error)]
#[error("cannot prepare runtime directory {path}: {source}")]
pub struct RuntimeDirError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Where the runtime directory comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeDir {
    /// Provided by the environment or the system; used as-is.
    Existing(PathBuf),
    /// Private fallback that must be created before use.
    Fallback(PathBuf),
}

/// Pick the runtime directory from already-gathered inputs.
///
/// `xdg_runtime_dir` is the raw environment value (empty counts as unset);
/// `run_user_exists` reports whether `/run/user/<uid>` is present.
pub fn choose_runtime_dir(
    xdg_runtime_dir: Option<PathBuf>,
    uid: u32,
    run_user_exists: impl FnOnce(&Path) -> bool,
) -> RuntimeDir {
    if let Some(dir) = xdg_runtime_dir.filter(|d| !d.as_os_str().is_empty()) {
        return RuntimeDir::Existing(dir);
    }
    let run_user = PathBuf::from(format!("/run/user/{}", uid));
    if run_user_exists(&run_user) {
        return RuntimeDir::Existing(run_user);
    }
    RuntimeDir::Fallback(PathBuf::from(format!("/tmp/termtile-{}", uid)))
}

fn current_uid() -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail.
    unsafe { libc::getuid() }
}

/// Resolve the socket path for the current user, creating the fallback
/// directory when needed.
pub fn socket_path() -> Result<PathBuf, RuntimeDirError> {
    let dir = choose_runtime_dir(
        std::env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from),
        current_uid(),
        |p| p.is_dir(),
    );
    let dir = match dir {
        RuntimeDir::Existing(dir) => dir,
        RuntimeDir::Fallback(dir) => {
            ensure_private_dir(&dir)?;
            dir
        }
    };
    Ok(dir.join(SOCKET_NAME))
}

fn ensure_private_dir(dir: &Path) -> Result<(), RuntimeDirError> {
    let wrap = |source| RuntimeDirError {
        path: dir.to_path_buf(),
        source,
    };
    if !dir.is_dir() {
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dir)
            .map_err(wrap)?;
    }
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).map_err(wrap)
}
