//! Host service socket location.
//!
//! The default path is resolved once per process and cached. Callers that
//! need a different socket pass an explicit override via config.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::constants::IPC_SOCKET_NAME;

static DEFAULT_SOCKET_PATH: LazyLock<PathBuf> = LazyLock::new(resolve_default);

/// Platform default socket path, resolved on first use.
pub fn default_socket_path() -> &'static Path {
    &DEFAULT_SOCKET_PATH
}

/// Socket path to connect to: the override when given, otherwise the default.
pub fn socket_path(override_path: Option<&Path>) -> PathBuf {
    override_path.map_or_else(|| default_socket_path().to_path_buf(), Path::to_path_buf)
}

#[cfg(windows)]
fn resolve_default() -> PathBuf {
    PathBuf::from(format!(r"\\?\pipe\{IPC_SOCKET_NAME}"))
}

#[cfg(not(windows))]
fn resolve_default() -> PathBuf {
    runtime_dir(|key| std::env::var_os(key)).join(IPC_SOCKET_NAME)
}

/// Per-user runtime directory the host service creates its socket in.
///
/// Order: `$XDG_RUNTIME_DIR`, `/run/user/<uid>` if present, then the usual
/// temp dir variables, then `/tmp`.
#[cfg(not(windows))]
fn runtime_dir(var: impl Fn(&str) -> Option<std::ffi::OsString>) -> PathBuf {
    if let Some(dir) = var("XDG_RUNTIME_DIR").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }

    // SAFETY: getuid has no preconditions and cannot fail.
    let uid = unsafe { libc::getuid() };
    let run_user = PathBuf::from(format!("/run/user/{uid}"));
    if run_user.is_dir() {
        return run_user;
    }

    ["TMPDIR", "TMP", "TEMP"]
        .iter()
        .find_map(|key| var(key).filter(|d| !d.is_empty()))
        .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins() {
        let custom = Path::new("/tmp/custom-ipc.sock");
        assert_eq!(socket_path(Some(custom)), PathBuf::from("/tmp/custom-ipc.sock"));
    }

    #[test]
    fn test_default_ends_with_socket_name() {
        assert!(default_socket_path().ends_with(IPC_SOCKET_NAME));
        assert_eq!(socket_path(None), default_socket_path());
    }

    #[test]
    fn test_default_is_stable() {
        assert!(std::ptr::eq(default_socket_path(), default_socket_path()));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_runtime_dir_prefers_xdg() {
        let dir = runtime_dir(|key| match key {
            "XDG_RUNTIME_DIR" => Some("/run/user/4242".into()),
            "TMPDIR" => Some("/var/tmp".into()),
            _ => None,
        });
        assert_eq!(dir, PathBuf::from("/run/user/4242"));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_runtime_dir_skips_empty_values() {
        let dir = runtime_dir(|key| match key {
            "XDG_RUNTIME_DIR" => Some("".into()),
            _ => None,
        });
        assert!(!dir.as_os_str().is_empty());
    }
}
