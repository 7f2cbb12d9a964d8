//! Socket path resolution for connecting to a display server.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory holding the server socket. Required.
pub const RUNTIME_DIR_ENV: &str = "XDG_RUNTIME_DIR";

/// Name of the server socket inside the runtime directory. Optional.
pub const DISPLAY_ENV: &str = "WAYLAND_DISPLAY";

/// Inherited, already connected socket passed by file descriptor number.
pub const SOCKET_FD_ENV: &str = "WAYLAND_SOCKET";

/// Socket name used when neither the caller nor the environment names one.
pub const DEFAULT_DISPLAY: &str = "wayland-0";

/// Configuration error raised before any connection attempt.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SocketPathError {
    #[error("{RUNTIME_DIR_ENV} is not set")]
    MissingRuntimeDir,

    #[error("{SOCKET_FD_ENV} is not a file descriptor number: {0:?}")]
    InvalidSocketFd(String),
}

/// Resolve the server socket path from the process environment.
///
/// Resolution order for the socket name:
/// 1. `name`, when given
/// 2. `WAYLAND_DISPLAY`
/// 3. `wayland-0`
///
/// Absolute names are used as-is; relative ones are joined to
/// `XDG_RUNTIME_DIR`, which must then be set.
pub fn resolve_socket_path(name: Option<&str>) -> Result<PathBuf, SocketPathError> {
    let runtime_dir = std::env::var(RUNTIME_DIR_ENV).ok();
    let display = std::env::var(DISPLAY_ENV).ok();
    socket_path_from(name, display.as_deref(), runtime_dir.as_deref())
}

/// Pure form of [`resolve_socket_path`] taking the environment as arguments.
pub fn socket_path_from(
    name: Option<&str>,
    display: Option<&str>,
    runtime_dir: Option<&str>,
) -> Result<PathBuf, SocketPathError> {
    let name = name
        .filter(|n| !n.is_empty())
        .or(display.filter(|d| !d.is_empty()))
        .unwrap_or(DEFAULT_DISPLAY);

    if Path::new(name).is_absolute() {
        return Ok(PathBuf::from(name));
    }

    match runtime_dir {
        Some(dir) if !dir.is_empty() => Ok(Path::new(dir).join(name)),
        _ => Err(SocketPathError::MissingRuntimeDir),
    }
}

/// Parse `WAYLAND_SOCKET`, returning the inherited descriptor number if set.
pub fn inherited_socket_fd() -> Result<Option<i32>, SocketPathError> {
    match std::env::var(SOCKET_FD_ENV) {
        Ok(value) => parse_socket_fd(&value).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_socket_fd(value: &str) -> Result<i32, SocketPathError> {
    value
        .trim()
        .parse::<i32>()
        .ok()
        .filter(|fd| *fd >= 0)
        .ok_or_else(|| SocketPathError::InvalidSocketFd(value.to_owned()))
}
