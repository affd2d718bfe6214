use camino::Utf8PathBuf;
use std::env;

#[cfg(unix)]
use dirs::runtime_dir;
#[cfg(unix)]
use libc::geteuid;

use crate::socket::SocketEndpoint;

/// Default TCP port used when Unix domain sockets are not available.
pub const DEFAULT_TCP_PORT: u16 = 9412;

/// Default log filter expression used by embedding modules.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

/// Default logging format for embedding modules.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Computes the default control-channel endpoint for a module.
pub fn default_control_endpoint() -> SocketEndpoint {
    default_control_endpoint_inner()
}

#[cfg(unix)]
fn default_control_endpoint_inner() -> SocketEndpoint {
    let (mut base, apply_namespace) = match runtime_base_directory() {
        Some(dir) => (dir, false),
        None => (fallback_base_directory(), true),
    };

    base.push("spindle");
    if apply_namespace {
        base.push(user_namespace());
    }

    let socket_path = base.join("control.sock");
    SocketEndpoint::unix(socket_path)
}

#[cfg(not(unix))]
fn default_control_endpoint_inner() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", DEFAULT_TCP_PORT)
}

#[cfg(unix)]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

#[cfg(unix)]
fn fallback_base_directory() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    // The euid keeps per-user fallbacks in a shared temp directory apart.
    format!("uid-{}", unsafe { geteuid() })
}

/// Computes the default directory holding module specification files.
pub fn default_spec_dir() -> Utf8PathBuf {
    default_spec_dir_inner()
}

#[cfg(unix)]
fn default_spec_dir_inner() -> Utf8PathBuf {
    if let Some(data) = dirs::data_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok()) {
        data.join("spindle").join("specs")
    } else {
        Utf8PathBuf::from("/usr/local/share/spindle/specs")
    }
}

#[cfg(not(unix))]
fn default_spec_dir_inner() -> Utf8PathBuf {
    Utf8PathBuf::from("/usr/local/share/spindle/specs")
}
