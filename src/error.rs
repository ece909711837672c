/*!
 * Error types for turbocopy
 */

use std::fmt;
use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Every distinguishable failure the core needs to reason about.
///
/// Kept as one flat enum rather than a hierarchy of per-module error types
/// so that the scheduler's retry/fatal decisions (`is_fatal`, `is_retryable`)
/// can be made in one place by matching on a single type.
#[derive(Debug)]
pub enum Error {
    /// A required path did not exist.
    NotFound(PathBuf),

    /// The OS refused the operation for permission reasons.
    AccessDenied(PathBuf),

    /// The destination already holds byte-identical content (server reported it).
    AlreadyExists(PathBuf),

    /// Any other OS-level I/O failure, tagged with the raw OS error code when available.
    IoError { path: Option<PathBuf>, os_code: Option<i32>, source: io::Error },

    /// A socket-level failure (connect refused, reset, timed out, ...).
    NetworkError(String),

    /// The peer sent a frame that violated the wire protocol.
    ProtocolError(String),

    /// Client and server advertised incompatible protocol versions.
    VersionMismatch { client: u32, server: u32 },

    /// The server rejected a per-file request because it is overloaded.
    ServerBusy,

    /// The server could not be reached at connection time.
    ServerUnavailable(String),

    /// A `JobConfig` was invalid; surfaced before any work starts.
    ConfigError(String),

    /// The job was asked to stop before it reached a terminal state.
    Cancelled,
}

impl Error {
    /// `true` if retrying this error is pointless: the scheduler should mark
    /// the entry failed immediately instead of spending the retry budget.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigError(_)
                | Error::VersionMismatch { .. }
                | Error::AccessDenied(_)
                | Error::Cancelled
        )
    }

    /// `true` if a fresh attempt of the same operation might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::IoError { .. } | Error::NetworkError(_) | Error::ProtocolError(_)
        )
    }

    /// `true` for connection-time unreachability that aborted the job under
    /// `ServerPolicy::Required`, used by the scheduler to log the abort
    /// distinctly from an ordinary per-file failure.
    pub fn is_server_unavailable(&self) -> bool {
        matches!(self, Error::ServerUnavailable(_))
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let os_code = source.raw_os_error();
        Error::IoError { path: Some(path.into()), os_code, source }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound(p) => write!(f, "not found: {}", p.display()),
            Error::AccessDenied(p) => write!(f, "access denied: {}", p.display()),
            Error::AlreadyExists(p) => write!(f, "already exists: {}", p.display()),
            Error::IoError { path, os_code, source } => match (path, os_code) {
                (Some(p), Some(code)) => write!(f, "I/O error on {} (os error {}): {}", p.display(), code, source),
                (Some(p), None) => write!(f, "I/O error on {}: {}", p.display(), source),
                (None, _) => write!(f, "I/O error: {}", source),
            },
            Error::NetworkError(msg) => write!(f, "network error: {}", msg),
            Error::ProtocolError(msg) => write!(f, "protocol error: {}", msg),
            Error::VersionMismatch { client, server } => {
                write!(f, "protocol version mismatch: client={} server={}", client, server)
            }
            Error::ServerBusy => write!(f, "server busy"),
            Error::ServerUnavailable(addr) => write!(f, "server unavailable: {}", addr),
            Error::ConfigError(msg) => write!(f, "configuration error: {}", msg),
            Error::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Error::NotFound(PathBuf::new()),
            io::ErrorKind::PermissionDenied => Error::AccessDenied(PathBuf::new()),
            _ => {
                let os_code = source.raw_os_error();
                Error::IoError { path: None, os_code, source }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors() {
        assert!(Error::ConfigError("bad".into()).is_fatal());
        assert!(Error::VersionMismatch { client: 1, server: 2 }.is_fatal());
        assert!(Error::Cancelled.is_fatal());
        assert!(!Error::ServerBusy.is_fatal());
    }

    #[test]
    fn retryable_errors() {
        let io_err = Error::io("/tmp/x", io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(io_err.is_retryable());
        assert!(!Error::ConfigError("bad".into()).is_retryable());
        assert!(Error::NetworkError("reset".into()).is_retryable());
    }

    #[test]
    fn display_includes_path_and_os_code() {
        let source = io::Error::from_raw_os_error(13);
        let err = Error::io("/etc/shadow", source);
        let text = err.to_string();
        assert!(text.contains("/etc/shadow"));
        assert!(text.contains("13"));
    }
}
