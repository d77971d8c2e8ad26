//! Error types for `remdev-core`.
//!
//! All fallible operations in the core library return [`CoreResult<T>`],
//! which is an alias for `Result<T, CoreError>`. Transport-level failures
//! never escape the session boundary; they are normalised into one of the
//! variants below first.

use std::fmt;
use std::path::PathBuf;

/// The remote operation a [`CoreError::Transfer`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOp {
    List,
    Get,
    Put,
    Delete,
    Rename,
    Chmod,
    Mkdir,
    Rmdir,
}

impl RemoteOp {
    /// Status-bar text shown while the operation is in flight.
    pub fn status_text(self) -> &'static str {
        match self {
            Self::List => "Listing directory",
            Self::Get => "Downloading file",
            Self::Put => "Uploading file",
            Self::Delete => "Deleting",
            Self::Rename => "Renaming",
            Self::Chmod => "Changing permissions",
            Self::Mkdir => "Creating folder",
            Self::Rmdir => "Deleting folder",
        }
    }
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::List => "list",
            Self::Get => "get",
            Self::Put => "put",
            Self::Delete => "delete",
            Self::Rename => "rename",
            Self::Chmod => "chmod",
            Self::Mkdir => "mkdir",
            Self::Rmdir => "rmdir",
        };
        f.write_str(name)
    }
}

/// Unified error type for all core operations.
///
/// Each variant captures just enough context for the caller to display
/// a meaningful message or take corrective action. Nothing here is fatal
/// to the host process.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Handshake or authentication failed. Retry by connecting again.
    #[error("connection to {profile} failed: {cause}")]
    Connection { profile: String, cause: String },

    /// A directory listing failed or timed out.
    #[error("listing {path} failed: {cause}")]
    List {
        path: String,
        cause: String,
        timed_out: bool,
    },

    /// A single remote call other than a listing failed or timed out.
    #[error("{op} {path} failed: {cause}")]
    Transfer {
        op: RemoteOp,
        path: String,
        cause: String,
        timed_out: bool,
    },

    /// A local path could not be mapped back to a remote path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A user-entered file or folder name is empty or contains a separator.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// User-entered permission text is not an octal mode.
    #[error("invalid permission mode: {0:?}")]
    InvalidMode(String),

    /// The user cancelled a transfer.
    #[error("operation cancelled")]
    Cancelled,

    /// No server has been selected yet.
    #[error("no server selected")]
    NotConnected,

    /// The active protocol does not offer the requested operation.
    #[error("{op} is not supported over {protocol}")]
    Unsupported { op: RemoteOp, protocol: String },

    /// The session worker has shut down.
    #[error("session closed")]
    SessionClosed,

    /// The target path does not exist.
    #[error("path not found: {0}")]
    NotFound(PathBuf),

    /// The process lacks permission to access the path.
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Failed to parse a configuration file.
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// An I/O error that doesn't fit a more specific variant.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Returns `true` if the error was produced by an operation timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::List { timed_out: true, .. } | Self::Transfer { timed_out: true, .. }
        )
    }

    /// Returns `true` for user-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` if retrying the same call may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::List { .. } | Self::Transfer { .. } | Self::NotConnected
        )
    }
}

/// Convenience alias used throughout `remdev-core`.
pub type CoreResult<T> = Result<T, CoreError>;
