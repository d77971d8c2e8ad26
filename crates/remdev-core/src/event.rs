//! Notifications the session broadcasts to frontends.
//!
//! Events flow **Core → UI**. A tree view subscribes and refreshes when a
//! connection is (re)established or lost; nothing in the core waits for a
//! subscriber.

use crate::error::RemoteOp;

/// A state change or outcome observed by the session worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A handshake succeeded.
    Connected {
        /// Id of the profile now connected.
        profile_id: String,
        /// Root path in effect after connecting.
        base_path: String,
    },
    /// The connection was closed, explicitly or after a failure.
    Disconnected {
        profile_id: String,
    },
    /// A handshake failed after all retries.
    ConnectFailed {
        profile_id: String,
        error: String,
    },
    /// A directory listing completed.
    DirectoryLoaded {
        path: String,
        count: usize,
    },
    /// A remote call completed.
    OperationComplete {
        op: RemoteOp,
        path: String,
    },
    /// A remote call failed.
    OperationFailed {
        op: RemoteOp,
        path: String,
        error: String,
    },
}
