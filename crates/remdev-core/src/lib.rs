//! remdev core library: UI-agnostic remote development logic.
//!
//! `remdev-core` talks to one SFTP or FTP server at a time and feeds a tree
//! view plus an edit-in-place workflow through a local temp mirror. It has
//! no UI dependency so any frontend (the `remdev` CLI, an editor plugin)
//! can drive it.
//!
//! # Modules
//!
//! - [`remote`] — Transports and the [`Session`] that owns the connection.
//! - [`nav`] — Directory-first ordering and the [`RemoteTree`] cache.
//! - [`fs`] — [`RemoteEntry`], path normalisation, the temp mirror and file operations.
//! - [`transfer`] — Downloads to and uploads from the temp mirror.
//! - [`config`] — Server profiles and session settings (TOML or JSON).
//! - [`event`] — Notifications broadcast by the session.
//! - [`error`] — Unified error type ([`CoreError`]) and result alias ([`CoreResult`]).

pub mod config;
pub mod error;
pub mod event;
pub mod fs;
pub mod nav;
pub mod remote;
pub mod transfer;

pub use config::profile::{Protocol, ServerProfile};
pub use config::settings::{Config, MirrorSettings, SessionSettings};
pub use config::{ConfigProvider, FileConfigProvider, StaticConfigProvider};
pub use error::{CoreError, CoreResult, RemoteOp};
pub use event::SessionEvent;
pub use fs::entry::{EntryKind, Permissions, RemoteEntry};
pub use fs::ops::{
    change_permissions, create_file, create_folder, delete_entry, rename_entry, validate_name,
};
pub use fs::path::{to_server_format, TempMirror};
pub use nav::sort::{compare_entries, sort_entries};
pub use nav::tree::{DirectorySource, NodeId, RemoteTree};
pub use remote::session::{Session, SessionState, SessionStatus};
pub use remote::status::{ChannelObserver, NullObserver, StatusObserver, StatusUpdate, TracingObserver};
pub use remote::transport::{Connector, ProtocolConnector, PutSource, Transport, TransportError};
pub use transfer::{Direction, Phase, ProgressSink, TransferCoordinator, TransferProgress};
