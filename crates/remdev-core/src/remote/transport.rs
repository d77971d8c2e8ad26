//! The protocol seam between the session and SFTP/FTP clients.
//!
//! A [`Connector`] performs the handshake for a profile and yields a boxed
//! [`Transport`]. The session worker is the only owner of a transport; no
//! other component ever holds one.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::profile::{Protocol, ServerProfile};
use crate::fs::entry::RemoteEntry;

/// Errors raised by a transport. The session maps these into
/// [`crate::CoreError`] before they reach callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("session disconnected")]
    Disconnected,

    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// What a transport can do beyond the common surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// `chmod` is available.
    pub chmod: bool,
    /// Transfers report byte-level progress.
    pub byte_progress: bool,
}

/// Content for a `put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutSource {
    /// Upload the file at this local path.
    File(PathBuf),
    /// Upload these bytes.
    Bytes(Vec<u8>),
}

/// Byte counter handed to transports that support progress.
///
/// Receives the running total of bytes moved so far.
pub type ByteCounter = Arc<dyn Fn(u64) + Send + Sync>;

/// One live protocol connection.
///
/// All paths arrive already normalised to server format. An empty path
/// means the login directory.
#[async_trait]
pub trait Transport: Send {
    fn protocol(&self) -> Protocol;

    fn capabilities(&self) -> Capabilities;

    /// Returns `false` once the transport can no longer guarantee a clean
    /// stream, e.g. after a call was abandoned mid-flight.
    fn is_alive(&self) -> bool {
        true
    }

    /// Lists `path`. Entries carry name, kind and metadata; `path` on each
    /// entry is filled in by the session.
    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>, TransportError>;

    /// Downloads `remote` into the local file `local`, returning bytes written.
    async fn get(
        &mut self,
        remote: &str,
        local: &Path,
        progress: Option<ByteCounter>,
    ) -> Result<u64, TransportError>;

    /// Uploads `source` to `remote`, returning bytes sent.
    async fn put(
        &mut self,
        source: &PutSource,
        remote: &str,
        progress: Option<ByteCounter>,
    ) -> Result<u64, TransportError>;

    async fn delete(&mut self, path: &str) -> Result<(), TransportError>;

    async fn rename(&mut self, from: &str, to: &str) -> Result<(), TransportError>;

    async fn chmod(&mut self, path: &str, mode: u32) -> Result<(), TransportError>;

    async fn mkdir(&mut self, path: &str) -> Result<(), TransportError>;

    /// Removes an empty directory.
    async fn rmdir(&mut self, path: &str) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens transports for profiles.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Performs one handshake attempt bounded by `ready_timeout`.
    async fn connect(
        &self,
        profile: &ServerProfile,
        ready_timeout: Duration,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

/// Picks SFTP or FTP from the profile's declared protocol.
#[derive(Debug, Clone, Default)]
pub struct ProtocolConnector {
    sftp: crate::remote::sftp::SftpConnector,
    ftp: crate::remote::ftp::FtpConnector,
}

impl ProtocolConnector {
    pub fn new(
        sftp: crate::remote::sftp::SftpConnector,
        ftp: crate::remote::ftp::FtpConnector,
    ) -> Self {
        Self { sftp, ftp }
    }
}

#[async_trait]
impl Connector for ProtocolConnector {
    async fn connect(
        &self,
        profile: &ServerProfile,
        ready_timeout: Duration,
    ) -> Result<Box<dyn Transport>, TransportError> {
        match profile.protocol_kind() {
            Protocol::Sftp => self.sftp.connect(profile, ready_timeout).await,
            Protocol::Ftp => self.ftp.connect(profile, ready_timeout).await,
        }
    }
}
