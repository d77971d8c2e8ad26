//! SFTP transport using `russh` and `russh-sftp`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::keys::key::PublicKey;
use russh_sftp::client::error::Error as SftpClientError;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::StatusCode;
use tokio::io::AsyncWriteExt;

use crate::config::profile::{Protocol, ServerProfile};
use crate::fs::entry::{EntryKind, Permissions, RemoteEntry};
use crate::remote::transport::{
    ByteCounter, Capabilities, Connector, PutSource, Transport, TransportError,
};

/// Internal SSH client handler. Accepts all server keys and logs their
/// fingerprint so an unexpected key change is at least visible.
struct SshHandler {
    host: String,
}

#[async_trait]
impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::warn!(
            host = %self.host,
            fingerprint = %server_public_key.fingerprint(),
            "accepting unverified host key"
        );
        Ok(true)
    }
}

/// Opens SFTP transports.
///
/// Host keys are not verified: any key the server presents is accepted
/// (and logged at `warn`) before the password is sent. Only use it
/// against servers reached over a network you trust.
#[derive(Debug, Clone)]
pub struct SftpConnector {
    /// SSH-level inactivity timeout.
    pub inactivity_timeout: Duration,
}

impl Default for SftpConnector {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl Connector for SftpConnector {
    async fn connect(
        &self,
        profile: &ServerProfile,
        ready_timeout: Duration,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let handshake = SftpTransport::open(profile, self.inactivity_timeout);
        match tokio::time::timeout(ready_timeout, handshake).await {
            Ok(result) => result.map(|t| Box::new(t) as Box<dyn Transport>),
            Err(_) => Err(TransportError::ConnectionFailed(format!(
                "handshake timed out after {}s",
                ready_timeout.as_secs()
            ))),
        }
    }
}

/// An authenticated SSH connection with an open SFTP subsystem.
pub struct SftpTransport {
    sftp: SftpSession,
    handle: client::Handle<SshHandler>,
}

impl SftpTransport {
    async fn open(
        profile: &ServerProfile,
        inactivity_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let ssh_config = client::Config {
            inactivity_timeout: Some(inactivity_timeout),
            ..Default::default()
        };

        let mut handle = client::connect(
            Arc::new(ssh_config),
            (profile.host.as_str(), profile.port),
            SshHandler {
                host: profile.host.clone(),
            },
        )
        .await
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let auth_ok = handle
            .authenticate_password(&profile.username, &profile.secret)
            .await
            .map_err(|e| TransportError::AuthFailed(e.to_string()))?;

        if !auth_ok {
            return Err(TransportError::AuthFailed(
                "invalid username or password".to_string(),
            ));
        }

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(map_sftp_error)?;

        tracing::debug!(host = %profile.host, "sftp subsystem ready");
        Ok(Self { sftp, handle })
    }
}

#[async_trait]
impl Transport for SftpTransport {
    fn protocol(&self) -> Protocol {
        Protocol::Sftp
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            chmod: true,
            byte_progress: false,
        }
    }

    fn is_alive(&self) -> bool {
        !self.handle.is_closed()
    }

    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let dir_entries = self
            .sftp
            .read_dir(sftp_path(path))
            .await
            .map_err(map_sftp_error)?;

        let entries = dir_entries
            .filter(|de| {
                let name = de.file_name();
                name != "." && name != ".."
            })
            .map(|de| {
                let attrs = de.metadata();
                let kind = if attrs.file_type().is_symlink() {
                    EntryKind::Symlink
                } else if attrs.is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                };
                let mut entry = RemoteEntry::new(&de.file_name(), kind);
                entry.size = attrs.len();
                entry.modify_time = attrs.modified().ok();
                entry.access_time = attrs.accessed().ok();
                entry.permissions = Permissions::from_mode(attrs.permissions.unwrap_or(0));
                entry.owner = attrs.uid.unwrap_or(0);
                entry.group = attrs.gid.unwrap_or(0);
                entry
            })
            .collect();

        Ok(entries)
    }

    async fn get(
        &mut self,
        remote: &str,
        local: &Path,
        _progress: Option<ByteCounter>,
    ) -> Result<u64, TransportError> {
        let mut source = self.sftp.open(remote).await.map_err(map_sftp_error)?;
        let mut target = tokio::fs::File::create(local).await?;
        let copied = tokio::io::copy(&mut source, &mut target).await?;
        target.flush().await?;
        Ok(copied)
    }

    async fn put(
        &mut self,
        source: &PutSource,
        remote: &str,
        _progress: Option<ByteCounter>,
    ) -> Result<u64, TransportError> {
        let mut target = self.sftp.create(remote).await.map_err(map_sftp_error)?;
        let sent = match source {
            PutSource::File(local) => {
                let mut file = tokio::fs::File::open(local).await?;
                tokio::io::copy(&mut file, &mut target).await?
            }
            PutSource::Bytes(bytes) => {
                target.write_all(bytes).await?;
                bytes.len() as u64
            }
        };
        target.shutdown().await?;
        Ok(sent)
    }

    async fn delete(&mut self, path: &str) -> Result<(), TransportError> {
        self.sftp.remove_file(path).await.map_err(map_sftp_error)
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<(), TransportError> {
        self.sftp.rename(from, to).await.map_err(map_sftp_error)
    }

    async fn chmod(&mut self, path: &str, mode: u32) -> Result<(), TransportError> {
        let mut attrs = self.sftp.metadata(path).await.map_err(map_sftp_error)?;
        // Keep the file-type bits, replace permission bits, send nothing else.
        attrs.permissions = Some((attrs.permissions.unwrap_or(0) & !0o7777) | (mode & 0o7777));
        attrs.size = None;
        attrs.uid = None;
        attrs.gid = None;
        attrs.atime = None;
        attrs.mtime = None;
        self.sftp
            .set_metadata(path, attrs)
            .await
            .map_err(map_sftp_error)
    }

    async fn mkdir(&mut self, path: &str) -> Result<(), TransportError> {
        self.sftp.create_dir(path).await.map_err(map_sftp_error)
    }

    async fn rmdir(&mut self, path: &str) -> Result<(), TransportError> {
        self.sftp.remove_dir(path).await.map_err(map_sftp_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let closed = self.sftp.close().await.map_err(map_sftp_error);
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "session closed", "en")
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        closed
    }
}

/// SFTP has no notion of an empty path; the login directory is `.`.
fn sftp_path(path: &str) -> &str {
    if path.is_empty() {
        "."
    } else {
        path
    }
}

fn map_sftp_error(err: SftpClientError) -> TransportError {
    match &err {
        SftpClientError::Status(status) => match status.status_code {
            StatusCode::NoSuchFile => TransportError::NotFound(status.error_message.clone()),
            StatusCode::PermissionDenied => {
                TransportError::PermissionDenied(status.error_message.clone())
            }
            StatusCode::ConnectionLost | StatusCode::NoConnection => TransportError::Disconnected,
            _ => TransportError::Protocol(err.to_string()),
        },
        _ => TransportError::Protocol(err.to_string()),
    }
}
