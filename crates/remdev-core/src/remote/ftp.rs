//! FTP transport using the blocking `suppaftp` client.
//!
//! Every call moves the control stream into `spawn_blocking` and takes it
//! back afterwards. If the awaiting future is dropped (timeout or
//! cancellation) the stream stays with the detached blocking task, the
//! transport reports itself dead and the session reconnects before the
//! next call.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use suppaftp::list::{File as ListFile, PosixPexQuery};
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};

use crate::config::profile::{Protocol, ServerProfile};
use crate::fs::entry::{EntryKind, Permissions, RemoteEntry};
use crate::remote::transport::{
    ByteCounter, Capabilities, Connector, PutSource, Transport, TransportError,
};

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Opens FTP transports.
#[derive(Debug, Clone)]
pub struct FtpConnector {
    /// Socket read/write timeout for the control and data streams.
    pub io_timeout: Duration,
    /// Offer `chmod` through `SITE CHMOD`. Not every server implements it.
    pub site_chmod: bool,
}

impl Default for FtpConnector {
    fn default() -> Self {
        Self {
            io_timeout: Duration::from_secs(10),
            site_chmod: true,
        }
    }
}

#[async_trait]
impl Connector for FtpConnector {
    async fn connect(
        &self,
        profile: &ServerProfile,
        ready_timeout: Duration,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let host = profile.host.clone();
        let port = profile.port;
        let username = profile.username.clone();
        let secret = profile.secret.clone();
        let io_timeout = self.io_timeout;

        let handshake = tokio::task::spawn_blocking(move || {
            let mut ftp = FtpStream::connect((host.as_str(), port))
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
            ftp.get_ref().set_read_timeout(Some(io_timeout)).ok();
            ftp.get_ref().set_write_timeout(Some(io_timeout)).ok();
            ftp.login(&username, &secret)
                .map_err(|e| TransportError::AuthFailed(e.to_string()))?;
            ftp.transfer_type(FileType::Binary).map_err(map_ftp_error)?;
            Ok::<_, TransportError>(ftp)
        });

        let stream = match tokio::time::timeout(ready_timeout, handshake).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join)) => return Err(TransportError::ConnectionFailed(join.to_string())),
            Err(_) => {
                return Err(TransportError::ConnectionFailed(format!(
                    "handshake timed out after {}s",
                    ready_timeout.as_secs()
                )))
            }
        };

        tracing::debug!(host = %profile.host, "ftp login complete");
        Ok(Box::new(FtpTransport {
            stream: BlockingSlot::new(stream),
            site_chmod: self.site_chmod,
        }))
    }
}

/// A logged-in FTP control connection.
pub struct FtpTransport {
    stream: BlockingSlot<FtpStream>,
    site_chmod: bool,
}

/// Raised on the blocking side once the awaiting future has been dropped.
#[derive(Debug, Clone, Default)]
pub(crate) struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub(crate) fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), TransportError> {
        if self.is_set() {
            Err(TransportError::Protocol("call abandoned".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Sets the flag when dropped unless the call completed.
struct AbortOnDrop(Option<AbortFlag>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(flag) = self.0.take() {
            flag.set();
        }
    }
}

/// Lends a blocking client to one `spawn_blocking` call at a time.
///
/// The client travels into the blocking task and comes back with the
/// result. If the awaiting future is dropped first, the client stays with
/// the detached task, the slot is left empty and the task sees its
/// [`AbortFlag`] raised.
pub(crate) struct BlockingSlot<S> {
    inner: Option<S>,
}

impl<S: Send + 'static> BlockingSlot<S> {
    pub(crate) fn new(inner: S) -> Self {
        Self { inner: Some(inner) }
    }

    pub(crate) fn is_held(&self) -> bool {
        self.inner.is_some()
    }

    pub(crate) fn take(&mut self) -> Option<S> {
        self.inner.take()
    }

    pub(crate) async fn run<T, F>(&mut self, f: F) -> Result<T, TransportError>
    where
        T: Send + 'static,
        F: FnOnce(&mut S, &AbortFlag) -> Result<T, TransportError> + Send + 'static,
    {
        let mut inner = self.inner.take().ok_or(TransportError::Disconnected)?;
        let abort = AbortFlag::default();
        let mut guard = AbortOnDrop(Some(abort.clone()));
        let (inner, result) = tokio::task::spawn_blocking(move || {
            let result = f(&mut inner, &abort);
            (inner, result)
        })
        .await
        .map_err(|e| TransportError::Protocol(format!("ftp worker failed: {}", e)))?;
        guard.0 = None;
        self.inner = Some(inner);
        result
    }
}

#[async_trait]
impl Transport for FtpTransport {
    fn protocol(&self) -> Protocol {
        Protocol::Ftp
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            chmod: self.site_chmod,
            byte_progress: true,
        }
    }

    fn is_alive(&self) -> bool {
        self.stream.is_held()
    }

    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let path = path.to_string();
        let lines = self
            .stream
            .run(move |ftp, _| {
                let target = if path.is_empty() {
                    None
                } else {
                    Some(path.as_str())
                };
                ftp.list(target).map_err(map_ftp_error)
            })
            .await?;
        Ok(lines.iter().filter_map(|line| parse_list_line(line)).collect())
    }

    async fn get(
        &mut self,
        remote: &str,
        local: &Path,
        progress: Option<ByteCounter>,
    ) -> Result<u64, TransportError> {
        let remote = remote.to_string();
        let local = local.to_path_buf();
        self.stream
            .run(move |ftp, abort| {
                let mut reader = ftp.retr_as_stream(&remote).map_err(map_ftp_error)?;
                abort.check()?;
                let mut file = std::fs::File::create(&local)?;
                let copied = copy_unless_aborted(&mut reader, &mut file, abort, progress.as_ref());
                drop(file);
                let total = match copied {
                    Ok(total) => total,
                    Err(err) => {
                        let _ = std::fs::remove_file(&local);
                        return Err(err);
                    }
                };
                ftp.finalize_retr_stream(reader).map_err(map_ftp_error)?;
                Ok(total)
            })
            .await
    }

    async fn put(
        &mut self,
        source: &PutSource,
        remote: &str,
        progress: Option<ByteCounter>,
    ) -> Result<u64, TransportError> {
        let source = source.clone();
        let remote = remote.to_string();
        self.stream
            .run(move |ftp, abort| {
                let inner: Box<dyn Read + Send> = match source {
                    PutSource::File(local) => Box::new(std::fs::File::open(local)?),
                    PutSource::Bytes(bytes) => Box::new(std::io::Cursor::new(bytes)),
                };
                let mut reader = CountingReader {
                    inner,
                    total: 0,
                    counter: progress,
                    abort: Some(abort.clone()),
                };
                ftp.put_file(&remote, &mut reader).map_err(map_ftp_error)
            })
            .await
    }

    async fn delete(&mut self, path: &str) -> Result<(), TransportError> {
        let path = path.to_string();
        self.stream
            .run(move |ftp, _| ftp.rm(&path).map_err(map_ftp_error))
            .await
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<(), TransportError> {
        let from = from.to_string();
        let to = to.to_string();
        self.stream
            .run(move |ftp, _| ftp.rename(&from, &to).map_err(map_ftp_error))
            .await
    }

    async fn chmod(&mut self, path: &str, mode: u32) -> Result<(), TransportError> {
        if !self.site_chmod {
            return Err(TransportError::Unsupported("SITE CHMOD".to_string()));
        }
        let command = format!("CHMOD {:o} {}", mode & 0o7777, path);
        self.stream
            .run(move |ftp, _| ftp.site(&command).map(|_| ()).map_err(map_ftp_error))
            .await
    }

    async fn mkdir(&mut self, path: &str) -> Result<(), TransportError> {
        let path = path.to_string();
        self.stream
            .run(move |ftp, _| ftp.mkdir(&path).map_err(map_ftp_error))
            .await
    }

    async fn rmdir(&mut self, path: &str) -> Result<(), TransportError> {
        let path = path.to_string();
        self.stream
            .run(move |ftp, _| ftp.rmdir(&path).map_err(map_ftp_error))
            .await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.stream.is_held() {
            return Ok(());
        }
        self.stream
            .run(|ftp, _| ftp.quit().map_err(map_ftp_error))
            .await?;
        self.stream.take();
        Ok(())
    }
}

/// Copies `reader` into `writer`, stopping as soon as `abort` is raised.
fn copy_unless_aborted(
    reader: &mut impl Read,
    writer: &mut impl Write,
    abort: &AbortFlag,
    progress: Option<&ByteCounter>,
) -> Result<u64, TransportError> {
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut total = 0u64;
    loop {
        abort.check()?;
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        total += n as u64;
        if let Some(counter) = progress {
            counter(total);
        }
    }
    writer.flush()?;
    abort.check()?;
    Ok(total)
}

/// Reports the running byte total while an upload reads its source.
struct CountingReader {
    inner: Box<dyn Read + Send>,
    total: u64,
    counter: Option<ByteCounter>,
    abort: Option<AbortFlag>,
}

impl Read for CountingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.abort.as_ref().is_some_and(AbortFlag::is_set) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "upload abandoned",
            ));
        }
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.total += n as u64;
            if let Some(counter) = &self.counter {
                counter(self.total);
            }
        }
        Ok(n)
    }
}

fn map_ftp_error(err: FtpError) -> TransportError {
    match err {
        FtpError::ConnectionError(io) => TransportError::Io(io.to_string()),
        other => TransportError::Protocol(other.to_string()),
    }
}

/// Parses one `LIST` line in Unix (`ls -l`) or DOS format.
///
/// Names are kept byte for byte, including repeated spaces. FTP does not
/// report numeric ownership, so owner and group are always `0`. DOS
/// listings carry no permissions either and get placeholders. Returns
/// `None` for blank lines, totals and the `.`/`..` entries.
pub fn parse_list_line(line: &str) -> Option<RemoteEntry> {
    let line = line.trim_end_matches(|c: char| c == '\r' || c == '\n');
    if line.trim().is_empty() || line.starts_with("total ") {
        return None;
    }
    let file: ListFile = line.parse().ok()?;

    let mut name = file.name().to_string();
    let kind = if file.is_symlink() {
        // Some servers leave the link target in the name.
        if let Some((link, _target)) = name.split_once(" -> ") {
            name = link.to_string();
        }
        EntryKind::Symlink
    } else if file.is_directory() {
        EntryKind::Directory
    } else {
        EntryKind::File
    };
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }

    let mut entry = RemoteEntry::new(&name, kind);
    entry.size = file.size() as u64;
    entry.modify_time = Some(file.modified());
    entry.permissions = if is_posix_line(line) {
        Permissions::from_mode(posix_mode(&file))
    } else {
        Permissions::unknown()
    };
    Some(entry)
}

fn is_posix_line(line: &str) -> bool {
    matches!(line.chars().next(), Some('-' | 'd' | 'l'))
}

fn posix_mode(file: &ListFile) -> u32 {
    let bits = |read: bool, write: bool, exec: bool| {
        (u32::from(read) << 2) | (u32::from(write) << 1) | u32::from(exec)
    };
    let owner = bits(
        file.can_read(PosixPexQuery::Owner),
        file.can_write(PosixPexQuery::Owner),
        file.can_execute(PosixPexQuery::Owner),
    );
    let group = bits(
        file.can_read(PosixPexQuery::Group),
        file.can_write(PosixPexQuery::Group),
        file.can_execute(PosixPexQuery::Group),
    );
    let others = bits(
        file.can_read(PosixPexQuery::Others),
        file.can_write(PosixPexQuery::Others),
        file.can_execute(PosixPexQuery::Others),
    );
    (owner << 6) | (group << 3) | others
}
