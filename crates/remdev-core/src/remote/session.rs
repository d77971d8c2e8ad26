//! The remote session: one owned protocol connection behind a work queue.
//!
//! [`Session::spawn`] starts a worker task that is the sole owner of the
//! live [`Transport`]. Every public operation on the cloneable [`Session`]
//! handle enqueues a request and awaits its own reply, so remote calls
//! never interleave on the connection regardless of how callers schedule
//! them.
//!
//! Before each operation the worker makes sure the connection is fresh:
//! it reconnects when disconnected, when the last handshake is older than
//! the staleness threshold, when the transport reports itself dead, or
//! when an earlier call timed out.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::profile::ServerProfile;
use crate::config::settings::SessionSettings;
use crate::error::{CoreError, CoreResult, RemoteOp};
use crate::event::SessionEvent;
use crate::fs::entry::{EntryKind, RemoteEntry};
use crate::fs::path::{join_remote, to_server_format};
use crate::nav::tree::DirectorySource;
use crate::remote::status::StatusObserver;
use crate::remote::transport::{ByteCounter, Connector, PutSource, Transport, TransportError};

/// Connection lifecycle. Exactly one value is live per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Snapshot exposed to callers without going through the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    /// The selected profile, kept after a disconnect so the next
    /// operation can reconnect on demand.
    pub config: Option<ServerProfile>,
    /// Last connection error, empty when none.
    pub error: String,
    /// Root path in effect for the tree.
    pub base_path: String,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Disconnected,
            config: None,
            error: String::new(),
            base_path: "/".to_string(),
        }
    }
}

/// A remote call as queued for the worker.
#[derive(Debug)]
enum Operation {
    List { path: String },
    Get { remote: String, local: PathBuf },
    Put { source: PutSource, remote: String },
    Delete { path: String },
    Rename { from: String, to: String },
    Chmod { path: String, mode: u32 },
    Mkdir { path: String },
    Rmdir { path: String, recursive: bool },
}

impl Operation {
    fn kind(&self) -> RemoteOp {
        match self {
            Self::List { .. } => RemoteOp::List,
            Self::Get { .. } => RemoteOp::Get,
            Self::Put { .. } => RemoteOp::Put,
            Self::Delete { .. } => RemoteOp::Delete,
            Self::Rename { .. } => RemoteOp::Rename,
            Self::Chmod { .. } => RemoteOp::Chmod,
            Self::Mkdir { .. } => RemoteOp::Mkdir,
            Self::Rmdir { .. } => RemoteOp::Rmdir,
        }
    }

    fn path(&self) -> &str {
        match self {
            Self::List { path }
            | Self::Delete { path }
            | Self::Chmod { path, .. }
            | Self::Mkdir { path }
            | Self::Rmdir { path, .. } => path,
            Self::Get { remote, .. } | Self::Put { remote, .. } => remote,
            Self::Rename { from, .. } => from,
        }
    }
}

#[derive(Debug)]
enum Outcome {
    Listing(Vec<RemoteEntry>),
    Bytes(u64),
    Done,
}

enum Command {
    Connect {
        profile: ServerProfile,
        reply: oneshot::Sender<CoreResult<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Run {
        op: Operation,
        cancel: Option<CancellationToken>,
        progress: Option<ByteCounter>,
        reply: oneshot::Sender<CoreResult<Outcome>>,
    },
}

/// Why a single remote call did not complete.
#[derive(Debug)]
enum Failure {
    Timeout(Duration),
    Cancelled,
    Transport(TransportError),
}

impl From<TransportError> for Failure {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

impl Failure {
    /// Timeouts and broken streams; `NotFound` and friends leave the
    /// connection healthy.
    fn is_connection_fault(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Cancelled => false,
            Self::Transport(err) => matches!(
                err,
                TransportError::Disconnected
                    | TransportError::Io(_)
                    | TransportError::ConnectionFailed(_)
            ),
        }
    }
}

/// Handle to the session worker. Cheap to clone; all clones share the
/// same connection.
#[derive(Clone)]
pub struct Session {
    tx: mpsc::Sender<Command>,
    status: Arc<watch::Sender<SessionStatus>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Starts the worker task. Must be called inside a tokio runtime.
    ///
    /// The worker stops, closing any open connection, once every handle
    /// has been dropped.
    pub fn spawn(
        connector: Arc<dyn Connector>,
        observer: Arc<dyn StatusObserver>,
        settings: SessionSettings,
    ) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_depth.max(1));
        let (status_tx, _) = watch::channel(SessionStatus::default());
        let status = Arc::new(status_tx);
        let (events, _) = broadcast::channel(64);

        let worker = Worker {
            connector,
            observer,
            settings,
            status: status.clone(),
            events: events.clone(),
            transport: None,
            profile: None,
            connected_at: None,
            suspect: false,
        };
        tokio::spawn(worker.run(rx));

        Self { tx, status, events }
    }

    /// Connects to `profile`, closing any previous connection first.
    ///
    /// # Errors
    ///
    /// [`CoreError::Connection`] if the profile is incomplete or every
    /// handshake attempt failed. The session is left disconnected.
    pub async fn connect(&self, profile: ServerProfile) -> CoreResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Connect { profile, reply }).await?;
        rx.await.map_err(|_| CoreError::SessionClosed)?
    }

    /// Closes the connection. Idempotent and infallible.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Disconnect { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Lists a remote directory. Entry paths are `join(path, name)`.
    pub async fn list(&self, path: &str) -> CoreResult<Vec<RemoteEntry>> {
        let op = Operation::List {
            path: to_server_format(path),
        };
        match self.run(op, None, None).await? {
            Outcome::Listing(entries) => Ok(entries),
            other => Err(unexpected(other)),
        }
    }

    /// Downloads `remote` into the local file `local`.
    pub async fn get(&self, remote: &str, local: &Path) -> CoreResult<u64> {
        self.get_with(remote, local, None, None).await
    }

    /// [`Session::get`] with cooperative cancellation and a byte counter.
    pub async fn get_with(
        &self,
        remote: &str,
        local: &Path,
        cancel: Option<CancellationToken>,
        progress: Option<ByteCounter>,
    ) -> CoreResult<u64> {
        let op = Operation::Get {
            remote: to_server_format(remote),
            local: local.to_path_buf(),
        };
        bytes(self.run(op, cancel, progress).await?)
    }

    /// Uploads a local file or in-memory bytes to `remote`.
    pub async fn put(&self, source: PutSource, remote: &str) -> CoreResult<u64> {
        self.put_with(source, remote, None, None).await
    }

    /// [`Session::put`] with cooperative cancellation and a byte counter.
    pub async fn put_with(
        &self,
        source: PutSource,
        remote: &str,
        cancel: Option<CancellationToken>,
        progress: Option<ByteCounter>,
    ) -> CoreResult<u64> {
        let op = Operation::Put {
            source,
            remote: to_server_format(remote),
        };
        bytes(self.run(op, cancel, progress).await?)
    }

    pub async fn delete(&self, path: &str) -> CoreResult<()> {
        let op = Operation::Delete {
            path: to_server_format(path),
        };
        self.run(op, None, None).await.map(|_| ())
    }

    pub async fn rename(&self, from: &str, to: &str) -> CoreResult<()> {
        let op = Operation::Rename {
            from: to_server_format(from),
            to: to_server_format(to),
        };
        self.run(op, None, None).await.map(|_| ())
    }

    /// Changes permission bits.
    ///
    /// # Errors
    ///
    /// [`CoreError::Unsupported`] when the active transport lacks `chmod`.
    pub async fn chmod(&self, path: &str, mode: u32) -> CoreResult<()> {
        let op = Operation::Chmod {
            path: to_server_format(path),
            mode,
        };
        self.run(op, None, None).await.map(|_| ())
    }

    pub async fn mkdir(&self, path: &str) -> CoreResult<()> {
        let op = Operation::Mkdir {
            path: to_server_format(path),
        };
        self.run(op, None, None).await.map(|_| ())
    }

    /// Removes a directory; with `recursive`, its contents first.
    pub async fn rmdir(&self, path: &str, recursive: bool) -> CoreResult<()> {
        let op = Operation::Rmdir {
            path: to_server_format(path),
            recursive,
        };
        self.run(op, None, None).await.map(|_| ())
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// The currently selected profile.
    pub fn config(&self) -> Option<ServerProfile> {
        self.status.borrow().config.clone()
    }

    /// Last connection error message, empty if none.
    pub fn error(&self) -> String {
        self.status.borrow().error.clone()
    }

    pub fn base_path(&self) -> String {
        self.status.borrow().base_path.clone()
    }

    pub fn set_base_path(&self, path: impl Into<String>) {
        let path = path.into();
        self.status.send_modify(|s| s.base_path = path);
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn run(
        &self,
        op: Operation,
        cancel: Option<CancellationToken>,
        progress: Option<ByteCounter>,
    ) -> CoreResult<Outcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Run {
            op,
            cancel,
            progress,
            reply,
        })
        .await?;
        rx.await.map_err(|_| CoreError::SessionClosed)?
    }

    async fn send(&self, cmd: Command) -> CoreResult<()> {
        self.tx.send(cmd).await.map_err(|_| CoreError::SessionClosed)
    }
}

#[async_trait]
impl DirectorySource for Session {
    async fn list(&self, path: &str) -> CoreResult<Vec<RemoteEntry>> {
        Session::list(self, path).await
    }
}

fn bytes(outcome: Outcome) -> CoreResult<u64> {
    match outcome {
        Outcome::Bytes(n) => Ok(n),
        other => Err(unexpected(other)),
    }
}

fn unexpected(outcome: Outcome) -> CoreError {
    CoreError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("unexpected session reply: {:?}", outcome),
    ))
}

/// Sole owner of the transport.
struct Worker {
    connector: Arc<dyn Connector>,
    observer: Arc<dyn StatusObserver>,
    settings: SessionSettings,
    status: Arc<watch::Sender<SessionStatus>>,
    events: broadcast::Sender<SessionEvent>,
    transport: Option<Box<dyn Transport>>,
    profile: Option<ServerProfile>,
    connected_at: Option<Instant>,
    /// Set after a timeout or broken stream; forces a reconnect before
    /// the next operation.
    suspect: bool,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        debug!("session worker started");
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Connect { profile, reply } => {
                    let result = self.connect(profile).await;
                    if reply.send(result).is_err() {
                        debug!("caller dropped before receiving connect result");
                    }
                }
                Command::Disconnect { reply } => {
                    self.disconnect().await;
                    let _ = reply.send(());
                }
                Command::Run {
                    op,
                    cancel,
                    progress,
                    reply,
                } => {
                    let (result, reconnect) = self.execute(op, cancel, progress).await;
                    if reply.send(result).is_err() {
                        debug!("caller dropped before receiving operation result");
                    }
                    if reconnect {
                        if let Some(profile) = self.profile.clone() {
                            info!("reconnecting after failed listing");
                            if let Err(e) = self.establish(profile).await {
                                warn!("background reconnect failed: {}", e);
                            }
                        }
                    }
                }
            }
        }
        self.close_transport().await;
        debug!("session worker stopped");
    }

    async fn connect(&mut self, profile: ServerProfile) -> CoreResult<()> {
        let base_path = profile.initial_path().to_string();
        self.profile = Some(profile.clone());
        self.status.send_modify(|s| {
            s.config = Some(profile.clone());
            s.base_path = base_path;
        });
        self.establish(profile).await
    }

    /// Closes any live transport, then handshakes with retries.
    async fn establish(&mut self, profile: ServerProfile) -> CoreResult<()> {
        self.close_transport().await;

        if let Err(reason) = profile.validate() {
            return Err(self.connect_failed(&profile, reason));
        }

        self.set_state(SessionState::Connecting);
        self.observer.update("Connecting", true);

        let attempts = self.settings.connect_retries + 1;
        let mut last_error = String::new();
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(backoff(self.settings.retry_backoff(), attempt)).await;
            }
            match self
                .connector
                .connect(&profile, self.settings.ready_timeout())
                .await
            {
                Ok(transport) => {
                    self.transport = Some(transport);
                    self.connected_at = Some(Instant::now());
                    self.suspect = false;
                    self.status.send_modify(|s| {
                        s.state = SessionState::Connected;
                        s.error.clear();
                    });
                    self.observer.update("Connected", false);
                    info!(server = %profile.display_label(), "connected");
                    let _ = self.events.send(SessionEvent::Connected {
                        profile_id: profile.id.clone(),
                        base_path: self.status.borrow().base_path.clone(),
                    });
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        "connect attempt {}/{} to {} failed: {}",
                        attempt + 1,
                        attempts,
                        profile.display_label(),
                        err
                    );
                    let fatal = matches!(err, TransportError::AuthFailed(_));
                    last_error = err.to_string();
                    if fatal {
                        break;
                    }
                }
            }
        }

        Err(self.connect_failed(&profile, last_error))
    }

    fn connect_failed(&mut self, profile: &ServerProfile, cause: String) -> CoreError {
        self.transport = None;
        self.connected_at = None;
        self.status.send_modify(|s| {
            s.state = SessionState::Disconnected;
            s.error = cause.clone();
        });
        self.observer.update("Disconnected", false);
        let _ = self.events.send(SessionEvent::ConnectFailed {
            profile_id: profile.id.clone(),
            error: cause.clone(),
        });
        CoreError::Connection {
            profile: profile.display_label(),
            cause,
        }
    }

    async fn disconnect(&mut self) {
        let was_open = self.transport.is_some();
        self.close_transport().await;
        self.observer.update("Disconnected", false);
        if was_open {
            if let Some(profile) = &self.profile {
                let _ = self.events.send(SessionEvent::Disconnected {
                    profile_id: profile.id.clone(),
                });
            }
        }
    }

    /// Drops the transport, logging close errors. Always ends disconnected.
    async fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                warn!("error while closing connection: {}", e);
            }
        }
        self.connected_at = None;
        self.set_state(SessionState::Disconnected);
    }

    async fn ensure_fresh(&mut self) -> CoreResult<()> {
        let profile = self.profile.clone().ok_or(CoreError::NotConnected)?;

        let stale = match self.connected_at {
            Some(at) => at.elapsed() > self.settings.staleness(),
            None => true,
        };
        let dead = self.transport.as_ref().map_or(true, |t| !t.is_alive());

        if stale || dead || self.suspect {
            debug!(stale, dead, suspect = self.suspect, "refreshing connection");
            self.establish(profile).await?;
        }
        Ok(())
    }

    /// Runs one operation. The flag asks for a reconnect after replying.
    async fn execute(
        &mut self,
        op: Operation,
        cancel: Option<CancellationToken>,
        progress: Option<ByteCounter>,
    ) -> (CoreResult<Outcome>, bool) {
        let kind = op.kind();
        self.observer.update(kind.status_text(), true);

        let result = self.execute_inner(&op, cancel, progress).await;

        let idle = match self.state() {
            SessionState::Connected => "Connected",
            _ => "Disconnected",
        };
        self.observer.update(idle, false);

        match result {
            Ok(outcome) => {
                let event = match &outcome {
                    Outcome::Listing(entries) => SessionEvent::DirectoryLoaded {
                        path: op.path().to_string(),
                        count: entries.len(),
                    },
                    _ => SessionEvent::OperationComplete {
                        op: kind,
                        path: op.path().to_string(),
                    },
                };
                let _ = self.events.send(event);
                (Ok(outcome), false)
            }
            Err(err) => {
                let reconnect = match &err {
                    Attempt::Failed(Failure::Cancelled) | Attempt::Rejected(_) => false,
                    Attempt::Failed(failure) => {
                        if failure.is_connection_fault() {
                            self.suspect = true;
                        }
                        kind == RemoteOp::List
                    }
                };
                let err = err.into_core(&op);
                let _ = self.events.send(SessionEvent::OperationFailed {
                    op: kind,
                    path: op.path().to_string(),
                    error: err.to_string(),
                });
                (Err(err), reconnect)
            }
        }
    }

    async fn execute_inner(
        &mut self,
        op: &Operation,
        cancel: Option<CancellationToken>,
        progress: Option<ByteCounter>,
    ) -> Result<Outcome, Attempt> {
        self.ensure_fresh().await.map_err(Attempt::Rejected)?;

        let timeout = self.settings.op_timeout();
        let transport = self
            .transport
            .as_mut()
            .ok_or(Attempt::Rejected(CoreError::NotConnected))?;

        if matches!(op, Operation::Chmod { .. }) && !transport.capabilities().chmod {
            return Err(Attempt::Rejected(CoreError::Unsupported {
                op: RemoteOp::Chmod,
                protocol: transport.protocol().to_string(),
            }));
        }

        let work = perform(transport.as_mut(), op, progress, timeout);
        let result = match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(Failure::Cancelled),
                    result = work => result,
                }
            }
            None => work.await,
        };
        if matches!(result, Err(Failure::Cancelled)) {
            info!(path = op.path(), "{} cancelled", op.kind());
        }
        result.map_err(Attempt::Failed)
    }

    fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    fn set_state(&self, state: SessionState) {
        self.status.send_if_modified(|s| {
            if s.state == state {
                false
            } else {
                s.state = state;
                true
            }
        });
    }
}

/// Either the session refused to start the call, or the call failed.
enum Attempt {
    Rejected(CoreError),
    Failed(Failure),
}

impl Attempt {
    fn into_core(self, op: &Operation) -> CoreError {
        let failure = match self {
            Self::Rejected(err) => return err,
            Self::Failed(failure) => failure,
        };
        let (cause, timed_out) = match failure {
            Failure::Cancelled => return CoreError::Cancelled,
            Failure::Timeout(limit) => (format!("timed out after {}s", limit.as_secs()), true),
            Failure::Transport(err) => (err.to_string(), false),
        };
        let path = op.path().to_string();
        match op.kind() {
            RemoteOp::List => CoreError::List {
                path,
                cause,
                timed_out,
            },
            kind => CoreError::Transfer {
                op: kind,
                path,
                cause,
                timed_out,
            },
        }
    }
}

/// Bounds one protocol call. Dropping the call on timeout detaches it.
async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, Failure>
where
    F: std::future::Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(Failure::from),
        Err(_) => Err(Failure::Timeout(limit)),
    }
}

async fn perform(
    transport: &mut dyn Transport,
    op: &Operation,
    progress: Option<ByteCounter>,
    limit: Duration,
) -> Result<Outcome, Failure> {
    match op {
        Operation::List { path } => {
            let mut entries = bounded(limit, transport.list(path)).await?;
            for entry in &mut entries {
                entry.path = join_remote(path, &entry.name);
            }
            Ok(Outcome::Listing(entries))
        }
        Operation::Get { remote, local } => {
            let n = bounded(limit, transport.get(remote, local, progress)).await?;
            Ok(Outcome::Bytes(n))
        }
        Operation::Put { source, remote } => {
            let n = bounded(limit, transport.put(source, remote, progress)).await?;
            Ok(Outcome::Bytes(n))
        }
        Operation::Delete { path } => {
            bounded(limit, transport.delete(path)).await?;
            Ok(Outcome::Done)
        }
        Operation::Rename { from, to } => {
            bounded(limit, transport.rename(from, to)).await?;
            Ok(Outcome::Done)
        }
        Operation::Chmod { path, mode } => {
            bounded(limit, transport.chmod(path, *mode)).await?;
            Ok(Outcome::Done)
        }
        Operation::Mkdir { path } => {
            bounded(limit, transport.mkdir(path)).await?;
            Ok(Outcome::Done)
        }
        Operation::Rmdir { path, recursive } => {
            if *recursive {
                remove_tree(transport, path, limit).await?;
            } else {
                bounded(limit, transport.rmdir(path)).await?;
            }
            Ok(Outcome::Done)
        }
    }
}

/// Deletes `root` and everything below it, files before their
/// directories and deeper directories first. Symlinks are unlinked, never
/// followed.
async fn remove_tree(
    transport: &mut dyn Transport,
    root: &str,
    limit: Duration,
) -> Result<(), Failure> {
    let mut pending = vec![root.to_string()];
    let mut visited = Vec::new();
    while let Some(dir) = pending.pop() {
        let entries = bounded(limit, transport.list(&dir)).await?;
        for entry in entries {
            let child = join_remote(&dir, &entry.name);
            match entry.kind {
                EntryKind::Directory => pending.push(child),
                EntryKind::File | EntryKind::Symlink => {
                    bounded(limit, transport.delete(&child)).await?
                }
            }
        }
        visited.push(dir);
    }
    for dir in visited.iter().rev() {
        bounded(limit, transport.rmdir(dir)).await?;
    }
    Ok(())
}

/// Exponential backoff: `base`, `2 * base`, `4 * base`, ... capped at 30s.
fn backoff(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << (attempt.saturating_sub(1)).min(16);
    base.saturating_mul(factor).min(Duration::from_secs(30))
}
