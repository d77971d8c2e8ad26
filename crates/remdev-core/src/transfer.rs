//! Moves files between the remote server and the local temp mirror.
//!
//! A download lands at the mirror path derived from the host and remote
//! path; saving that file uploads it back to the same remote path. Every
//! transfer goes through the [`Session`] queue, is bounded by the session's
//! operation timeout and can be cancelled through a [`CancellationToken`].
//! A failed or cancelled download never leaves a partial file behind and
//! never replaces the copy already in the mirror.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::fs::entry::RemoteEntry;
use crate::fs::path::{join_remote, TempMirror};
use crate::remote::session::Session;
use crate::remote::transport::{ByteCounter, PutSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Started,
    /// Only reported by transports with byte-level progress.
    InProgress,
    Finished,
    Failed,
    Cancelled,
}

/// One progress report for a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    pub direction: Direction,
    pub remote_path: String,
    pub local_path: PathBuf,
    pub transferred: u64,
    /// Total size when known up front.
    pub total: Option<u64>,
    pub phase: Phase,
}

impl TransferProgress {
    /// Completion percentage (0-100), if the total is known.
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(100.0),
            Some(total) => Some((self.transferred as f64 / total as f64 * 100.0).min(100.0)),
            None => None,
        }
    }
}

/// Receives transfer progress, e.g. a progress dialog.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: &TransferProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(&TransferProgress) + Send + Sync,
{
    fn report(&self, progress: &TransferProgress) {
        self(progress)
    }
}

/// Ignores all progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _progress: &TransferProgress) {}
}

/// Download/upload between the session and the temp mirror.
#[derive(Clone)]
pub struct TransferCoordinator {
    session: Session,
    mirror: TempMirror,
    progress: Arc<dyn ProgressSink>,
}

impl TransferCoordinator {
    pub fn new(session: Session, mirror: TempMirror) -> Self {
        Self {
            session,
            mirror,
            progress: Arc::new(NullProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn mirror(&self) -> &TempMirror {
        &self.mirror
    }

    /// Mirror path `entry` downloads to on the current server.
    pub fn temp_path(&self, entry: &RemoteEntry) -> CoreResult<PathBuf> {
        self.mirror.temp_path_for(&self.host()?, &entry.path)
    }

    /// Downloads `entry` into the temp mirror and returns the local path.
    ///
    /// The content lands in a `.part` sibling first and replaces the mirror
    /// file only once complete, so a failed re-download never touches an
    /// earlier copy the user may have edited.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidPath`] for directories or unmappable paths.
    /// - [`CoreError::Cancelled`] if `cancel` fires first.
    /// - Any session error from the download.
    ///
    /// In every error case the `.part` file is removed.
    pub async fn download_to_temp(
        &self,
        entry: &RemoteEntry,
        cancel: CancellationToken,
    ) -> CoreResult<PathBuf> {
        if entry.is_dir() {
            return Err(CoreError::InvalidPath(format!(
                "{} is a directory",
                entry.path
            )));
        }
        let local = self.temp_path(entry)?;
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let part = part_path(&local);

        let mut report = Report::new(
            self.progress.clone(),
            Direction::Download,
            &entry.path,
            &local,
            Some(entry.size),
        );
        report.emit(Phase::Started);

        let result = match self
            .session
            .get_with(&entry.path, &part, Some(cancel), Some(report.counter()))
            .await
        {
            Ok(bytes) => tokio::fs::rename(&part, &local)
                .await
                .map(|()| bytes)
                .map_err(CoreError::from),
            Err(err) => Err(err),
        };

        match result {
            Ok(bytes) => {
                report.transferred = bytes;
                report.emit(Phase::Finished);
                info!(remote = %entry.path, local = %local.display(), bytes, "downloaded");
                Ok(local)
            }
            Err(err) => {
                remove_partial(&part).await;
                report.emit(failure_phase(&err));
                Err(err)
            }
        }
    }

    /// Uploads a temp mirror file back to the remote path it came from.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidPath`] if `local` is not in the mirror of the
    /// current server, before anything is sent.
    pub async fn upload_from_temp(
        &self,
        local: &Path,
        cancel: CancellationToken,
    ) -> CoreResult<String> {
        let remote = self.mirror.remote_path_from_temp(local, &self.host()?)?;
        self.upload(local, remote, cancel).await
    }

    /// Uploads an arbitrary local file into `remote_dir`, keeping its name.
    pub async fn upload_local_file(
        &self,
        local: &Path,
        remote_dir: &str,
        cancel: CancellationToken,
    ) -> CoreResult<String> {
        let name = local
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CoreError::InvalidPath(local.display().to_string()))?;
        let remote = join_remote(remote_dir, name);
        self.upload(local, remote, cancel).await
    }

    async fn upload(
        &self,
        local: &Path,
        remote: String,
        cancel: CancellationToken,
    ) -> CoreResult<String> {
        let size = tokio::fs::metadata(local).await?.len();
        let mut report = Report::new(
            self.progress.clone(),
            Direction::Upload,
            &remote,
            local,
            Some(size),
        );
        report.emit(Phase::Started);

        let result = self
            .session
            .put_with(
                PutSource::File(local.to_path_buf()),
                &remote,
                Some(cancel),
                Some(report.counter()),
            )
            .await;

        match result {
            Ok(bytes) => {
                report.transferred = bytes;
                report.emit(Phase::Finished);
                info!(local = %local.display(), remote = %remote, bytes, "uploaded");
                Ok(remote)
            }
            Err(err) => {
                report.emit(failure_phase(&err));
                Err(err)
            }
        }
    }

    fn host(&self) -> CoreResult<String> {
        self.session
            .config()
            .map(|profile| profile.host)
            .ok_or(CoreError::NotConnected)
    }
}

struct Report {
    sink: Arc<dyn ProgressSink>,
    template: TransferProgress,
    transferred: u64,
}

impl Report {
    fn new(
        sink: Arc<dyn ProgressSink>,
        direction: Direction,
        remote: &str,
        local: &Path,
        total: Option<u64>,
    ) -> Self {
        Self {
            sink,
            template: TransferProgress {
                direction,
                remote_path: remote.to_string(),
                local_path: local.to_path_buf(),
                transferred: 0,
                total,
                phase: Phase::Started,
            },
            transferred: 0,
        }
    }

    fn emit(&self, phase: Phase) {
        let progress = TransferProgress {
            transferred: self.transferred,
            phase,
            ..self.template.clone()
        };
        self.sink.report(&progress);
    }

    /// Byte counter forwarding running totals as `InProgress` reports.
    fn counter(&self) -> ByteCounter {
        let sink = self.sink.clone();
        let template = self.template.clone();
        Arc::new(move |transferred| {
            sink.report(&TransferProgress {
                transferred,
                phase: Phase::InProgress,
                ..template.clone()
            })
        })
    }
}

fn failure_phase(err: &CoreError) -> Phase {
    if err.is_cancelled() {
        Phase::Cancelled
    } else {
        Phase::Failed
    }
}

/// Unique sibling of `local` that a download writes into.
fn part_path(local: &Path) -> PathBuf {
    let name = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    local.with_file_name(format!("{}.{}.part", name, Uuid::new_v4().simple()))
}

async fn remove_partial(local: &Path) {
    match tokio::fs::remove_file(local).await {
        Ok(()) => debug!(path = %local.display(), "removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("could not remove partial download {}: {}", local.display(), e),
    }
}
