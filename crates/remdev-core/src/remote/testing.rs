//! In-memory connector and transport for unit tests.
//!
//! Nodes live in a map keyed by the exact path the protocol would see, so
//! tests exercise the session's path normalisation as well. Directories
//! exist explicitly (inserted as [`MockNode::dir`]) or implicitly through
//! their children.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::config::profile::{Protocol, ServerProfile};
use crate::fs::entry::{EntryKind, Permissions, RemoteEntry};
use crate::fs::path::{file_name_remote, parent_remote};
use crate::remote::transport::{
    ByteCounter, Capabilities, Connector, PutSource, Transport, TransportError,
};

#[derive(Debug, Clone)]
pub(crate) struct MockNode {
    pub kind: EntryKind,
    pub data: Vec<u8>,
    pub mode: u32,
}

impl MockNode {
    pub fn file(data: &[u8]) -> Self {
        Self {
            kind: EntryKind::File,
            data: data.to_vec(),
            mode: 0o644,
        }
    }

    pub fn dir() -> Self {
        Self {
            kind: EntryKind::Directory,
            data: Vec::new(),
            mode: 0o755,
        }
    }

    pub fn symlink() -> Self {
        Self {
            kind: EntryKind::Symlink,
            data: Vec::new(),
            mode: 0o777,
        }
    }
}

#[derive(Default)]
struct MockState {
    calls: Vec<String>,
    nodes: BTreeMap<String, MockNode>,
    connect_failures: u32,
    list_error: Option<TransportError>,
    put_delay: Duration,
    hang_gets: bool,
    close_fails: bool,
    chmod_disabled: bool,
    byte_progress: bool,
    in_flight: usize,
    max_in_flight: usize,
}

impl MockState {
    fn is_dir(&self, path: &str) -> bool {
        if path.is_empty() || path == "/" {
            return true;
        }
        match self.nodes.get(path) {
            Some(node) => node.kind == EntryKind::Directory,
            None => self.nodes.keys().any(|k| parent_remote(k) == path),
        }
    }

    fn children(&self, dir: &str) -> Vec<(String, MockNode)> {
        self.nodes
            .iter()
            .filter(|(k, _)| k.as_str() != dir && parent_remote(k) == dir)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Shared handle to the mock server. Clones observe the same state.
#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    state: Arc<Mutex<MockState>>,
    get_started: Arc<Notify>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn insert(&self, path: &str, node: MockNode) {
        self.with(|s| s.nodes.insert(path.to_string(), node));
    }

    pub fn exists(&self, path: &str) -> bool {
        self.with(|s| s.nodes.contains_key(path) || s.nodes.keys().any(|k| parent_remote(k) == path))
    }

    pub fn remove(&self, path: &str) {
        self.with(|s| s.nodes.remove(path));
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        self.with(|s| s.nodes.get(path).map(|n| n.data.clone()))
    }

    pub fn mode(&self, path: &str) -> Option<u32> {
        self.with(|s| s.nodes.get(path).map(|n| n.mode))
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn clear_calls(&self) {
        self.with(|s| s.calls.clear());
    }

    pub fn fail_next_connects(&self, n: u32) {
        self.with(|s| s.connect_failures = n);
    }

    pub fn fail_next_list(&self, err: TransportError) {
        self.with(|s| s.list_error = Some(err));
    }

    pub fn delay_puts(&self, delay: Duration) {
        self.with(|s| s.put_delay = delay);
    }

    /// Gets write half of the file, signal [`MockConnector::get_started`],
    /// then never finish.
    pub fn hang_gets(&self) {
        self.with(|s| s.hang_gets = true);
    }

    pub fn get_started(&self) -> Arc<Notify> {
        self.get_started.clone()
    }

    pub fn fail_close(&self) {
        self.with(|s| s.close_fails = true);
    }

    pub fn disable_chmod(&self) {
        self.with(|s| s.chmod_disabled = true);
    }

    pub fn enable_byte_progress(&self) {
        self.with(|s| s.byte_progress = true);
    }

    pub fn max_in_flight(&self) -> usize {
        self.with(|s| s.max_in_flight)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        _profile: &ServerProfile,
        _ready_timeout: Duration,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let refused = self.with(|s| {
            s.calls.push("connect".to_string());
            if s.connect_failures > 0 {
                s.connect_failures -= 1;
                true
            } else {
                false
            }
        });
        if refused {
            return Err(TransportError::ConnectionFailed("refused".to_string()));
        }
        Ok(Box::new(MockTransport {
            server: self.clone(),
        }))
    }
}

struct MockTransport {
    server: MockConnector,
}

impl MockTransport {
    fn record(&self, call: String) {
        self.server.with(|s| s.calls.push(call));
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn protocol(&self) -> Protocol {
        Protocol::Sftp
    }

    fn capabilities(&self) -> Capabilities {
        self.server.with(|s| Capabilities {
            chmod: !s.chmod_disabled,
            byte_progress: s.byte_progress,
        })
    }

    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let dir = if path.len() > 1 {
            path.trim_end_matches('/')
        } else {
            path
        };
        self.record(format!("list:{}", path));

        let listing = self.server.with(|s| {
            s.in_flight += 1;
            s.max_in_flight = s.max_in_flight.max(s.in_flight);
            if let Some(err) = s.list_error.take() {
                return Err(err);
            }
            if !s.is_dir(dir) {
                return Err(TransportError::NotFound(dir.to_string()));
            }
            Ok(s.children(dir))
        });
        tokio::task::yield_now().await;
        self.server.with(|s| s.in_flight -= 1);

        Ok(listing?
            .into_iter()
            .map(|(key, node)| {
                let mut entry = RemoteEntry::new(file_name_remote(&key), node.kind);
                entry.size = node.data.len() as u64;
                entry.permissions = Permissions::from_mode(node.mode);
                entry
            })
            .collect())
    }

    async fn get(
        &mut self,
        remote: &str,
        local: &Path,
        progress: Option<ByteCounter>,
    ) -> Result<u64, TransportError> {
        self.record(format!("get:{}", remote));
        let (data, hang, counts) = self.server.with(|s| {
            let node = s
                .nodes
                .get(remote)
                .filter(|n| n.kind == EntryKind::File)
                .ok_or_else(|| TransportError::NotFound(remote.to_string()))?;
            Ok::<_, TransportError>((node.data.clone(), s.hang_gets, s.byte_progress))
        })?;

        if hang {
            tokio::fs::write(local, &data[..data.len() / 2]).await?;
            self.server.get_started.notify_one();
            std::future::pending::<()>().await;
        }

        tokio::fs::write(local, &data).await?;
        if let Some(progress) = progress.filter(|_| counts) {
            progress(data.len() as u64);
        }
        Ok(data.len() as u64)
    }

    async fn put(
        &mut self,
        source: &PutSource,
        remote: &str,
        progress: Option<ByteCounter>,
    ) -> Result<u64, TransportError> {
        self.record(format!("put:{}", remote));
        let (delay, counts) = self.server.with(|s| (s.put_delay, s.byte_progress));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let data = match source {
            PutSource::Bytes(bytes) => bytes.clone(),
            PutSource::File(path) => tokio::fs::read(path).await?,
        };
        let len = data.len() as u64;
        if let Some(progress) = progress.filter(|_| counts) {
            progress(len / 2);
            progress(len);
        }
        self.server.with(|s| {
            s.nodes.insert(
                remote.to_string(),
                MockNode {
                    kind: EntryKind::File,
                    data,
                    mode: 0o644,
                },
            )
        });
        Ok(len)
    }

    async fn delete(&mut self, path: &str) -> Result<(), TransportError> {
        self.record(format!("delete:{}", path));
        self.server.with(|s| match s.nodes.get(path).map(|n| n.kind) {
            Some(EntryKind::File) | Some(EntryKind::Symlink) => {
                s.nodes.remove(path);
                Ok(())
            }
            Some(EntryKind::Directory) => Err(TransportError::Protocol(format!("{} is a directory", path))),
            None => Err(TransportError::NotFound(path.to_string())),
        })
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<(), TransportError> {
        self.record(format!("rename:{}->{}", from, to));
        self.server.with(|s| {
            let prefix = format!("{}/", from);
            let moved: Vec<String> = s
                .nodes
                .keys()
                .filter(|k| k.as_str() == from || k.starts_with(&prefix))
                .cloned()
                .collect();
            if moved.is_empty() {
                return Err(TransportError::NotFound(from.to_string()));
            }
            for key in moved {
                if let Some(node) = s.nodes.remove(&key) {
                    let target = format!("{}{}", to, &key[from.len()..]);
                    s.nodes.insert(target, node);
                }
            }
            Ok(())
        })
    }

    async fn chmod(&mut self, path: &str, mode: u32) -> Result<(), TransportError> {
        self.record(format!("chmod:{}:{:o}", path, mode));
        self.server.with(|s| match s.nodes.get_mut(path) {
            Some(node) => {
                node.mode = mode;
                Ok(())
            }
            None => Err(TransportError::NotFound(path.to_string())),
        })
    }

    async fn mkdir(&mut self, path: &str) -> Result<(), TransportError> {
        self.record(format!("mkdir:{}", path));
        self.server.with(|s| {
            if s.nodes.contains_key(path) {
                return Err(TransportError::Protocol(format!("{} already exists", path)));
            }
            s.nodes.insert(path.to_string(), MockNode::dir());
            Ok(())
        })
    }

    async fn rmdir(&mut self, path: &str) -> Result<(), TransportError> {
        self.record(format!("rmdir:{}", path));
        self.server.with(|s| {
            if !s.is_dir(path) {
                return Err(TransportError::NotFound(path.to_string()));
            }
            if !s.children(path).is_empty() {
                return Err(TransportError::Protocol(format!("{} is not empty", path)));
            }
            s.nodes.remove(path);
            Ok(())
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.record("close".to_string());
        if self.server.with(|s| s.close_fails) {
            return Err(TransportError::Disconnected);
        }
        Ok(())
    }
}

/// A loopback FTP server speaking just enough of the protocol for
/// `suppaftp`: login, `TYPE`, `PASV`, `LIST`, `RETR` and `QUIT`.
///
/// Each control connection runs on its own thread. `RETR` waits for the
/// configured delay before answering `150`, which keeps the client's
/// blocking call busy long enough to abandon it.
pub(crate) struct FakeFtpServer {
    port: u16,
    logins: Arc<AtomicUsize>,
}

impl FakeFtpServer {
    pub fn start(files: &[(&str, &str)], retr_delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let logins = Arc::new(AtomicUsize::new(0));
        let files: Arc<BTreeMap<String, Vec<u8>>> = Arc::new(
            files
                .iter()
                .map(|(path, data)| (path.to_string(), data.as_bytes().to_vec()))
                .collect(),
        );

        let counter = logins.clone();
        std::thread::spawn(move || {
            for control in listener.incoming() {
                let Ok(control) = control else { break };
                let files = files.clone();
                let counter = counter.clone();
                std::thread::spawn(move || {
                    let _ = serve_ftp(control, &files, &counter, retr_delay);
                });
            }
        });

        Self { port, logins }
    }

    pub fn profile(&self) -> ServerProfile {
        ServerProfile::new("fake", "127.0.0.1", self.port, "kim", "pw").with_protocol(Protocol::Ftp)
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }
}

fn serve_ftp(
    control: TcpStream,
    files: &BTreeMap<String, Vec<u8>>,
    logins: &AtomicUsize,
    retr_delay: Duration,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(control.try_clone()?);
    let mut out = control;
    let mut passive: Option<TcpListener> = None;
    out.write_all(b"220 fake ready\r\n")?;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(());
        }
        let line = line.trim_end();
        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
        match command.to_ascii_uppercase().as_str() {
            "USER" => out.write_all(b"331 password please\r\n")?,
            "PASS" => {
                logins.fetch_add(1, Ordering::SeqCst);
                out.write_all(b"230 logged in\r\n")?;
            }
            "TYPE" => out.write_all(b"200 type set\r\n")?,
            "PASV" => {
                let data = TcpListener::bind("127.0.0.1:0")?;
                let port = data.local_addr()?.port();
                let reply = format!(
                    "227 Entering Passive Mode (127,0,0,1,{},{})\r\n",
                    port / 256,
                    port % 256
                );
                out.write_all(reply.as_bytes())?;
                passive = Some(data);
            }
            "LIST" => {
                let Some(data) = passive.take() else {
                    out.write_all(b"425 use PASV first\r\n")?;
                    continue;
                };
                out.write_all(b"150 listing\r\n")?;
                let (mut conn, _) = data.accept()?;
                for (path, bytes) in files {
                    let entry = format!(
                        "-rw-r--r-- 1 web web {} Jan 1 12:00 {}\r\n",
                        bytes.len(),
                        file_name_remote(path)
                    );
                    conn.write_all(entry.as_bytes())?;
                }
                drop(conn);
                out.write_all(b"226 done\r\n")?;
            }
            "RETR" => {
                let Some(data) = passive.take() else {
                    out.write_all(b"425 use PASV first\r\n")?;
                    continue;
                };
                let Some(bytes) = files.get(arg) else {
                    out.write_all(b"550 no such file\r\n")?;
                    continue;
                };
                std::thread::sleep(retr_delay);
                out.write_all(b"150 sending\r\n")?;
                let (mut conn, _) = data.accept()?;
                let _ = conn.write_all(bytes);
                drop(conn);
                out.write_all(b"226 done\r\n")?;
            }
            "QUIT" => {
                out.write_all(b"221 bye\r\n")?;
                return Ok(());
            }
            _ => out.write_all(b"502 not implemented\r\n")?,
        }
    }
}
