//! Application configuration loaded from a TOML or JSON file.
//!
//! The file holds the server list plus session tuning. Every field has a
//! default so an empty file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::profile::{generate_id, ServerProfile};
use crate::error::{CoreError, CoreResult};

/// Top-level configuration.
///
/// Call [`Config::load`] to read from a file path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub servers: Vec<ServerProfile>,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub mirror: MirrorSettings,
}

impl Config {
    /// Loads configuration from `path`.
    ///
    /// Files ending in `.json` are parsed as JSON, everything else as TOML.
    /// Servers without an `id` get a generated one.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotFound`] if the file does not exist.
    /// - [`CoreError::PermissionDenied`] if the file is not readable.
    /// - [`CoreError::ConfigParse`] if the content is malformed.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CoreError::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => CoreError::PermissionDenied(path.to_path_buf()),
            _ => CoreError::Io(e),
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };
        Ok(config)
    }

    /// Parses TOML content.
    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| CoreError::ConfigParse(e.to_string()))?;
        Ok(config.with_ids())
    }

    /// Parses JSON content. An empty document is treated as `{}`.
    pub fn from_json_str(content: &str) -> CoreResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self =
            serde_json::from_str(content).map_err(|e| CoreError::ConfigParse(e.to_string()))?;
        Ok(config.with_ids())
    }

    /// Finds a server by id, then by name.
    pub fn find_server(&self, key: &str) -> Option<&ServerProfile> {
        self.servers
            .iter()
            .find(|s| s.id == key)
            .or_else(|| self.servers.iter().find(|s| s.name == key))
    }

    fn with_ids(self) -> Self {
        let servers = self
            .servers
            .into_iter()
            .map(|s| {
                if s.id.is_empty() {
                    ServerProfile {
                        id: generate_id(),
                        ..s
                    }
                } else {
                    s
                }
            })
            .collect();
        Self { servers, ..self }
    }
}

/// Session timing and retry parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// A connection older than this is reconnected before the next call.
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,
    /// Upper bound for one listing or transfer.
    #[serde(default = "default_op_timeout_secs")]
    pub op_timeout_secs: u64,
    /// Upper bound for one handshake attempt.
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    /// Extra handshake attempts after the first failure.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Pending requests the session worker accepts before callers wait.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl SessionSettings {
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.op_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            staleness_secs: default_staleness_secs(),
            op_timeout_secs: default_op_timeout_secs(),
            ready_timeout_secs: default_ready_timeout_secs(),
            connect_retries: default_connect_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            queue_depth: default_queue_depth(),
        }
    }
}

/// Where the local temp mirror lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorSettings {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Overrides the OS temp directory when set.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            root: None,
        }
    }
}

fn default_staleness_secs() -> u64 {
    600
}

fn default_op_timeout_secs() -> u64 {
    10
}

fn default_ready_timeout_secs() -> u64 {
    20
}

fn default_connect_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_queue_depth() -> usize {
    64
}

fn default_namespace() -> String {
    "remdev".to_string()
}
