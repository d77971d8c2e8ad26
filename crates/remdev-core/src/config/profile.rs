//! Server profiles: the connection parameters for one remote host.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Conventional FTP control port. Profiles on this port default to FTP.
pub const FTP_PORT: u16 = 21;

/// Conventional SSH port.
pub const SFTP_PORT: u16 = 22;

/// Wire protocol used to reach a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Sftp,
    Ftp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sftp => f.pad("sftp"),
            Self::Ftp => f.pad("ftp"),
        }
    }
}

/// Connection parameters for one remote server.
///
/// Profiles are read from the configuration store and never mutated by the
/// session. The only permitted change is rotating the secret via
/// [`ServerProfile::with_secret`], which returns a new profile.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProfile {
    /// Stable identifier. Assigned once by [`crate::Config::load`] when absent.
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default, alias = "password")]
    pub secret: String,
    /// Remote directory shown when the server is first opened.
    #[serde(default = "default_path", alias = "initial_path")]
    pub path: String,
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
}

impl ServerProfile {
    /// Creates a profile with a freshly generated id.
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_id(),
            name: name.into(),
            host: host.into(),
            port,
            username: username.into(),
            secret: secret.into(),
            path: default_path(),
            protocol: None,
        }
    }

    /// Returns a copy rooted at `path`.
    pub fn with_path(self, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..self
        }
    }

    /// Returns a copy that explicitly requests `protocol`.
    pub fn with_protocol(self, protocol: Protocol) -> Self {
        Self {
            protocol: Some(protocol),
            ..self
        }
    }

    /// Returns a copy with a rotated secret. Identity is preserved.
    pub fn with_secret(self, secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            ..self
        }
    }

    /// The protocol this profile resolves to.
    ///
    /// SFTP unless FTP is requested explicitly or the port is the
    /// conventional FTP port.
    pub fn protocol_kind(&self) -> Protocol {
        match self.protocol {
            Some(protocol) => protocol,
            None if self.port == FTP_PORT => Protocol::Ftp,
            None => Protocol::Sftp,
        }
    }

    /// Returns a display label like `"user@host"` or `"user@host:port"`.
    pub fn display_label(&self) -> String {
        let default_port = match self.protocol_kind() {
            Protocol::Sftp => SFTP_PORT,
            Protocol::Ftp => FTP_PORT,
        };
        if self.port == default_port {
            format!("{}@{}", self.username, self.host)
        } else {
            format!("{}@{}:{}", self.username, self.host, self.port)
        }
    }

    /// The initial remote path, falling back to `/` when blank.
    pub fn initial_path(&self) -> &str {
        if self.path.trim().is_empty() {
            "/"
        } else {
            &self.path
        }
    }

    /// Checks that the profile carries enough to attempt a handshake.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("host is empty".to_string());
        }
        if self.username.trim().is_empty() {
            return Err("username is empty".to_string());
        }
        if self.port == 0 {
            return Err("port must be non-zero".to_string());
        }
        Ok(())
    }
}

impl fmt::Debug for ServerProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerProfile")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("path", &self.path)
            .field("protocol", &self.protocol_kind())
            .finish()
    }
}

pub(crate) fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_port() -> u16 {
    SFTP_PORT
}

fn default_path() -> String {
    "/".to_string()
}
