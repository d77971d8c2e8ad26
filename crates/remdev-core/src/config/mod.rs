//! Configuration management.
//!
//! Server profiles ([`profile::ServerProfile`]) and session tuning
//! ([`settings::Config`]) are read from a TOML or JSON file. The core only
//! ever reads configuration; [`ConfigProvider`] is the seam frontends use
//! to hand the server list to a selection flow.

pub mod profile;
pub mod settings;

use std::path::PathBuf;

use crate::config::profile::ServerProfile;
use crate::config::settings::Config;
use crate::error::CoreResult;

/// Supplies the list of selectable servers.
pub trait ConfigProvider: Send + Sync {
    fn servers(&self) -> CoreResult<Vec<ServerProfile>>;
}

/// Re-reads the config file on every call so edits show up on the next
/// server selection.
#[derive(Debug, Clone)]
pub struct FileConfigProvider {
    path: PathBuf,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigProvider for FileConfigProvider {
    fn servers(&self) -> CoreResult<Vec<ServerProfile>> {
        Ok(Config::load(&self.path)?.servers)
    }
}

/// A fixed in-memory server list.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigProvider {
    servers: Vec<ServerProfile>,
}

impl StaticConfigProvider {
    pub fn new(servers: Vec<ServerProfile>) -> Self {
        Self { servers }
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn servers(&self) -> CoreResult<Vec<ServerProfile>> {
        Ok(self.servers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn file_provider_reads_servers() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(
            &path,
            "[[servers]]\nname = \"a\"\nhost = \"h\"\nusername = \"u\"\n",
        )
        .unwrap();

        let servers = FileConfigProvider::new(&path).servers().unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].name, "a");
    }

    #[test]
    fn file_provider_missing_file_errors() {
        let tmp = TempDir::new().unwrap();
        let provider = FileConfigProvider::new(tmp.path().join("missing.toml"));
        assert!(provider.servers().is_err());
    }

    #[test]
    fn static_provider_returns_copy() {
        let profile = ServerProfile::new("a", "h", 22, "u", "p");
        let provider = StaticConfigProvider::new(vec![profile.clone()]);
        assert_eq!(provider.servers().unwrap(), vec![profile]);
    }
}
