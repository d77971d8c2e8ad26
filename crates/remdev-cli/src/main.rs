mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remdev_core::remote::ftp::FtpConnector;
use remdev_core::remote::sftp::SftpConnector;
use remdev_core::{Config, ProtocolConnector, Session, TracingObserver};

#[derive(Debug, Parser)]
#[command(name = "remdev", version, about = "Browse and edit files on SFTP/FTP servers")]
struct Cli {
    /// Config file (TOML or JSON).
    #[arg(long, short, env = "REMDEV_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List configured servers.
    Servers,
    /// List a remote directory.
    Ls {
        server: String,
        /// Defaults to the server's initial path.
        path: Option<String>,
    },
    /// Print the directory tree below a path.
    Tree {
        server: String,
        path: Option<String>,
        #[arg(long, short, default_value_t = 2)]
        depth: usize,
    },
    /// Download a file into the temp mirror and print its local path.
    Open { server: String, remote: String },
    /// Upload a temp mirror file back to where it came from.
    Save { server: String, local: PathBuf },
    /// Upload a local file into a remote directory.
    Upload {
        server: String,
        local: PathBuf,
        remote_dir: String,
    },
    /// Create an empty remote file.
    Touch {
        server: String,
        dir: String,
        name: String,
    },
    /// Create a remote folder.
    Mkdir {
        server: String,
        dir: String,
        name: String,
    },
    /// Delete a remote file, or a folder with its contents.
    Rm { server: String, path: String },
    /// Rename a remote entry within its directory.
    Mv {
        server: String,
        path: String,
        new_name: String,
    },
    /// Change permissions, e.g. `755`.
    Chmod {
        server: String,
        path: String,
        mode: String,
    },
}

impl Command {
    fn server(&self) -> Option<&str> {
        match self {
            Self::Servers => None,
            Self::Ls { server, .. }
            | Self::Tree { server, .. }
            | Self::Open { server, .. }
            | Self::Save { server, .. }
            | Self::Upload { server, .. }
            | Self::Touch { server, .. }
            | Self::Mkdir { server, .. }
            | Self::Rm { server, .. }
            | Self::Mv { server, .. }
            | Self::Chmod { server, .. } => Some(server),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "remdev=info,remdev_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => commands::default_config_path().context("no config directory on this system")?,
    };
    let config = commands::load_config(&config_path)?;

    let Some(key) = cli.command.server() else {
        commands::print_servers(&config);
        return Ok(());
    };
    let profile = config
        .find_server(key)
        .cloned()
        .with_context(|| format!("no server named {:?} in {}", key, config_path.display()))?;

    let session = Session::spawn(connector(&config), Arc::new(TracingObserver), config.session.clone());
    let result = async {
        session.connect(profile).await?;
        commands::run(&session, &config, cli.command).await
    }
    .await;
    session.disconnect().await;

    if let Err(err) = &result {
        tracing::debug!("command failed: {:?}", err);
    }
    result
}

fn connector(config: &Config) -> Arc<ProtocolConnector> {
    let ftp = FtpConnector {
        io_timeout: config.session.op_timeout(),
        ..FtpConnector::default()
    };
    Arc::new(ProtocolConnector::new(SftpConnector::default(), ftp))
}
