use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use tokio_util::sync::CancellationToken;

use remdev_core::fs::path::{file_name_remote, parent_remote};
use remdev_core::{
    change_permissions, create_file, create_folder, delete_entry, rename_entry, Config,
    CoreError, NodeId, Phase, RemoteEntry, RemoteTree, Session, TempMirror, TransferCoordinator,
    TransferProgress,
};

use crate::Command;

/// `<config dir>/remdev/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("remdev").join("config.toml"))
}

/// Loads the config file, or defaults when it does not exist yet.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    match Config::load(path) {
        Ok(config) => Ok(config),
        Err(CoreError::NotFound(_)) => {
            tracing::info!("no config at {}, using defaults", path.display());
            Ok(Config::default())
        }
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

pub fn print_servers(config: &Config) {
    if config.servers.is_empty() {
        println!("no servers configured");
        return;
    }
    for server in &config.servers {
        println!(
            "{:<20} {:<5} {}  {}",
            server.name,
            server.protocol_kind(),
            server.display_label(),
            server.initial_path()
        );
    }
}

pub async fn run(session: &Session, config: &Config, command: Command) -> anyhow::Result<()> {
    let coordinator = TransferCoordinator::new(
        session.clone(),
        TempMirror::from_settings(&config.mirror),
    )
    .with_progress(Arc::new(print_progress));

    match command {
        Command::Servers => print_servers(config),
        Command::Ls { path, .. } => {
            let path = path.unwrap_or_else(|| session.base_path());
            let mut tree = RemoteTree::new(path);
            for id in tree.load_root(session).await? {
                if let Some(entry) = tree.entry(id) {
                    println!("{}", format_entry(entry));
                }
            }
        }
        Command::Tree { path, depth, .. } => {
            let path = path.unwrap_or_else(|| session.base_path());
            print_tree(session, path, depth).await?;
        }
        Command::Open { remote, .. } => {
            let entry = lookup(session, &remote).await?;
            let local = with_ctrl_c(|cancel| async move {
                coordinator.download_to_temp(&entry, cancel).await
            })
            .await?;
            println!("{}", local.display());
        }
        Command::Save { local, .. } => {
            let remote = with_ctrl_c(|cancel| async move {
                coordinator.upload_from_temp(&local, cancel).await
            })
            .await?;
            println!("saved {}", remote);
        }
        Command::Upload {
            local, remote_dir, ..
        } => {
            let remote = with_ctrl_c(|cancel| async move {
                coordinator.upload_local_file(&local, &remote_dir, cancel).await
            })
            .await?;
            println!("uploaded {}", remote);
        }
        Command::Touch { dir, name, .. } => {
            println!("created {}", create_file(session, &dir, &name).await?);
        }
        Command::Mkdir { dir, name, .. } => {
            println!("created {}", create_folder(session, &dir, &name).await?);
        }
        Command::Rm { path, .. } => {
            let entry = lookup(session, &path).await?;
            delete_entry(session, &entry).await?;
            println!("deleted {}", entry.path);
        }
        Command::Mv { path, new_name, .. } => {
            let entry = lookup(session, &path).await?;
            println!("renamed to {}", rename_entry(session, &entry, &new_name).await?);
        }
        Command::Chmod { path, mode, .. } => {
            let entry = lookup(session, &path).await?;
            let mode = change_permissions(session, &entry, &mode).await?;
            println!("{} is now {:o}", entry.path, mode);
        }
    }
    Ok(())
}

/// Finds `path` in a listing of its parent directory.
async fn lookup(session: &Session, path: &str) -> anyhow::Result<RemoteEntry> {
    let name = file_name_remote(path);
    session
        .list(&parent_remote(path))
        .await?
        .into_iter()
        .find(|entry| entry.name == name)
        .ok_or_else(|| anyhow!("{} not found", path))
}

/// Runs a transfer that Ctrl-C cancels.
async fn with_ctrl_c<F, Fut, T>(transfer: F) -> Result<T, CoreError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: std::future::Future<Output = Result<T, CoreError>>,
{
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("cancelling...");
                cancel.cancel();
            }
        })
    };
    let result = transfer(cancel).await;
    watcher.abort();
    result
}

async fn print_tree(session: &Session, root: String, depth: usize) -> anyhow::Result<()> {
    println!("{}", root);
    let mut tree = RemoteTree::new(root);
    let roots = tree.load_root(session).await?;

    let mut stack: Vec<(NodeId, usize)> = roots.into_iter().rev().map(|id| (id, 0)).collect();
    while let Some((id, level)) = stack.pop() {
        let Some(entry) = tree.entry(id) else { continue };
        println!("{}{}", "  ".repeat(level + 1), tree_label(entry));
        if !entry.is_expandable() || level + 1 >= depth {
            continue;
        }
        match tree.get_children(session, Some(id)).await {
            Ok(children) => stack.extend(children.into_iter().rev().map(|c| (c, level + 1))),
            Err(e) => eprintln!("{}  ! {}", "  ".repeat(level + 2), e),
        }
    }
    Ok(())
}

fn tree_label(entry: &RemoteEntry) -> String {
    if entry.is_expandable() {
        format!("{}/", entry.name)
    } else {
        entry.name.clone()
    }
}

fn format_entry(entry: &RemoteEntry) -> String {
    format!(
        "{}{} {:>9} {}",
        entry.kind.code(),
        entry.permissions.to_symbolic(),
        entry.human_size(),
        tree_label(entry)
    )
}

fn print_progress(progress: &TransferProgress) {
    match progress.phase {
        Phase::Started => eprintln!("{} ...", progress.remote_path),
        Phase::InProgress => match progress.percent() {
            Some(pct) => eprintln!("  {:>5.1}%", pct),
            None => eprintln!("  {} bytes", progress.transferred),
        },
        Phase::Finished => eprintln!("  done ({} bytes)", progress.transferred),
        Phase::Failed => eprintln!("  failed"),
        Phase::Cancelled => eprintln!("  cancelled"),
    }
}
