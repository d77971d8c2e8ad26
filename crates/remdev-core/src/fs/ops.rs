//! Remote file operations behind the explorer's context commands.
//!
//! Each function validates user input, derives the target path from the
//! selected entry and issues one session call (or a recursive one for
//! folders). Errors are returned unchanged so the caller can show them.

use crate::error::{CoreError, CoreResult};
use crate::fs::entry::{parse_octal_mode, RemoteEntry};
use crate::fs::path::{join_remote, parent_remote};
use crate::remote::session::Session;
use crate::remote::transport::PutSource;

/// Creates an empty file named `name` inside `dir`, returning its path.
///
/// # Errors
///
/// - [`CoreError::InvalidName`] if `name` is not a plain file name.
/// - Any session error from the upload.
pub async fn create_file(session: &Session, dir: &str, name: &str) -> CoreResult<String> {
    validate_name(name)?;
    let path = join_remote(dir, name);
    session.put(PutSource::Bytes(Vec::new()), &path).await?;
    tracing::info!(path = %path, "created file");
    Ok(path)
}

/// Creates a folder named `name` inside `dir`, returning its path.
pub async fn create_folder(session: &Session, dir: &str, name: &str) -> CoreResult<String> {
    validate_name(name)?;
    let path = join_remote(dir, name);
    session.mkdir(&path).await?;
    tracing::info!(path = %path, "created folder");
    Ok(path)
}

/// Renames `entry` within its parent directory, returning the new path.
///
/// # Errors
///
/// - [`CoreError::InvalidName`] if `new_name` is not a plain file name.
/// - Any session error from the rename.
pub async fn rename_entry(
    session: &Session,
    entry: &RemoteEntry,
    new_name: &str,
) -> CoreResult<String> {
    validate_name(new_name)?;
    let target = sibling_path(&entry.path, new_name);
    if target == entry.path {
        return Ok(target);
    }
    session.rename(&entry.path, &target).await?;
    tracing::info!(from = %entry.path, to = %target, "renamed");
    Ok(target)
}

/// Deletes a file, or a folder together with its contents.
pub async fn delete_entry(session: &Session, entry: &RemoteEntry) -> CoreResult<()> {
    if entry.is_dir() {
        session.rmdir(&entry.path, true).await?;
    } else {
        session.delete(&entry.path).await?;
    }
    tracing::info!(path = %entry.path, "deleted");
    Ok(())
}

/// Applies permission text such as `"755"` to `entry`, returning the mode.
///
/// # Errors
///
/// - [`CoreError::InvalidMode`] if `octal` is not an octal mode.
/// - [`CoreError::Unsupported`] if the protocol cannot change permissions.
pub async fn change_permissions(
    session: &Session,
    entry: &RemoteEntry,
    octal: &str,
) -> CoreResult<u32> {
    let mode = parse_octal_mode(octal).ok_or_else(|| CoreError::InvalidMode(octal.to_string()))?;
    session.chmod(&entry.path, mode).await?;
    Ok(mode)
}

/// Rejects names that would escape the target directory.
pub fn validate_name(name: &str) -> CoreResult<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(CoreError::InvalidName(name.to_string()))
    }
}

fn is_valid_name(name: &str) -> bool {
    if name.trim().is_empty() || name == "." || name == ".." {
        return false;
    }
    !name.contains('/') && !name.contains('\\') && !name.contains('\0')
}

fn sibling_path(path: &str, new_name: &str) -> String {
    join_remote(&parent_remote(path), new_name)
}
