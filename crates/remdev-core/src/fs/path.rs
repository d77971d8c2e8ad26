//! Conversions between local paths and remote POSIX paths.
//!
//! Remote paths always use `/`. The temp mirror maps a remote file to a
//! local path under `<temp dir>/<namespace>/<host>/<remote path>` and back;
//! this layout is the contract between download and upload.

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use crate::config::settings::MirrorSettings;
use crate::error::{CoreError, CoreResult};

/// Mirror directory that holds login-relative remote paths.
const RELATIVE_SEGMENT: &str = "~";

/// Normalises a path for the remote protocol.
///
/// Backslashes become `/`. A leading `/` is stripped only when the path has
/// no other `/`, so `"/file.txt"` becomes `"file.txt"` while
/// `"/var/www/file.txt"` is kept as is.
pub fn to_server_format(path: &str) -> String {
    let mut normalized = path.replace('\\', "/");
    if normalized.starts_with('/') && !normalized[1..].contains('/') {
        normalized.remove(0);
    }
    normalized
}

/// Joins remote path components with `/`.
///
/// An empty base yields `name` unchanged (login-relative).
pub fn join_remote(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else if base.ends_with('/') {
        format!("{}{}", base, name)
    } else {
        format!("{}/{}", base, name)
    }
}

/// Returns the parent of a remote path.
///
/// `"/a/b"` → `"/a"`, `"/a"` → `"/"`, `"a"` → `""` (the login directory).
pub fn parent_remote(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", _)) => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
        None if path.starts_with('/') => "/".to_string(),
        None => String::new(),
    }
}

/// Returns the last component of a remote path.
pub fn file_name_remote(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// The OS temp directory, discovered once per process.
///
/// `TEMP`, `TMP` and `TMPDIR` are consulted in that order before falling
/// back to [`std::env::temp_dir`].
pub fn os_temp_dir() -> &'static Path {
    static TEMP_DIR: OnceLock<PathBuf> = OnceLock::new();
    TEMP_DIR.get_or_init(|| {
        ["TEMP", "TMP", "TMPDIR"]
            .iter()
            .filter_map(std::env::var_os)
            .find(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    })
}

/// The local temp mirror used as the editing stand-in for remote files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempMirror {
    root: PathBuf,
}

impl TempMirror {
    /// Uses `root` directly as the mirror root (`<temp>/<namespace>`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Builds the mirror root from settings, defaulting to the OS temp dir.
    pub fn from_settings(settings: &MirrorSettings) -> Self {
        let base = settings
            .root
            .clone()
            .unwrap_or_else(|| os_temp_dir().to_path_buf());
        Self::new(base.join(&settings.namespace))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local directory holding every mirrored file of `host`.
    pub fn host_dir(&self, host: &str) -> CoreResult<PathBuf> {
        validate_segment(host).map_err(|reason| {
            CoreError::InvalidPath(format!("host {:?} {}", host, reason))
        })?;
        Ok(self.root.join(host))
    }

    /// Derives the local mirror path for `remote_path` on `host`.
    ///
    /// Absolute remote paths land directly under the host directory;
    /// login-relative ones under a `~` directory. An absolute path whose
    /// first segment starts with `~` gets one extra `~` so the two never
    /// collide.
    pub fn temp_path_for(&self, host: &str, remote_path: &str) -> CoreResult<PathBuf> {
        let remote = remote_path.replace('\\', "/");
        let absolute = remote.starts_with('/');
        let mut local = self.host_dir(host)?;
        if !absolute {
            local.push(RELATIVE_SEGMENT);
        }

        let mut pushed = 0;
        for segment in remote.split('/').filter(|s| !s.is_empty()) {
            validate_segment(segment).map_err(|reason| {
                CoreError::InvalidPath(format!("remote path {:?}: {}", remote_path, reason))
            })?;
            if absolute && pushed == 0 && segment.starts_with(RELATIVE_SEGMENT) {
                local.push(format!("{}{}", RELATIVE_SEGMENT, segment));
            } else {
                local.push(segment);
            }
            pushed += 1;
        }
        if pushed == 0 {
            return Err(CoreError::InvalidPath(format!(
                "remote path {:?} names no file",
                remote_path
            )));
        }
        Ok(local)
    }

    /// Inverse of [`TempMirror::temp_path_for`].
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidPath`] if `local_path` is not inside the mirror
    /// directory of `host`.
    pub fn remote_path_from_temp(&self, local_path: &Path, host: &str) -> CoreResult<String> {
        let host_dir = self.host_dir(host)?;
        let not_mirrored = || {
            CoreError::InvalidPath(format!(
                "{} is not a temp mirror of {}",
                local_path.display(),
                host
            ))
        };
        let relative = local_path.strip_prefix(&host_dir).map_err(|_| not_mirrored())?;

        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    segments.push(part.to_str().ok_or_else(not_mirrored)?.to_string())
                }
                _ => return Err(not_mirrored()),
            }
        }

        match segments.split_first() {
            Some((first, rest)) if first == RELATIVE_SEGMENT => {
                if rest.is_empty() {
                    Err(not_mirrored())
                } else {
                    Ok(rest.join("/"))
                }
            }
            Some((first, rest)) => {
                let first = first.strip_prefix(RELATIVE_SEGMENT).unwrap_or(first.as_str());
                let mut path = format!("/{}", first);
                for segment in rest {
                    path.push('/');
                    path.push_str(segment);
                }
                Ok(path)
            }
            None => Err(not_mirrored()),
        }
    }
}

fn validate_segment(segment: &str) -> Result<(), &'static str> {
    if segment.is_empty() {
        return Err("is empty");
    }
    if segment == "." || segment == ".." {
        return Err("contains a relative component");
    }
    if segment.contains('/') || segment.contains('\\') {
        return Err("contains a path separator");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn server_format_replaces_backslashes() {
        assert_eq!(to_server_format("a\\b\\c.txt"), "a/b/c.txt");
    }

    #[test]
    fn server_format_strips_single_segment_leading_slash() {
        assert_eq!(to_server_format("/file.txt"), "file.txt");
        assert_eq!(to_server_format("\\file.txt"), "file.txt");
        assert_eq!(to_server_format("/"), "");
    }

    #[test]
    fn server_format_keeps_multi_segment_absolute_paths() {
        assert_eq!(to_server_format("/var/www/index.php"), "/var/www/index.php");
        assert_eq!(to_server_format("\\var\\www"), "/var/www");
        assert_eq!(to_server_format("/public_html/"), "/public_html/");
    }

    #[test]
    fn server_format_is_idempotent() {
        let samples = [
            "", "/", "//", "/a", "a", "/a/b", "a/b", "\\a", "\\a\\b", "/a/", "C:\\x\\y", "/\\a",
        ];
        for sample in samples {
            let once = to_server_format(sample);
            assert_eq!(to_server_format(&once), once, "input {:?}", sample);
        }
    }

    #[test]
    fn join_remote_handles_slashes() {
        assert_eq!(join_remote("/home", "file.txt"), "/home/file.txt");
        assert_eq!(join_remote("/home/", "file.txt"), "/home/file.txt");
        assert_eq!(join_remote("/", "home"), "/home");
        assert_eq!(join_remote("", "home"), "home");
    }

    #[test]
    fn parent_remote_walks_up() {
        assert_eq!(parent_remote("/a/b.txt"), "/a");
        assert_eq!(parent_remote("/a"), "/");
        assert_eq!(parent_remote("/a/b/"), "/a");
        assert_eq!(parent_remote("a/b"), "a");
        assert_eq!(parent_remote("a"), "");
    }

    #[test]
    fn file_name_remote_takes_last_segment() {
        assert_eq!(file_name_remote("/a/b.txt"), "b.txt");
        assert_eq!(file_name_remote("/a/dir/"), "dir");
        assert_eq!(file_name_remote("plain"), "plain");
    }

    #[test]
    fn temp_path_is_namespaced_by_host() {
        let mirror = TempMirror::new("/tmp/remdev");
        let local = mirror
            .temp_path_for("example.com", "/var/www/index.php")
            .unwrap();
        assert_eq!(
            local,
            PathBuf::from("/tmp/remdev/example.com/var/www/index.php")
        );
    }

    #[test]
    fn temp_path_round_trips() {
        let tmp = TempDir::new().unwrap();
        let mirror = TempMirror::new(tmp.path().join("remdev"));
        let samples = [
            "/var/www/index.php",
            "/a.txt",
            "notes/todo.md",
            "plain.txt",
            "/deep/er/and/deeper/file with spaces.txt",
        ];
        for remote in samples {
            let local = mirror.temp_path_for("host-1", remote).unwrap();
            let back = mirror.remote_path_from_temp(&local, "host-1").unwrap();
            assert_eq!(back, remote, "round trip of {:?}", remote);
        }
    }

    #[test]
    fn relative_and_absolute_do_not_collide() {
        let mirror = TempMirror::new("/tmp/remdev");
        let abs = mirror.temp_path_for("h", "/a.txt").unwrap();
        let rel = mirror.temp_path_for("h", "a.txt").unwrap();
        assert_ne!(abs, rel);
    }

    #[test]
    fn absolute_tilde_dir_does_not_collide_with_relative() {
        let tmp = TempDir::new().unwrap();
        let mirror = TempMirror::new(tmp.path().join("remdev"));
        let abs = mirror.temp_path_for("h", "/~/a.txt").unwrap();
        let rel = mirror.temp_path_for("h", "a.txt").unwrap();
        assert_ne!(abs, rel);
        assert_eq!(abs, tmp.path().join("remdev/h/~~/a.txt"));

        for remote in ["/~/a.txt", "/~user/b.txt", "/~~/c.txt", "a.txt", "~/d.txt"] {
            let local = mirror.temp_path_for("h", remote).unwrap();
            let back = mirror.remote_path_from_temp(&local, "h").unwrap();
            assert_eq!(back, remote, "round trip of {:?}", remote);
        }
    }

    #[test]
    fn temp_path_rejects_traversal() {
        let mirror = TempMirror::new("/tmp/remdev");
        assert!(matches!(
            mirror.temp_path_for("h", "/a/../../etc/passwd"),
            Err(CoreError::InvalidPath(_))
        ));
        assert!(matches!(
            mirror.temp_path_for("../h", "/a.txt"),
            Err(CoreError::InvalidPath(_))
        ));
        assert!(matches!(
            mirror.temp_path_for("h", "/"),
            Err(CoreError::InvalidPath(_))
        ));
    }

    #[test]
    fn path_outside_mirror_is_invalid() {
        let mirror = TempMirror::new("/tmp/remdev");
        let result = mirror.remote_path_from_temp(Path::new("/home/me/notes.txt"), "h");
        assert!(matches!(result, Err(CoreError::InvalidPath(_))));
    }

    #[test]
    fn path_of_other_host_is_invalid() {
        let mirror = TempMirror::new("/tmp/remdev");
        let local = mirror.temp_path_for("one", "/a.txt").unwrap();
        assert!(matches!(
            mirror.remote_path_from_temp(&local, "two"),
            Err(CoreError::InvalidPath(_))
        ));
    }

    #[test]
    fn host_dir_itself_is_invalid() {
        let mirror = TempMirror::new("/tmp/remdev");
        let result = mirror.remote_path_from_temp(Path::new("/tmp/remdev/h"), "h");
        assert!(matches!(result, Err(CoreError::InvalidPath(_))));
        let result = mirror.remote_path_from_temp(Path::new("/tmp/remdev/h/~"), "h");
        assert!(matches!(result, Err(CoreError::InvalidPath(_))));
    }

    #[test]
    fn from_settings_appends_namespace() {
        let settings = MirrorSettings {
            namespace: "ns".to_string(),
            root: Some(PathBuf::from("/scratch")),
        };
        assert_eq!(
            TempMirror::from_settings(&settings).root(),
            Path::new("/scratch/ns")
        );
    }

    #[test]
    fn os_temp_dir_is_stable() {
        assert_eq!(os_temp_dir(), os_temp_dir());
    }
}
