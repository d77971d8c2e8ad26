//! Remote entry representation.

use std::time::SystemTime;

use unicode_normalization::UnicodeNormalization;

use crate::nav::tree::NodeId;

/// What kind of filesystem object an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

impl EntryKind {
    /// Single-letter code as printed by `ls -l`.
    pub fn code(self) -> char {
        match self {
            Self::File => '-',
            Self::Directory => 'd',
            Self::Symlink => 'l',
        }
    }
}

/// Symbolic `rwx` permission triple for user, group and other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permissions {
    pub user: String,
    pub group: String,
    pub other: String,
}

impl Permissions {
    /// Builds the triple from the low nine bits of a unix mode.
    pub fn from_mode(mode: u32) -> Self {
        Self {
            user: triad(mode >> 6),
            group: triad(mode >> 3),
            other: triad(mode),
        }
    }

    /// Parses a nine-character `rwxr-xr-x` string.
    ///
    /// Returns `None` if the string is too short.
    pub fn from_symbolic(s: &str) -> Option<Self> {
        let chars: Vec<char> = s.chars().collect();
        if chars.len() < 9 {
            return None;
        }
        let part = |range: std::ops::Range<usize>| chars[range].iter().collect::<String>();
        Some(Self {
            user: part(0..3),
            group: part(3..6),
            other: part(6..9),
        })
    }

    /// Placeholder for protocols that do not report permissions.
    pub fn unknown() -> Self {
        Self {
            user: "---".to_string(),
            group: "---".to_string(),
            other: "---".to_string(),
        }
    }

    /// The numeric mode (`0o755`) encoded by the triple.
    pub fn to_mode(&self) -> u32 {
        (triad_value(&self.user) << 6) | (triad_value(&self.group) << 3) | triad_value(&self.other)
    }

    /// Three-digit octal text such as `"644"`.
    pub fn to_octal(&self) -> String {
        format!(
            "{}{}{}",
            triad_value(&self.user),
            triad_value(&self.group),
            triad_value(&self.other)
        )
    }

    /// `rwxr-xr-x` form.
    pub fn to_symbolic(&self) -> String {
        format!("{}{}{}", self.user, self.group, self.other)
    }
}

/// Parses user-entered octal permission text like `"755"` or `"0644"`.
pub fn parse_octal_mode(text: &str) -> Option<u32> {
    let text = text.trim();
    if text.is_empty() || text.len() > 4 {
        return None;
    }
    u32::from_str_radix(text, 8).ok().filter(|mode| *mode <= 0o7777)
}

fn triad(bits: u32) -> String {
    let r = if bits & 0b100 != 0 { 'r' } else { '-' };
    let w = if bits & 0b010 != 0 { 'w' } else { '-' };
    let x = if bits & 0b001 != 0 { 'x' } else { '-' };
    [r, w, x].iter().collect()
}

fn triad_value(s: &str) -> u32 {
    s.chars()
        .map(|c| match c {
            'r' => 4,
            'w' => 2,
            'x' | 's' | 't' => 1,
            _ => 0,
        })
        .sum()
}

/// A single remote file, directory or symbolic link.
///
/// Entries are recreated on every listing. The only fields set after the
/// transport produced an entry are `path` (always `join(parent, name)`),
/// `parent` and `expanded`, which belong to the tree feeder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub modify_time: Option<SystemTime>,
    pub access_time: Option<SystemTime>,
    pub permissions: Permissions,
    pub owner: u32,
    pub group: u32,
    /// Absolute or login-relative remote path.
    pub path: String,
    /// Index of the parent node in a [`crate::RemoteTree`].
    pub parent: Option<NodeId>,
    pub expanded: bool,
    pub description: Option<String>,
}

impl RemoteEntry {
    /// Creates an entry with the given name and kind and empty metadata.
    ///
    /// The name is normalised to NFC; some servers report decomposed names.
    pub fn new(name: &str, kind: EntryKind) -> Self {
        Self {
            name: name.nfc().collect(),
            kind,
            size: 0,
            modify_time: None,
            access_time: None,
            permissions: Permissions::unknown(),
            owner: 0,
            group: 0,
            path: String::new(),
            parent: None,
            expanded: false,
            description: None,
        }
    }

    /// Returns `true` for directories.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Returns `true` if the entry can be expanded in a tree.
    ///
    /// Symbolic links are treated as directories; listing one that points
    /// at a file simply fails.
    pub fn is_expandable(&self) -> bool {
        matches!(self.kind, EntryKind::Directory | EntryKind::Symlink)
    }

    /// Returns `true` if the name starts with `.`.
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }

    /// Size formatted with one decimal and a B/KB/MB/GB unit.
    pub fn human_size(&self) -> String {
        const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
        let mut size = self.size as f64;
        let mut unit = 0;
        while size >= 1024.0 && unit < UNITS.len() - 1 {
            size /= 1024.0;
            unit += 1;
        }
        format!("{:.1} {}", size, UNITS[unit])
    }
}
