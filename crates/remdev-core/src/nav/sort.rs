//! Ordering for remote listings.

use std::cmp::Ordering;

use crate::fs::entry::RemoteEntry;

/// Compares two entries: directories (and symlinks, which expand like
/// directories) before files, then case-insensitive by name.
///
/// Names equal under case folding fall back to a byte comparison so the
/// order is total and stable between refreshes.
pub fn compare_entries(a: &RemoteEntry, b: &RemoteEntry) -> Ordering {
    b.is_expandable()
        .cmp(&a.is_expandable())
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
}

/// Sorts a listing in place with [`compare_entries`].
pub fn sort_entries(entries: &mut [RemoteEntry]) {
    entries.sort_by(compare_entries);
}
