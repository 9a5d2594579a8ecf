//! Marking input files as handled.
//!
//! A processed file `dir/name` is renamed in place to `dir/.name`. The rename
//! only means "do not pick this up again"; it says nothing about whether the
//! load succeeded.

use anyhow::{Context, Result, anyhow};
use std::fs;
use std::path::{Path, PathBuf};

/// Leading marker character for handled files.
pub const DONE_MARKER: char = '.';

/// Rename `path` to the same directory with [`DONE_MARKER`] prepended to
/// the file name, returning the new path.
///
/// # Errors
///
/// Returns an error if `path` has no file name or the rename fails.
pub fn dot_rename(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("no file name in {}", path.display()))?;

    let mut marked = std::ffi::OsString::from(DONE_MARKER.to_string());
    marked.push(name);
    let target = path.with_file_name(marked);

    fs::rename(path, &target)
        .with_context(|| format!("rename {} -> {}", path.display(), target.display()))?;
    Ok(target)
}

/// Whether the file name already carries [`DONE_MARKER`].
#[must_use]
pub fn is_marked_done(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with(DONE_MARKER))
}
