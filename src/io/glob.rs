//! Input file discovery.
//!
//! # Examples
//!
//! ```no_run
//! use appsloader::io::glob::expand_glob;
//!
//! let files = expand_glob("./data/appsinstalled/*.tsv.gz")?;
//! # use anyhow::Error; Ok::<(), Error>(())
//! ```

use super::lifecycle::is_marked_done;
use anyhow::{Context, Result};
use glob::glob;
use std::path::PathBuf;

/// Expand a glob pattern into a sorted vector of input files.
///
/// Directories and files already marked as handled (leading `.`) are left
/// out; `*` would otherwise match them too.
///
/// # Errors
///
/// Returns an error if:
/// - The pattern is invalid
/// - There are I/O errors accessing the filesystem
///
/// No match is not an error; the result is empty.
pub fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;

    let mut result = Vec::new();
    for entry in paths {
        let path =
            entry.with_context(|| format!("error reading glob entry for pattern: {pattern}"))?;
        if path.is_file() && !is_marked_done(&path) {
            result.push(path);
        }
    }

    // Sort for deterministic order
    result.sort();

    Ok(result)
}
