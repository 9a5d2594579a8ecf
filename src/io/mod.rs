//! File plumbing: discovery, streaming decode and the done-marker rename.

pub mod compression;
pub mod glob;
pub mod lifecycle;

pub use compression::open_lines;
pub use glob::expand_glob;
pub use lifecycle::{DONE_MARKER, dot_rename, is_marked_done};
