//! Storage error types for lgdb-store.
//!
//! [`StoreError`] covers the environmental failures of the persistent store:
//! I/O on the backing files, damaged headers, and tables reopened with a
//! layout that does not match the one they were created with. Lookup misses
//! are never errors; they surface as `Option`/`bool` at the call site.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Creating, mapping, resizing or deleting a backing file failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A backing file exists but its header cannot be trusted.
    #[error("corrupt table {path}: {reason}", path = path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// A table was reopened with key/value widths different from the ones
    /// recorded in its header.
    #[error(
        "layout mismatch in {path}: expected {expected:?} (key, value) bytes, found {found:?}",
        path = path.display()
    )]
    LayoutMismatch {
        path: PathBuf,
        expected: (usize, usize),
        found: (usize, usize),
    },

    /// A text segment cannot address more than `u32::MAX` bytes.
    #[error("text segment overflow: cannot append {len} bytes")]
    TextOverflow { len: usize },
}
