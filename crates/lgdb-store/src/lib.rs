//! Persistent memory-mapped hash tables for lgdb.
//!
//! Every table is a single file holding an open-addressing slot array. The
//! file is mapped into memory, so reopening a table costs one `mmap` and
//! no parsing. Tables created with [`Location::Memory`] use anonymous
//! mappings and vanish with the process.
//!
//! # Modules
//!
//! - [`codec`]: fixed-width encodings for keys and values
//! - [`hash`]: stable key hashing ([`MapKey`])
//! - [`map`]: [`MmapMap`], the typed map
//! - [`str_map`]: [`MmapStrMap`], the string-keyed map with its text segment
//! - [`text`]: [`TextSegment`], append-only interned text
//! - [`region`]: file and anonymous mappings
//! - [`config`]: [`StoreConfig`] sizing knobs
//! - [`error`]: [`StoreError`]

pub mod codec;
pub mod config;
pub mod error;
pub mod hash;
pub mod map;
pub mod region;
pub mod str_map;
mod table;
pub mod text;
pub mod types;

// Re-export key types for ergonomic use.
pub use codec::{FieldReader, FieldWriter, FixedCodec};
pub use config::StoreConfig;
pub use error::StoreError;
pub use hash::{hash_bytes, mix64, MapKey};
pub use map::{MmapMap, ValueMut};
pub use region::Location;
pub use str_map::{MmapStrMap, StrEntry};
pub use text::TextSegment;
pub use types::{ClearOutcome, Position, TextRef};
