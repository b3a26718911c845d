//! Small value types shared by the table implementations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Slot position returned by `find`.
///
/// A position is only meaningful for the table that produced it and only
/// until that table is mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position(pub(crate) usize);

impl Position {
    /// Raw slot index.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// Reference to interned bytes inside a [`TextSegment`](crate::TextSegment).
///
/// Fixed width, so it can be stored as a key or value of any table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TextRef {
    pub offset: u32,
    pub len: u32,
}

impl TextRef {
    /// The empty reference. Resolves to `""`.
    pub const EMPTY: TextRef = TextRef { offset: 0, len: 0 };

    pub fn is_empty(self) -> bool {
        self.len == 0
    }
}

/// What a call to `clear()` did.
///
/// The first `clear()` on a populated table empties it and keeps the mapped
/// region warm. A `clear()` on an already empty table releases the region and
/// deletes the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    Emptied,
    Released,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_ref_empty() {
        assert!(TextRef::EMPTY.is_empty());
        assert!(!TextRef { offset: 0, len: 3 }.is_empty());
    }

    #[test]
    fn position_display() {
        assert_eq!(format!("{}", Position(12)), "slot#12");
    }
}
