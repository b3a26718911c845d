//! Persistent map keyed by strings.
//!
//! Keys are interned into a [`TextSegment`] stored next to the slot table
//! (`<name>` and `<name>.txt`); the slot keeps only the [`TextRef`]. The slot
//! hash is computed over the key text, so lookups by `&str` never touch the
//! text of non-matching slots.
//!
//! The segment is append-only. Erasing a key leaves its text behind; the
//! text of the most recently erased key is reused if that same key is
//! inserted again, so erase/insert cycles on one key do not grow it. Other
//! erased text stays until [`MmapStrMap::clear`].

use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

use crate::codec::FixedCodec;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::hash::hash_bytes;
use crate::region::Location;
use crate::table::RawTable;
use crate::text::TextSegment;
use crate::types::{ClearOutcome, Position, TextRef};

/// Persistent map from strings to `V`.
pub struct MmapStrMap<V> {
    table: RawTable,
    text: TextSegment,
    /// Text of the last erased key, still intact in the segment.
    recycled: Option<TextRef>,
    _value: PhantomData<fn() -> V>,
}

impl<V> fmt::Debug for MmapStrMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmapStrMap")
            .field("location", self.table.location())
            .field("len", &self.table.len())
            .field("txt_size", &self.text.used())
            .finish()
    }
}

/// One entry yielded by [`MmapStrMap::iter`].
#[derive(Debug, Clone, PartialEq)]
pub struct StrEntry<'a, V> {
    pub key: &'a str,
    pub value: V,
    pub position: Position,
}

impl<V: FixedCodec> MmapStrMap<V> {
    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    pub fn create_at(location: Location, config: &StoreConfig) -> Result<Self, StoreError> {
        let text = TextSegment::create_at(location.with_suffix(".txt"), config)?;
        let table = RawTable::create(location, TextRef::SIZE, V::SIZE, config.clone())?;
        Ok(MmapStrMap {
            table,
            text,
            recycled: None,
            _value: PhantomData,
        })
    }

    /// Opens the map at `location`; `Ok(None)` if it was never created.
    pub fn open_at(location: Location, config: &StoreConfig) -> Result<Option<Self>, StoreError> {
        let text_location = location.with_suffix(".txt");
        let Some(table) = RawTable::open(location, TextRef::SIZE, V::SIZE, config.clone())? else {
            return Ok(None);
        };
        let text = match TextSegment::open_at(text_location.clone(), config)? {
            Some(text) => text,
            None if table.len() == 0 => TextSegment::create_at(text_location, config)?,
            None => {
                return Err(StoreError::Corrupt {
                    path: text_location.describe(),
                    reason: "key text missing for a populated table".into(),
                })
            }
        };
        Ok(Some(MmapStrMap {
            table,
            text,
            recycled: None,
            _value: PhantomData,
        }))
    }

    pub fn open_or_create_at(location: Location, config: &StoreConfig) -> Result<Self, StoreError> {
        match Self::open_at(location.clone(), config)? {
            Some(map) => Ok(map),
            None => Self::create_at(location, config),
        }
    }

    pub fn create(dir: impl AsRef<Path>, name: &str) -> Result<Self, StoreError> {
        Self::create_at(Location::file(dir, name), &StoreConfig::default())
    }

    pub fn open(dir: impl AsRef<Path>, name: &str) -> Result<Option<Self>, StoreError> {
        Self::open_at(Location::file(dir, name), &StoreConfig::default())
    }

    pub fn open_or_create(dir: impl AsRef<Path>, name: &str) -> Result<Self, StoreError> {
        Self::open_or_create_at(Location::file(dir, name), &StoreConfig::default())
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::in_memory_with(&StoreConfig::default())
    }

    pub fn in_memory_with(config: &StoreConfig) -> Result<Self, StoreError> {
        Self::create_at(Location::Memory, config)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    pub fn load_factor(&self) -> f64 {
        self.table.load_factor()
    }

    pub fn conflict_factor(&self) -> f64 {
        self.table.conflict_factor()
    }

    /// Bytes of interned key text, including text of erased keys.
    pub fn txt_size(&self) -> usize {
        self.text.used()
    }

    pub fn location(&self) -> &Location {
        self.table.location()
    }

    pub fn is_released(&self) -> bool {
        self.table.is_released()
    }

    pub fn find(&self, key: &str) -> Option<Position> {
        self.table
            .find(hash_bytes(key.as_bytes()), |stored| {
                self.text.bytes(TextRef::decode(stored)) == key.as_bytes()
            })
            .map(Position)
    }

    pub fn has(&self, key: &str) -> bool {
        self.find(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.find(key).map(|pos| V::decode(self.table.value(pos.0)))
    }

    /// Key text at `pos`. Empty for a slot that is not live.
    pub fn get_sview(&self, pos: Position) -> &str {
        match self.key_ref(pos) {
            Some(r) => self.text.text(r),
            None => "",
        }
    }

    /// Where the key at `pos` lives in the text segment.
    pub fn key_ref(&self, pos: Position) -> Option<TextRef> {
        self.table
            .is_full(pos.0)
            .then(|| TextRef::decode(self.table.key(pos.0)))
    }

    /// Resolves a reference previously returned by [`key_ref`](Self::key_ref).
    pub fn text(&self, r: TextRef) -> &str {
        self.text.text(r)
    }

    pub fn value_at(&self, pos: Position) -> Option<V> {
        self.table
            .is_full(pos.0)
            .then(|| V::decode(self.table.value(pos.0)))
    }

    pub fn iter(&self) -> StrIter<'_, V> {
        StrIter { map: self, next: 0 }
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Inserts or replaces. The key text is interned only for new keys.
    pub fn insert(&mut self, key: &str, value: V) -> Result<Option<V>, StoreError> {
        if let Some(pos) = self.find(key) {
            let old = V::decode(self.table.value(pos.0));
            value.encode(self.table.value_mut(pos.0));
            return Ok(Some(old));
        }
        self.insert_new(key, &value)?;
        Ok(None)
    }

    fn insert_new(&mut self, key: &str, value: &V) -> Result<usize, StoreError> {
        let r = match self.recycled.take() {
            Some(r) if self.text.bytes(r) == key.as_bytes() => r,
            _ => self.text.append(key)?,
        };
        self.table
            .insert_new(hash_bytes(key.as_bytes()), &r.to_bytes(), &value.to_bytes())
    }

    pub fn set_at(&mut self, pos: Position, value: V) -> bool {
        if !self.table.is_full(pos.0) {
            return false;
        }
        value.encode(self.table.value_mut(pos.0));
        true
    }

    /// Applies `f` to the value for `key`, inserting `V::default()` first.
    pub fn update<R>(&mut self, key: &str, f: impl FnOnce(&mut V) -> R) -> Result<R, StoreError>
    where
        V: Default,
    {
        let slot = match self.find(key) {
            Some(pos) => pos.0,
            None => self.insert_new(key, &V::default())?,
        };
        let mut value = V::decode(self.table.value(slot));
        let out = f(&mut value);
        value.encode(self.table.value_mut(slot));
        Ok(out)
    }

    pub fn erase(&mut self, key: &str) -> bool {
        match self.find(key) {
            Some(pos) => {
                self.recycled = self.key_ref(pos);
                self.table.erase_slot(pos.0);
                true
            }
            None => false,
        }
    }

    /// Same two-phase behaviour as [`MmapMap::clear`](crate::MmapMap::clear);
    /// the key text follows the table.
    pub fn clear(&mut self) -> Result<ClearOutcome, StoreError> {
        let outcome = self.table.clear()?;
        self.recycled = None;
        match outcome {
            ClearOutcome::Emptied => self.text.reset(),
            ClearOutcome::Released => self.text.release()?,
        }
        Ok(outcome)
    }

    pub fn sync(&self) -> Result<(), StoreError> {
        self.table.flush()?;
        self.text.flush()
    }
}

/// Iterator over the entries of a [`MmapStrMap`] in slot order.
pub struct StrIter<'a, V> {
    map: &'a MmapStrMap<V>,
    next: usize,
}

impl<'a, V: FixedCodec> Iterator for StrIter<'a, V> {
    type Item = StrEntry<'a, V>;

    fn next(&mut self) -> Option<StrEntry<'a, V>> {
        let map = self.map;
        let slot = map.table.next_full(self.next)?;
        self.next = slot + 1;
        Some(StrEntry {
            key: map.text.text(TextRef::decode(map.table.key(slot))),
            value: V::decode(map.table.value(slot)),
            position: Position(slot),
        })
    }
}
