//! Typed persistent hash map.
//!
//! [`MmapMap`] stores fixed-width keys and values in a [`RawTable`]. Values
//! are decoded on read and encoded on write, so lookups return owned copies;
//! in-place mutation goes through [`ValueMut`], which writes the value back
//! into its slot when dropped.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::path::Path;

use crate::codec::FixedCodec;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::hash::MapKey;
use crate::region::Location;
use crate::table::RawTable;
use crate::types::{ClearOutcome, Position};

/// Persistent open-addressing map from `K` to `V`.
pub struct MmapMap<K, V> {
    table: RawTable,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<K, V> fmt::Debug for MmapMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmapMap")
            .field("location", self.table.location())
            .field("len", &self.table.len())
            .field("capacity", &self.table.capacity())
            .finish()
    }
}

impl<K: MapKey, V: FixedCodec> MmapMap<K, V> {
    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Creates an empty map at `location`, replacing any previous contents.
    pub fn create_at(location: Location, config: &StoreConfig) -> Result<Self, StoreError> {
        let table = RawTable::create(location, K::SIZE, V::SIZE, config.clone())?;
        Ok(Self::wrap(table))
    }

    /// Opens the map stored at `location`; `Ok(None)` if there is none.
    pub fn open_at(location: Location, config: &StoreConfig) -> Result<Option<Self>, StoreError> {
        Ok(RawTable::open(location, K::SIZE, V::SIZE, config.clone())?.map(Self::wrap))
    }

    pub fn open_or_create_at(location: Location, config: &StoreConfig) -> Result<Self, StoreError> {
        match Self::open_at(location.clone(), config)? {
            Some(map) => Ok(map),
            None => Self::create_at(location, config),
        }
    }

    /// Creates `<dir>/<name>` with the default configuration.
    pub fn create(dir: impl AsRef<Path>, name: &str) -> Result<Self, StoreError> {
        Self::create_at(Location::file(dir, name), &StoreConfig::default())
    }

    pub fn open(dir: impl AsRef<Path>, name: &str) -> Result<Option<Self>, StoreError> {
        Self::open_at(Location::file(dir, name), &StoreConfig::default())
    }

    pub fn open_or_create(dir: impl AsRef<Path>, name: &str) -> Result<Self, StoreError> {
        Self::open_or_create_at(Location::file(dir, name), &StoreConfig::default())
    }

    /// A map backed by anonymous memory.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::in_memory_with(&StoreConfig::default())
    }

    pub fn in_memory_with(config: &StoreConfig) -> Result<Self, StoreError> {
        Self::create_at(Location::Memory, config)
    }

    fn wrap(table: RawTable) -> Self {
        MmapMap {
            table,
            _types: PhantomData,
        }
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

    /// Slot count. Zero after the map has been released by [`clear`](Self::clear).
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    pub fn load_factor(&self) -> f64 {
        self.table.load_factor()
    }

    pub fn conflict_factor(&self) -> f64 {
        self.table.conflict_factor()
    }

    /// Bytes of interned key text. Fixed-width maps have none.
    pub fn txt_size(&self) -> usize {
        0
    }

    pub fn location(&self) -> &Location {
        self.table.location()
    }

    pub fn is_released(&self) -> bool {
        self.table.is_released()
    }

    pub fn find(&self, key: &K) -> Option<Position> {
        let encoded = key.to_bytes();
        self.table
            .find(key.key_hash(), |stored| stored == encoded.as_slice())
            .map(Position)
    }

    pub fn has(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.find(key).map(|pos| V::decode(self.table.value(pos.0)))
    }

    /// Key stored at `pos`, if the slot is live.
    pub fn key_at(&self, pos: Position) -> Option<K> {
        self.table
            .is_full(pos.0)
            .then(|| K::decode(self.table.key(pos.0)))
    }

    /// Value stored at `pos`, if the slot is live.
    pub fn value_at(&self, pos: Position) -> Option<V> {
        self.table
            .is_full(pos.0)
            .then(|| V::decode(self.table.value(pos.0)))
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            table: &self.table,
            next: 0,
            _types: PhantomData,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = V> + '_ {
        self.iter().map(|(_, v)| v)
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Inserts or replaces. Returns the previous value, if any.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>, StoreError> {
        if let Some(pos) = self.find(&key) {
            let old = V::decode(self.table.value(pos.0));
            value.encode(self.table.value_mut(pos.0));
            return Ok(Some(old));
        }
        self.table
            .insert_new(key.key_hash(), &key.to_bytes(), &value.to_bytes())?;
        Ok(None)
    }

    /// Overwrites the value in a live slot. Returns `false` if `pos` is not live.
    pub fn set_at(&mut self, pos: Position, value: V) -> bool {
        if !self.table.is_full(pos.0) {
            return false;
        }
        value.encode(self.table.value_mut(pos.0));
        true
    }

    /// Mutable access to the value for `key`, inserting `V::default()` first
    /// if the key is absent. The value is written back when the guard drops.
    pub fn entry(&mut self, key: K) -> Result<ValueMut<'_, V>, StoreError>
    where
        V: Default,
    {
        let slot = match self.find(&key) {
            Some(pos) => pos.0,
            None => self.table.insert_new(
                key.key_hash(),
                &key.to_bytes(),
                &V::default().to_bytes(),
            )?,
        };
        let value = V::decode(self.table.value(slot));
        Ok(ValueMut {
            table: &mut self.table,
            slot,
            value,
        })
    }

    /// Applies `f` to the value for `key`, inserting the default first.
    pub fn update<R>(&mut self, key: K, f: impl FnOnce(&mut V) -> R) -> Result<R, StoreError>
    where
        V: Default,
    {
        let mut value = self.entry(key)?;
        Ok(f(&mut *value))
    }

    /// Removes `key`. Returns whether it was present.
    pub fn erase(&mut self, key: &K) -> bool {
        match self.find(key) {
            Some(pos) => {
                self.table.erase_slot(pos.0);
                true
            }
            None => false,
        }
    }

    /// Removes the entry at a live position.
    pub fn erase_at(&mut self, pos: Position) -> bool {
        if !self.table.is_full(pos.0) {
            return false;
        }
        self.table.erase_slot(pos.0);
        true
    }

    /// First call empties the map; a call on an empty map releases its
    /// storage and deletes the file. See [`ClearOutcome`].
    pub fn clear(&mut self) -> Result<ClearOutcome, StoreError> {
        self.table.clear()
    }

    /// Flushes dirty pages to the backing file.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.table.flush()
    }
}

/// Guard returned by [`MmapMap::entry`].
pub struct ValueMut<'a, V: FixedCodec> {
    table: &'a mut RawTable,
    slot: usize,
    value: V,
}

impl<V: FixedCodec> Deref for ValueMut<'_, V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.value
    }
}

impl<V: FixedCodec> DerefMut for ValueMut<'_, V> {
    fn deref_mut(&mut self) -> &mut V {
        &mut self.value
    }
}

impl<V: FixedCodec> Drop for ValueMut<'_, V> {
    fn drop(&mut self) {
        self.value.encode(self.table.value_mut(self.slot));
    }
}

/// Iterator over `(key, value)` pairs in slot order.
pub struct Iter<'a, K, V> {
    table: &'a RawTable,
    next: usize,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<K: FixedCodec, V: FixedCodec> Iterator for Iter<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        let slot = self.table.next_full(self.next)?;
        self.next = slot + 1;
        Some((K::decode(self.table.key(slot)), V::decode(self.table.value(slot))))
    }
}

impl<'a, K: MapKey, V: FixedCodec> IntoIterator for &'a MmapMap<K, V> {
    type Item = (K, V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_replace() {
        let mut map: MmapMap<u32, u64> = MmapMap::in_memory().unwrap();
        assert_eq!(map.insert(1, 10).unwrap(), None);
        assert_eq!(map.insert(2, 20).unwrap(), None);
        assert_eq!(map.insert(1, 11).unwrap(), Some(10));
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&1), Some(11));
        assert_eq!(map.get(&3), None);
        assert!(map.has(&2));
    }

    #[test]
    fn find_gives_position_for_key_and_value() {
        let mut map: MmapMap<u32, u16> = MmapMap::in_memory().unwrap();
        map.insert(42, 7).unwrap();
        let pos = map.find(&42).unwrap();
        assert_eq!(map.key_at(pos), Some(42));
        assert_eq!(map.value_at(pos), Some(7));
        assert!(map.set_at(pos, 8));
        assert_eq!(map.get(&42), Some(8));
    }

    #[test]
    fn entry_writes_back_on_drop() {
        let mut map: MmapMap<u32, u32> = MmapMap::in_memory().unwrap();
        {
            let mut v = map.entry(5).unwrap();
            assert_eq!(*v, 0);
            *v += 3;
        }
        *map.entry(5).unwrap() += 4;
        assert_eq!(map.get(&5), Some(7));

        let doubled = map.update(5, |v| {
            *v *= 2;
            *v
        });
        assert_eq!(doubled.unwrap(), 14);
        assert_eq!(map.get(&5), Some(14));
    }

    #[test]
    fn erase_and_iterate() {
        let mut map: MmapMap<u32, ()> = MmapMap::in_memory().unwrap();
        for k in 0..50 {
            map.insert(k, ()).unwrap();
        }
        for k in (0..50).step_by(2) {
            assert!(map.erase(&k));
        }
        assert!(!map.erase(&0));
        let mut keys: Vec<u32> = map.keys().collect();
        keys.sort_unstable();
        assert_eq!(keys, (1..50).step_by(2).collect::<Vec<_>>());
    }

    #[test]
    fn clear_then_clear_releases_and_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let mut map: MmapMap<u64, u64> = MmapMap::create(dir.path(), "big").unwrap();
        let initial = map.capacity();
        for k in 0..5000 {
            map.insert(k, k * 2).unwrap();
        }
        assert!(map.capacity() > initial);

        assert_eq!(map.clear().unwrap(), ClearOutcome::Emptied);
        assert!(map.is_empty());
        assert!(dir.path().join("big").exists());

        assert_eq!(map.clear().unwrap(), ClearOutcome::Released);
        assert!(!dir.path().join("big").exists());
        assert_eq!(map.get(&1), None);
        assert_eq!(map.iter().count(), 0);

        map.insert(9, 18).unwrap();
        assert_eq!(map.capacity(), initial);
        assert_eq!(map.get(&9), Some(18));
    }

    #[test]
    fn reopen_sees_persisted_entries() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut map: MmapMap<u32, i64> = MmapMap::create(dir.path(), "m").unwrap();
            map.insert(1, -1).unwrap();
            map.insert(2, -2).unwrap();
            map.sync().unwrap();
        }
        let map: MmapMap<u32, i64> = MmapMap::open(dir.path(), "m").unwrap().unwrap();
        assert_eq!(map.get(&2), Some(-2));
        assert_eq!(map.len(), 2);

        let missing: Option<MmapMap<u32, i64>> = MmapMap::open(dir.path(), "other").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn txt_size_is_zero() {
        let map: MmapMap<u32, u32> = MmapMap::in_memory().unwrap();
        assert_eq!(map.txt_size(), 0);
    }
}
