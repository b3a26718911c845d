//! Byte-level open-addressing slot table.
//!
//! [`RawTable`] owns the mapped region and knows nothing about key or value
//! types: it stores `(ctrl, hash, key bytes, value bytes)` slots and is told
//! how to compare keys through a closure. The typed maps in
//! [`map`](crate::map) and [`str_map`](crate::str_map) sit on top of it.
//!
//! # Layout
//!
//! ```text
//! [0..8)   magic "LGDBMAP1"
//! [8..12)  version
//! [12..16) key width
//! [16..20) value width
//! [24..32) capacity (slots, power of two)
//! [32..40) live entries
//! [40..48) tombstones
//! [64..)   capacity x slot, slot = [ctrl u8][hash u64][key][value]
//! ```
//!
//! Linear probing. The slot hash is stored so rehashing never needs to decode
//! keys, which matters for text keys whose bytes live in another file.

use tracing::debug;

use crate::codec::FixedCodec;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::region::{Location, Region};
use crate::types::ClearOutcome;

pub(crate) const HEADER_SIZE: usize = 64;
const MAGIC: &[u8; 8] = b"LGDBMAP1";
const VERSION: u32 = 1;

const OFF_VERSION: usize = 8;
const OFF_KEY_SIZE: usize = 12;
const OFF_VALUE_SIZE: usize = 16;
const OFF_CAPACITY: usize = 24;
const OFF_LEN: usize = 32;
const OFF_TOMBSTONES: usize = 40;

const CTRL_EMPTY: u8 = 0;
const CTRL_FULL: u8 = 1;
const CTRL_TOMBSTONE: u8 = 2;

/// ctrl byte + stored hash.
const SLOT_META: usize = 1 + 8;

#[derive(Debug)]
pub(crate) struct RawTable {
    location: Location,
    config: StoreConfig,
    key_size: usize,
    value_size: usize,
    region: Option<Region>,
}

impl RawTable {
    /// Creates an empty table, replacing whatever was stored at `location`.
    pub fn create(
        location: Location,
        key_size: usize,
        value_size: usize,
        config: StoreConfig,
    ) -> Result<Self, StoreError> {
        let mut table = RawTable {
            location,
            config,
            key_size,
            value_size,
            region: None,
        };
        table.allocate()?;
        Ok(table)
    }

    /// Opens an existing table. `Ok(None)` when nothing is stored there.
    pub fn open(
        location: Location,
        key_size: usize,
        value_size: usize,
        config: StoreConfig,
    ) -> Result<Option<Self>, StoreError> {
        let Some(region) = Region::open(&location)? else {
            return Ok(None);
        };
        let table = RawTable {
            location,
            config,
            key_size,
            value_size,
            region: Some(region),
        };
        table.validate()?;
        debug!(
            table = %table.location.describe().display(),
            len = table.len(),
            capacity = table.capacity(),
            "opened table"
        );
        Ok(Some(table))
    }

    fn allocate(&mut self) -> Result<(), StoreError> {
        let capacity = self.config.slot_capacity();
        let len = HEADER_SIZE + capacity * self.slot_size();
        let mut region = Region::create(&self.location, len)?;
        let bytes = region.bytes_mut();
        bytes[..8].copy_from_slice(MAGIC);
        VERSION.encode(&mut bytes[OFF_VERSION..OFF_VERSION + 4]);
        (self.key_size as u32).encode(&mut bytes[OFF_KEY_SIZE..OFF_KEY_SIZE + 4]);
        (self.value_size as u32).encode(&mut bytes[OFF_VALUE_SIZE..OFF_VALUE_SIZE + 4]);
        (capacity as u64).encode(&mut bytes[OFF_CAPACITY..OFF_CAPACITY + 8]);
        self.region = Some(region);
        debug!(
            table = %self.location.describe().display(),
            capacity,
            "created table"
        );
        Ok(())
    }

    fn validate(&self) -> Result<(), StoreError> {
        let path = self.location.describe();
        let corrupt = |reason: &str| StoreError::Corrupt {
            path: path.clone(),
            reason: reason.to_string(),
        };
        let Some(region) = self.region.as_ref() else {
            return Ok(());
        };
        let bytes = region.bytes();
        if bytes.len() < HEADER_SIZE {
            return Err(corrupt("file shorter than header"));
        }
        if &bytes[..8] != MAGIC {
            return Err(corrupt("bad magic"));
        }
        if u32::decode(&bytes[OFF_VERSION..]) != VERSION {
            return Err(corrupt("unsupported version"));
        }
        let found = (
            u32::decode(&bytes[OFF_KEY_SIZE..]) as usize,
            u32::decode(&bytes[OFF_VALUE_SIZE..]) as usize,
        );
        if found != (self.key_size, self.value_size) {
            return Err(StoreError::LayoutMismatch {
                path: path.clone(),
                expected: (self.key_size, self.value_size),
                found,
            });
        }
        let capacity = self.header(OFF_CAPACITY) as usize;
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(corrupt("capacity is not a power of two"));
        }
        if bytes.len() != HEADER_SIZE + capacity * self.slot_size() {
            return Err(corrupt("file size does not match capacity"));
        }
        if self.len() + self.tombstones() > capacity {
            return Err(corrupt("more entries than slots"));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Header and slot accessors
    // -----------------------------------------------------------------------

    fn slot_size(&self) -> usize {
        SLOT_META + self.key_size + self.value_size
    }

    fn header(&self, offset: usize) -> u64 {
        match &self.region {
            Some(region) => u64::decode(&region.bytes()[offset..offset + 8]),
            None => 0,
        }
    }

    fn set_header(&mut self, offset: usize, value: u64) {
        if let Some(region) = self.region.as_mut() {
            value.encode(&mut region.bytes_mut()[offset..offset + 8]);
        }
    }

    pub fn capacity(&self) -> usize {
        self.header(OFF_CAPACITY) as usize
    }

    pub fn len(&self) -> usize {
        self.header(OFF_LEN) as usize
    }

    pub fn tombstones(&self) -> usize {
        self.header(OFF_TOMBSTONES) as usize
    }

    pub fn is_released(&self) -> bool {
        self.region.is_none()
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    fn slot_offset(&self, slot: usize) -> usize {
        HEADER_SIZE + slot * self.slot_size()
    }

    fn bytes(&self) -> &[u8] {
        match &self.region {
            Some(region) => region.bytes(),
            None => &[],
        }
    }

    fn ctrl(&self, slot: usize) -> u8 {
        self.bytes()[self.slot_offset(slot)]
    }

    fn set_ctrl(&mut self, slot: usize, ctrl: u8) {
        let at = self.slot_offset(slot);
        if let Some(region) = self.region.as_mut() {
            region.bytes_mut()[at] = ctrl;
        }
    }

    pub fn is_full(&self, slot: usize) -> bool {
        slot < self.capacity() && self.ctrl(slot) == CTRL_FULL
    }

    pub fn slot_hash(&self, slot: usize) -> u64 {
        let at = self.slot_offset(slot) + 1;
        u64::decode(&self.bytes()[at..at + 8])
    }

    pub fn key(&self, slot: usize) -> &[u8] {
        let at = self.slot_offset(slot) + SLOT_META;
        &self.bytes()[at..at + self.key_size]
    }

    pub fn value(&self, slot: usize) -> &[u8] {
        let at = self.slot_offset(slot) + SLOT_META + self.key_size;
        &self.bytes()[at..at + self.value_size]
    }

    /// Mutable view of a slot's value bytes. Empty slice when released.
    pub fn value_mut(&mut self, slot: usize) -> &mut [u8] {
        let at = self.slot_offset(slot) + SLOT_META + self.key_size;
        let width = self.value_size;
        match self.region.as_mut() {
            Some(region) => &mut region.bytes_mut()[at..at + width],
            None => &mut [],
        }
    }

    /// First full slot at or after `from`.
    pub fn next_full(&self, from: usize) -> Option<usize> {
        (from..self.capacity()).find(|&slot| self.ctrl(slot) == CTRL_FULL)
    }

    // -----------------------------------------------------------------------
    // Probing
    // -----------------------------------------------------------------------

    /// Finds the slot holding a key with `hash` for which `eq` holds.
    pub fn find(&self, hash: u64, mut eq: impl FnMut(&[u8]) -> bool) -> Option<usize> {
        let capacity = self.capacity();
        if capacity == 0 || self.len() == 0 {
            return None;
        }
        let mask = capacity - 1;
        let mut slot = (hash as usize) & mask;
        for _ in 0..capacity {
            match self.ctrl(slot) {
                CTRL_EMPTY => return None,
                CTRL_FULL if self.slot_hash(slot) == hash && eq(self.key(slot)) => {
                    return Some(slot)
                }
                _ => {}
            }
            slot = (slot + 1) & mask;
        }
        None
    }

    /// Inserts a key known to be absent. Returns the slot it landed in.
    pub fn insert_new(&mut self, hash: u64, key: &[u8], value: &[u8]) -> Result<usize, StoreError> {
        debug_assert_eq!(key.len(), self.key_size);
        debug_assert_eq!(value.len(), self.value_size);
        if self.region.is_none() {
            debug!(table = %self.location.describe().display(), "recreating released table");
            self.allocate()?;
        }
        self.reserve_one()?;
        Ok(self.place(hash, key, value))
    }

    /// Writes an entry into the first reusable slot of its probe sequence.
    /// The caller guarantees there is room.
    fn place(&mut self, hash: u64, key: &[u8], value: &[u8]) -> usize {
        let mask = self.capacity() - 1;
        let mut slot = (hash as usize) & mask;
        loop {
            let ctrl = self.ctrl(slot);
            if ctrl != CTRL_FULL {
                if ctrl == CTRL_TOMBSTONE {
                    let tombstones = self.tombstones() as u64;
                    self.set_header(OFF_TOMBSTONES, tombstones - 1);
                }
                let at = self.slot_offset(slot);
                let key_size = self.key_size;
                if let Some(region) = self.region.as_mut() {
                    let bytes = region.bytes_mut();
                    bytes[at] = CTRL_FULL;
                    hash.encode(&mut bytes[at + 1..at + SLOT_META]);
                    bytes[at + SLOT_META..at + SLOT_META + key_size].copy_from_slice(key);
                    bytes[at + SLOT_META + key_size..at + SLOT_META + key_size + value.len()]
                        .copy_from_slice(value);
                }
                let len = self.len() as u64;
                self.set_header(OFF_LEN, len + 1);
                return slot;
            }
            slot = (slot + 1) & mask;
        }
    }

    /// Makes room for one more entry: doubles when live entries would exceed
    /// the load limit, otherwise purges tombstones in place when they are
    /// what pushes occupancy over it.
    fn reserve_one(&mut self) -> Result<(), StoreError> {
        let capacity = self.capacity();
        let limit = self.config.occupancy_limit(capacity);
        if self.len() + 1 > limit {
            self.rehash(capacity * 2)
        } else if self.len() + self.tombstones() + 1 > limit {
            self.rehash(capacity)
        } else {
            Ok(())
        }
    }

    fn rehash(&mut self, new_capacity: usize) -> Result<(), StoreError> {
        let old_capacity = self.capacity();
        let entry_size = self.key_size + self.value_size;
        let mut live: Vec<(u64, Vec<u8>)> = Vec::with_capacity(self.len());
        let mut slot = 0;
        while let Some(full) = self.next_full(slot) {
            let mut entry = Vec::with_capacity(entry_size);
            entry.extend_from_slice(self.key(full));
            entry.extend_from_slice(self.value(full));
            live.push((self.slot_hash(full), entry));
            slot = full + 1;
        }

        let slot_size = self.slot_size();
        if let Some(region) = self.region.as_mut() {
            region.resize(HEADER_SIZE + new_capacity * slot_size)?;
            region.bytes_mut()[HEADER_SIZE..].fill(0);
        }
        self.set_header(OFF_CAPACITY, new_capacity as u64);
        self.set_header(OFF_LEN, 0);
        self.set_header(OFF_TOMBSTONES, 0);
        for (hash, entry) in &live {
            let (key, value) = entry.split_at(self.key_size);
            self.place(*hash, key, value);
        }
        debug!(
            table = %self.location.describe().display(),
            old_capacity,
            new_capacity,
            entries = live.len(),
            "rehashed table"
        );
        Ok(())
    }

    /// Removes the entry in `slot`.
    pub fn erase_slot(&mut self, slot: usize) {
        debug_assert!(self.is_full(slot));
        let next = (slot + 1) & (self.capacity() - 1);
        if self.ctrl(next) == CTRL_EMPTY {
            // Nothing probes past an empty slot, so this one can be empty too.
            self.set_ctrl(slot, CTRL_EMPTY);
        } else {
            self.set_ctrl(slot, CTRL_TOMBSTONE);
            let tombstones = self.tombstones() as u64;
            self.set_header(OFF_TOMBSTONES, tombstones + 1);
        }
        let len = self.len() as u64;
        self.set_header(OFF_LEN, len - 1);
    }

    /// Two-phase clear; see [`ClearOutcome`].
    pub fn clear(&mut self) -> Result<ClearOutcome, StoreError> {
        let Some(region) = self.region.as_mut() else {
            return Ok(ClearOutcome::Released);
        };
        let bytes = region.bytes();
        let occupied = u64::decode(&bytes[OFF_LEN..]) + u64::decode(&bytes[OFF_TOMBSTONES..]);
        if occupied > 0 {
            region.bytes_mut()[HEADER_SIZE..].fill(0);
            self.set_header(OFF_LEN, 0);
            self.set_header(OFF_TOMBSTONES, 0);
            return Ok(ClearOutcome::Emptied);
        }
        if let Some(region) = self.region.take() {
            region.destroy()?;
        }
        debug!(table = %self.location.describe().display(), "released table");
        Ok(ClearOutcome::Released)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        match &self.region {
            Some(region) => region.flush(),
            None => Ok(()),
        }
    }

    pub fn load_factor(&self) -> f64 {
        match self.capacity() {
            0 => 0.0,
            capacity => self.len() as f64 / capacity as f64,
        }
    }

    /// Fraction of live entries that do not sit in their home slot.
    pub fn conflict_factor(&self) -> f64 {
        let len = self.len();
        if len == 0 {
            return 0.0;
        }
        let mask = self.capacity() - 1;
        let mut displaced = 0usize;
        let mut slot = 0;
        while let Some(full) = self.next_full(slot) {
            if (self.slot_hash(full) as usize) & mask != full {
                displaced += 1;
            }
            slot = full + 1;
        }
        displaced as f64 / len as f64
    }
}
