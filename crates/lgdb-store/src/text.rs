//! Append-only text segment.
//!
//! Variable-length data (names, string keys, string constants) is written
//! once into a [`TextSegment`] and referenced from fixed-width slots by a
//! [`TextRef`]. The segment never rewrites bytes it has handed out, so a
//! `TextRef` stays valid until the segment is reset.
//!
//! File layout: 64-byte header (magic `LGDBTXT1`, version, bytes used) then
//! the data area, which doubles when full.

use tracing::{debug, warn};

use crate::codec::FixedCodec;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::region::{Location, Region};
use crate::types::TextRef;

const HEADER_SIZE: usize = 64;
const MAGIC: &[u8; 8] = b"LGDBTXT1";
const VERSION: u32 = 1;
const OFF_VERSION: usize = 8;
const OFF_USED: usize = 16;

#[derive(Debug)]
pub struct TextSegment {
    location: Location,
    config: StoreConfig,
    region: Option<Region>,
}

impl TextSegment {
    /// Creates an empty segment at `location`, truncating any previous one.
    pub fn create_at(location: Location, config: &StoreConfig) -> Result<Self, StoreError> {
        let mut segment = TextSegment {
            location,
            config: config.clone(),
            region: None,
        };
        segment.allocate()?;
        Ok(segment)
    }

    /// Opens an existing segment; `Ok(None)` if there is none.
    pub fn open_at(location: Location, config: &StoreConfig) -> Result<Option<Self>, StoreError> {
        let Some(region) = Region::open(&location)? else {
            return Ok(None);
        };
        let segment = TextSegment {
            location,
            config: config.clone(),
            region: Some(region),
        };
        segment.validate()?;
        Ok(Some(segment))
    }

    pub fn open_or_create_at(location: Location, config: &StoreConfig) -> Result<Self, StoreError> {
        match Self::open_at(location.clone(), config)? {
            Some(segment) => Ok(segment),
            None => Self::create_at(location, config),
        }
    }

    /// A segment that lives only in memory.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::create_at(Location::Memory, &StoreConfig::default())
    }

    fn allocate(&mut self) -> Result<(), StoreError> {
        let data = self.config.text_initial_bytes.max(64);
        let mut region = Region::create(&self.location, HEADER_SIZE + data)?;
        let bytes = region.bytes_mut();
        bytes[..8].copy_from_slice(MAGIC);
        VERSION.encode(&mut bytes[OFF_VERSION..OFF_VERSION + 4]);
        self.region = Some(region);
        Ok(())
    }

    fn validate(&self) -> Result<(), StoreError> {
        let Some(region) = self.region.as_ref() else {
            return Ok(());
        };
        let bytes = region.bytes();
        let corrupt = |reason: &str| StoreError::Corrupt {
            path: self.location.describe(),
            reason: reason.to_string(),
        };
        if bytes.len() < HEADER_SIZE || &bytes[..8] != MAGIC {
            return Err(corrupt("bad text segment header"));
        }
        if u32::decode(&bytes[OFF_VERSION..]) != VERSION {
            return Err(corrupt("unsupported text segment version"));
        }
        if HEADER_SIZE + self.used() > bytes.len() {
            return Err(corrupt("text segment used size exceeds file"));
        }
        Ok(())
    }

    /// Bytes of interned data.
    pub fn used(&self) -> usize {
        match &self.region {
            Some(region) => u64::decode(&region.bytes()[OFF_USED..OFF_USED + 8]) as usize,
            None => 0,
        }
    }

    fn set_used(&mut self, used: usize) {
        if let Some(region) = self.region.as_mut() {
            (used as u64).encode(&mut region.bytes_mut()[OFF_USED..OFF_USED + 8]);
        }
    }

    pub fn is_released(&self) -> bool {
        self.region.is_none()
    }

    /// Appends `text` and returns where it lives. The empty string is not
    /// stored; it maps to [`TextRef::EMPTY`].
    pub fn append(&mut self, text: &str) -> Result<TextRef, StoreError> {
        if text.is_empty() {
            return Ok(TextRef::EMPTY);
        }
        if self.region.is_none() {
            self.allocate()?;
        }
        let used = self.used();
        let end = used + text.len();
        if end > u32::MAX as usize {
            return Err(StoreError::TextOverflow { len: text.len() });
        }
        self.reserve(end)?;
        if let Some(region) = self.region.as_mut() {
            region.bytes_mut()[HEADER_SIZE + used..HEADER_SIZE + end].copy_from_slice(text.as_bytes());
        }
        self.set_used(end);
        Ok(TextRef {
            offset: used as u32,
            len: text.len() as u32,
        })
    }

    fn reserve(&mut self, data_len: usize) -> Result<(), StoreError> {
        let Some(region) = self.region.as_mut() else {
            return Ok(());
        };
        let capacity = region.len() - HEADER_SIZE;
        if data_len <= capacity {
            return Ok(());
        }
        let mut grown = capacity.max(64);
        while grown < data_len {
            grown *= 2;
        }
        region.resize(HEADER_SIZE + grown)?;
        debug!(
            segment = %self.location.describe().display(),
            old = capacity,
            new = grown,
            "grew text segment"
        );
        Ok(())
    }

    /// Raw bytes behind `r`. Out-of-range references read as empty.
    pub fn bytes(&self, r: TextRef) -> &[u8] {
        let start = r.offset as usize;
        let end = start + r.len as usize;
        match &self.region {
            Some(region) if end <= self.used() => &region.bytes()[HEADER_SIZE + start..HEADER_SIZE + end],
            _ => &[],
        }
    }

    /// The exact text stored behind `r`.
    pub fn text(&self, r: TextRef) -> &str {
        match std::str::from_utf8(self.bytes(r)) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    segment = %self.location.describe().display(),
                    offset = r.offset,
                    error = %e,
                    "undecodable text entry"
                );
                ""
            }
        }
    }

    /// Forgets all interned data but keeps the mapping.
    pub fn reset(&mut self) {
        self.set_used(0);
    }

    /// Unmaps the segment and deletes its file. The next append recreates it.
    pub fn release(&mut self) -> Result<(), StoreError> {
        if let Some(region) = self.region.take() {
            region.destroy()?;
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        match &self.region {
            Some(region) => region.flush(),
            None => Ok(()),
        }
    }
}
