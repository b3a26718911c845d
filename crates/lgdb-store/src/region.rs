//! Mapped byte regions backing the tables.
//!
//! A [`Region`] is either a shared file mapping (`<dir>/<name>`) or an
//! anonymous mapping for tables that live only as long as the process. Both
//! expose the same byte slice, so the slot and text layouts above them do not
//! care which one they sit on.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use crate::error::StoreError;

/// Where a table keeps its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// File-backed: `<dir>/<name>`.
    File(PathBuf),
    /// Anonymous mapping, gone when the table is dropped.
    Memory,
}

impl Location {
    pub fn file(dir: impl AsRef<Path>, name: &str) -> Self {
        Location::File(dir.as_ref().join(name))
    }

    /// The same location with `suffix` appended to the file name.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        match self {
            Location::File(path) => {
                let mut os = path.clone().into_os_string();
                os.push(suffix);
                Location::File(PathBuf::from(os))
            }
            Location::Memory => Location::Memory,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Location::File(path) => Some(path),
            Location::Memory => None,
        }
    }

    /// Display form used in errors and logs.
    pub fn describe(&self) -> PathBuf {
        match self {
            Location::File(path) => path.clone(),
            Location::Memory => PathBuf::from("<memory>"),
        }
    }

    pub fn exists(&self) -> bool {
        match self {
            Location::File(path) => path.is_file(),
            Location::Memory => false,
        }
    }
}

/// A mutable mapping plus the file it maps, if any.
#[derive(Debug)]
pub struct Region {
    map: MmapMut,
    file: Option<File>,
    location: Location,
}

impl Region {
    /// Creates a zero-filled region of `len` bytes, truncating any existing file.
    pub fn create(location: &Location, len: usize) -> Result<Self, StoreError> {
        match location {
            Location::Memory => Ok(Region {
                map: MmapOptions::new().len(len.max(1)).map_anon()?,
                file: None,
                location: Location::Memory,
            }),
            Location::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)?;
                file.set_len(len as u64)?;
                let map = map_file(&file)?;
                Ok(Region {
                    map,
                    file: Some(file),
                    location: location.clone(),
                })
            }
        }
    }

    /// Maps an existing file. Returns `Ok(None)` when there is nothing to map.
    pub fn open(location: &Location) -> Result<Option<Self>, StoreError> {
        let Location::File(path) = location else {
            return Ok(None);
        };
        if !path.is_file() {
            return Ok(None);
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        if file.metadata()?.len() == 0 {
            return Err(StoreError::Corrupt {
                path: path.clone(),
                reason: "empty file".into(),
            });
        }
        let map = map_file(&file)?;
        Ok(Some(Region {
            map,
            file: Some(file),
            location: location.clone(),
        }))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Grows (or keeps) the region to `len` bytes, preserving its contents.
    pub fn resize(&mut self, len: usize) -> Result<(), StoreError> {
        if len == self.map.len() {
            return Ok(());
        }
        match &self.file {
            None => {
                let mut fresh = MmapOptions::new().len(len.max(1)).map_anon()?;
                let keep = len.min(self.map.len());
                fresh[..keep].copy_from_slice(&self.map[..keep]);
                self.map = fresh;
            }
            Some(file) => {
                self.map.flush()?;
                file.set_len(len as u64)?;
                self.map = map_file(file)?;
            }
        }
        Ok(())
    }

    /// Writes dirty pages back to the file. No-op for anonymous regions.
    pub fn flush(&self) -> Result<(), StoreError> {
        if self.file.is_some() {
            self.map.flush()?;
        }
        Ok(())
    }

    /// Unmaps the region and deletes its backing file.
    pub fn destroy(self) -> Result<(), StoreError> {
        let Region { map, file, location } = self;
        drop(map);
        drop(file);
        if let Location::File(path) = location {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn map_file(file: &File) -> Result<MmapMut, StoreError> {
    // SAFETY: the file was opened read/write by this process and is owned by
    // the returned Region for as long as the mapping lives. Tables take
    // `&mut self` for every mutation, so no two mappings of the same table
    // are written through concurrently from this process.
    let map = unsafe { MmapOptions::new().map_mut(file)? };
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_region_is_zeroed_and_resizable() {
        let mut region = Region::create(&Location::Memory, 64).unwrap();
        assert_eq!(region.len(), 64);
        assert!(region.bytes().iter().all(|&b| b == 0));

        region.bytes_mut()[10] = 42;
        region.resize(256).unwrap();
        assert_eq!(region.len(), 256);
        assert_eq!(region.bytes()[10], 42);
        assert_eq!(region.bytes()[200], 0);
    }

    #[test]
    fn file_region_persists_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let location = Location::file(dir.path(), "region");
        {
            let mut region = Region::create(&location, 128).unwrap();
            region.bytes_mut()[0..4].copy_from_slice(b"abcd");
            region.flush().unwrap();
        }
        let region = Region::open(&location).unwrap().unwrap();
        assert_eq!(&region.bytes()[0..4], b"abcd");
        assert_eq!(region.len(), 128);
    }

    #[test]
    fn open_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let location = Location::file(dir.path(), "nothing");
        assert!(Region::open(&location).unwrap().is_none());
        assert!(Region::open(&Location::Memory).unwrap().is_none());
    }

    #[test]
    fn destroy_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let location = Location::file(dir.path(), "doomed");
        let region = Region::create(&location, 32).unwrap();
        assert!(location.exists());
        region.destroy().unwrap();
        assert!(!location.exists());
    }

    #[test]
    fn suffix_extends_file_name() {
        let location = Location::File(PathBuf::from("/tmp/lgdb/names"));
        assert_eq!(
            location.with_suffix(".txt"),
            Location::File(PathBuf::from("/tmp/lgdb/names.txt"))
        );
        assert_eq!(Location::Memory.with_suffix(".txt"), Location::Memory);
    }
}
