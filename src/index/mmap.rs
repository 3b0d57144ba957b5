//! Anonymous file-backed memory region for read-only indexes.
//!
//! The backing file is created, unlinked right away and mapped shared +
//! writable, so in-place population is visible through the same mapping and
//! the storage vanishes once the descriptor is closed. Dropping the region
//! (including on a failed load) unmaps first, then closes the file.

use memmap2::{MmapMut, MmapOptions};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::{Error, Result};

/// Caller flags for mapping the backing file.
///
/// The mapping is always shared and writable; copy-on-write would double
/// the memory needed while populating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapOptions {
    /// Pre-fault every page at map time.
    pub populate: bool,
}

impl MapOptions {
    pub fn populate() -> Self {
        Self { populate: true }
    }
}

#[derive(Debug)]
pub struct MappedRegion {
    map: Option<MmapMut>,
    file: Option<File>,
    len: usize,
}

impl MappedRegion {
    /// A region with nothing mapped, held by indexes that were never loaded.
    pub fn unmapped() -> Self {
        Self {
            map: None,
            file: None,
            len: 0,
        }
    }

    /// Create a `len`-byte zero-filled backing file at `path`, unlink it and map it.
    #[allow(unsafe_code)] // MmapOptions::map_mut requires unsafe for memory-mapped I/O.
    pub fn create(path: &Path, len: usize, options: MapOptions) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| {
                tracing::error!(path = %path.display(), error = %e, "failed to create mmap backing file");
                Error::disk_file(format!(
                    "failed to create mmap file {}: {}",
                    path.display(),
                    e
                ))
            })?;

        // The name is gone from here on; the descriptor keeps the storage alive.
        std::fs::remove_file(path).map_err(|e| {
            Error::disk_file(format!(
                "failed to unlink mmap file {}: {}",
                path.display(),
                e
            ))
        })?;

        file.set_len(len as u64).map_err(|e| {
            Error::disk_file(format!(
                "failed to size mmap file {} to {} bytes: {}",
                path.display(),
                len,
                e
            ))
        })?;

        // Zero-length mappings are rejected by the kernel.
        if len == 0 {
            return Ok(Self {
                map: None,
                file: Some(file),
                len,
            });
        }

        let mut mmap_options = MmapOptions::new();
        mmap_options.len(len);
        if options.populate {
            mmap_options.populate();
        }

        // SAFETY: the file was just created and unlinked, so no other handle
        // or process can observe or resize it while mapped.
        let map = unsafe { mmap_options.map_mut(&file) }.map_err(|e| {
            tracing::error!(path = %path.display(), size = len, error = %e, "failed to map backing file");
            Error::disk_file(format!(
                "failed to create mmap of {} bytes on file {}: {}",
                len,
                path.display(),
                e
            ))
        })?;

        #[cfg(unix)]
        if let Err(e) = map.advise(memmap2::Advice::Random) {
            tracing::warn!(error = %e, "failed to madvise sparse index mapping");
        }

        tracing::debug!(size = len, populate = options.populate, "mapped sparse index region");

        Ok(Self {
            map: Some(map),
            file: Some(file),
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_mapped(&self) -> bool {
        self.map.is_some()
    }

    pub fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        match self.map.as_mut() {
            Some(map) => &mut map[..],
            None => &mut [],
        }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if let Some(map) = self.map.take() {
            drop(map);
            tracing::debug!(size = self.len, "unmapped sparse index region");
        }
        // Closing the last descriptor releases the unlinked storage.
        self.file.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backing_file_is_unlinked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.bin");

        let mut region = MappedRegion::create(&path, 64, MapOptions::default()).unwrap();
        assert!(!path.exists());
        assert!(region.is_mapped());
        assert_eq!(region.bytes().len(), 64);
        assert!(region.bytes().iter().all(|&b| b == 0));

        region.bytes_mut()[3] = 7;
        assert_eq!(region.bytes()[3], 7);
    }

    #[test]
    fn test_zero_length_region_is_not_mapped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");

        let region = MappedRegion::create(&path, 0, MapOptions::populate()).unwrap();
        assert!(!region.is_mapped());
        assert!(region.bytes().is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_directory_is_disk_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("region.bin");

        let err = MappedRegion::create(&path, 16, MapOptions::default()).unwrap_err();
        assert!(matches!(err, Error::DiskFile(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_unmapped_region_drops_cleanly() {
        let region = MappedRegion::unmapped();
        assert!(region.is_empty());
        drop(region);
    }
}
