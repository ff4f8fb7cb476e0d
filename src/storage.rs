//! Thin boundary around the SD-card/VFS layer (spec.md §1 Non-goals: out of
//! scope, interface only). Mirrors `original_source/firmware/storage.py`'s
//! `exists`/`slurp`/`spit`/`path` surface, narrowed to what the RAM-disk
//! state machine needs from the mounted image file.

use crate::error::StorageError;

/// A mountable, seekable byte store backing the RAM-disk image file.
/// The real implementation lives on the SD card; this crate only drives
/// it through this trait.
pub trait Storage {
    /// Size of the currently mounted file, in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read `buf.len()` bytes starting at `offset`. Out-of-bounds reads are
    /// a `StorageError::OutOfBounds`, matching the original's plain
    /// exception-on-bad-offset behavior, which the RAM-disk command
    /// handler turns into status byte 255.
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError>;

    fn write_at(&mut self, offset: usize, buf: &[u8]) -> Result<(), StorageError>;

    /// Unmount and remount the backing file (e.g. after an SD-card
    /// remount), re-validating its size. A remount error is logged and
    /// the previously opened file is kept (spec.md §4.E, §7).
    fn remount(&mut self, path: &str) -> Result<(), StorageError>;
}

/// A fixed-size in-memory `Storage`, used by the RAM-disk unit tests in
/// place of a real SD card. Mirrors the 120 KB image size from spec.md §3.
pub struct MemoryStorage<const N: usize> {
    bytes: heapless::Vec<u8, N>,
    mounted: bool,
}

impl<const N: usize> MemoryStorage<N> {
    pub fn new() -> Self {
        let mut bytes = heapless::Vec::new();
        bytes.resize(N, 0).unwrap();
        Self {
            bytes,
            mounted: true,
        }
    }

    pub fn unmount(&mut self) {
        self.mounted = false;
    }
}

impl<const N: usize> Default for MemoryStorage<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Storage for MemoryStorage<N> {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        if !self.mounted {
            return Err(StorageError::NotMounted);
        }
        let end = offset.checked_add(buf.len()).ok_or(StorageError::OutOfBounds)?;
        if end > self.bytes.len() {
            return Err(StorageError::OutOfBounds);
        }
        buf.copy_from_slice(&self.bytes[offset..end]);
        Ok(())
    }

    fn write_at(&mut self, offset: usize, buf: &[u8]) -> Result<(), StorageError> {
        if !self.mounted {
            return Err(StorageError::NotMounted);
        }
        let end = offset.checked_add(buf.len()).ok_or(StorageError::OutOfBounds)?;
        if end > self.bytes.len() {
            return Err(StorageError::OutOfBounds);
        }
        self.bytes[offset..end].copy_from_slice(buf);
        Ok(())
    }

    fn remount(&mut self, _path: &str) -> Result<(), StorageError> {
        self.mounted = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrips() {
        let mut storage: MemoryStorage<{ 120 * 1024 }> = MemoryStorage::new();
        storage.write_at(0, &[0xAB]).unwrap();
        let mut buf = [0u8; 1];
        storage.read_at(0, &mut buf).unwrap();
        assert_eq!(buf[0], 0xAB);
    }

    #[test]
    fn out_of_bounds_read_is_rejected() {
        let storage: MemoryStorage<{ 120 * 1024 }> = MemoryStorage::new();
        let mut buf = [0u8; 128];
        assert_eq!(
            storage.read_at(120 * 1024, &mut buf),
            Err(StorageError::OutOfBounds)
        );
    }

    #[test]
    fn unmounted_storage_rejects_access() {
        let mut storage: MemoryStorage<1024> = MemoryStorage::new();
        storage.unmount();
        let mut buf = [0u8; 1];
        assert_eq!(storage.read_at(0, &mut buf), Err(StorageError::NotMounted));
    }
}
