//! The byte-addressable buffer collaborator the log is built against.
//!
//! Disk buffer primitives are an external collaborator: the consensus and
//! log layers only need read/write of fixed-width primitives plus a bounded
//! `allocate`. [`FileBuffer`] is the one concrete, `std::fs`-backed
//! implementation shipped so the crate is independently testable; an
//! embedder may supply another (memory-mapped, in-memory, etc).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::LogError;

/// A byte-addressable buffer supporting positioned reads/writes of
/// primitives and a bounded pre-allocation.
pub trait Buffer {
    fn read_u8(&mut self, offset: u64) -> Result<u8, LogError>;
    fn read_u32(&mut self, offset: u64) -> Result<u32, LogError>;
    fn read_u64(&mut self, offset: u64) -> Result<u64, LogError>;
    fn read_bytes(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, LogError>;

    fn write_u8(&mut self, offset: u64, value: u8) -> Result<(), LogError>;
    fn write_u32(&mut self, offset: u64, value: u32) -> Result<(), LogError>;
    fn write_u64(&mut self, offset: u64, value: u64) -> Result<(), LogError>;
    fn write_bytes(&mut self, offset: u64, bytes: &[u8]) -> Result<(), LogError>;

    /// Ensures the underlying storage can address at least `size` bytes,
    /// growing it if necessary.
    fn allocate(&mut self, size: u64) -> Result<(), LogError>;

    fn sync(&mut self) -> Result<(), LogError>;
}

/// A `std::fs::File`-backed [`Buffer`].
pub struct FileBuffer {
    file: File,
}

impl FileBuffer {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file })
    }
}

impl Buffer for FileBuffer {
    fn read_u8(&mut self, offset: u64) -> Result<u8, LogError> {
        let bytes = self.read_bytes(offset, 1)?;
        Ok(bytes[0])
    }

    fn read_u32(&mut self, offset: u64) -> Result<u32, LogError> {
        let bytes = self.read_bytes(offset, 4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("len checked")))
    }

    fn read_u64(&mut self, offset: u64) -> Result<u64, LogError> {
        let bytes = self.read_bytes(offset, 8)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("len checked")))
    }

    fn read_bytes(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, LogError> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_u8(&mut self, offset: u64, value: u8) -> Result<(), LogError> {
        self.write_bytes(offset, &[value])
    }

    fn write_u32(&mut self, offset: u64, value: u32) -> Result<(), LogError> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    fn write_u64(&mut self, offset: u64, value: u64) -> Result<(), LogError> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    fn write_bytes(&mut self, offset: u64, bytes: &[u8]) -> Result<(), LogError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    fn allocate(&mut self, size: u64) -> Result<(), LogError> {
        let current_len = self.file.metadata()?.len();
        if current_len < size {
            self.file.set_len(size)?;
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<(), LogError> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_u64_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut buf = FileBuffer::open(dir.path().join("buf")).unwrap();
        buf.allocate(64).unwrap();
        buf.write_u64(8, 0xDEAD_BEEF).unwrap();
        assert_eq!(buf.read_u64(8).unwrap(), 0xDEAD_BEEF);
    }
}
