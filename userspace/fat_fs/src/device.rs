//! Byte-addressed backing store for a FAT32 volume.
//!
//! The volume image is addressed by absolute byte offset, so the driver never has to
//! care about the underlying sector size. `std::fs::File` is the production backend;
//! `MemoryDevice` keeps a whole image in a `Vec<u8>` and is what the tests mount.

use std::fs::File;
use std::io::{self, ErrorKind};

// ─── Device abstraction ────────────────────────────────────────────────────────

pub trait BlockDevice {
    /// One positioned read. May transfer fewer bytes than requested; 0 means EOF.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// One positioned write. May transfer fewer bytes than requested.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<usize>;

    fn flush(&mut self) -> io::Result<()> { Ok(()) }

    /// Repeats `read_at` until `buf` is full, EOF is hit or an error occurs.
    /// Returns the number of bytes transferred.
    fn read_full_at(&mut self, mut offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            match self.read_at(offset, &mut buf[done..]) {
                Ok(0) => break,
                Ok(n) => { done += n; offset += n as u64; }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(done)
    }

    /// Repeats `write_at` until all of `buf` is written or the device stops accepting data.
    fn write_full_at(&mut self, mut offset: u64, buf: &[u8]) -> io::Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            match self.write_at(offset, &buf[done..]) {
                Ok(0) => break,
                Ok(n) => { done += n; offset += n as u64; }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(done)
    }
}

// ─── File backend ──────────────────────────────────────────────────────────────

#[cfg(unix)]
impl BlockDevice for File {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        std::os::unix::fs::FileExt::write_at(self, buf, offset)
    }
    fn flush(&mut self) -> io::Result<()> { self.sync_all() }
}

#[cfg(windows)]
impl BlockDevice for File {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_write(self, buf, offset)
    }
    fn flush(&mut self) -> io::Result<()> { self.sync_all() }
}

// ─── In-memory backend ─────────────────────────────────────────────────────────

/// A fixed-size volume image held in memory. Writes past the end are truncated.
#[derive(Clone, Debug, Default)]
pub struct MemoryDevice(pub Vec<u8>);

impl MemoryDevice {
    pub fn new(size: usize) -> Self { Self(vec![0; size]) }
    pub fn into_inner(self) -> Vec<u8> { self.0 }
}

impl BlockDevice for MemoryDevice {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.0.len() as u64;
        if offset >= len { return Ok(0); }
        let start = offset as usize;
        let n = buf.len().min(self.0.len() - start);
        buf[..n].copy_from_slice(&self.0[start..start + n]);
        Ok(n)
    }
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let len = self.0.len() as u64;
        if offset >= len { return Ok(0); }
        let start = offset as usize;
        let n = buf.len().min(self.0.len() - start);
        self.0[start..start + n].copy_from_slice(&buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hands out at most `chunk` bytes per call and fails the first call with EINTR.
    struct Trickle { inner: MemoryDevice, chunk: usize, interrupted: bool }

    impl BlockDevice for Trickle {
        fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(ErrorKind::Interrupted.into());
            }
            let n = buf.len().min(self.chunk);
            self.inner.read_at(offset, &mut buf[..n])
        }
        fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.chunk);
            self.inner.write_at(offset, &buf[..n])
        }
    }

    #[test]
    fn memory_read_past_end_is_eof() {
        let mut dev = MemoryDevice::new(16);
        let mut buf = [0u8; 4];
        assert_eq!(dev.read_at(16, &mut buf).unwrap(), 0);
        assert_eq!(dev.read_at(14, &mut buf).unwrap(), 2);
    }

    #[test]
    fn memory_write_is_clamped() {
        let mut dev = MemoryDevice::new(8);
        assert_eq!(dev.write_at(6, b"abcd").unwrap(), 2);
        assert_eq!(&dev.0[6..], b"ab");
    }

    #[test]
    fn full_read_retries_short_and_interrupted_reads() {
        let mut dev = Trickle {
            inner: MemoryDevice((0..64u8).collect()),
            chunk: 5,
            interrupted: false,
        };
        let mut buf = [0u8; 32];
        assert_eq!(dev.read_full_at(10, &mut buf).unwrap(), 32);
        assert_eq!(buf[0], 10);
        assert_eq!(buf[31], 41);
    }

    #[test]
    fn full_write_stops_at_device_end() {
        let mut dev = Trickle { inner: MemoryDevice::new(20), chunk: 3, interrupted: true };
        assert_eq!(dev.write_full_at(10, &[7u8; 16]).unwrap(), 10);
        assert!(dev.inner.0[10..].iter().all(|&b| b == 7));
    }

    #[test]
    fn file_backend_positioned_io() {
        let path = std::env::temp_dir().join(format!("fat_fs_device_{}.img", std::process::id()));
        let mut file = File::options().read(true).write(true).create(true).truncate(true)
            .open(&path).unwrap();
        file.set_len(1024).unwrap();
        assert_eq!(file.write_full_at(500, b"hello").unwrap(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(file.read_full_at(500, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        drop(file);
        std::fs::remove_file(&path).unwrap();
    }
}
