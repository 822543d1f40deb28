//! Disk images for the unit tests.
//!
//! `TestImage` lays out a minimal FAT32 volume by hand so tests can pick any geometry
//! (including ones too small for a real formatter to call FAT32). The `fatfs` helpers
//! produce reference images and read back what the driver wrote.

use std::io::{Cursor, Read, Write};

use crate::device::MemoryDevice;
use crate::layout::DirEntry;

pub const RESERVED_SECTORS: u32 = 32;
const EOC: u32 = 0x0FFF_FFFF;

pub struct TestImage {
    bytes: Vec<u8>,
    bytes_per_sector: u32,
    sectors_per_cluster: u32,
    sectors_per_fat: u32,
}

impl TestImage {
    /// One FAT copy, root directory in cluster 2, everything else free.
    pub fn new(bytes_per_sector: u16, sectors_per_cluster: u8, data_clusters: u32) -> Self {
        let bps = bytes_per_sector as u32;
        let spc = sectors_per_cluster as u32;
        let sectors_per_fat = ((data_clusters + 2) * 4).div_ceil(bps);
        let total = RESERVED_SECTORS + sectors_per_fat + data_clusters * spc;
        let mut bytes = vec![0u8; (total * bps).max(512) as usize];

        let bs = &mut bytes[..512];
        bs[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
        bs[3..11].copy_from_slice(b"MSWIN4.1");
        bs[11..13].copy_from_slice(&bytes_per_sector.to_le_bytes());
        bs[13] = sectors_per_cluster;
        bs[14..16].copy_from_slice(&(RESERVED_SECTORS as u16).to_le_bytes());
        bs[16] = 1;
        match u16::try_from(total) {
            Ok(t) => bs[19..21].copy_from_slice(&t.to_le_bytes()),
            Err(_) => bs[32..36].copy_from_slice(&total.to_le_bytes()),
        }
        bs[21] = 0xF8;
        bs[24..26].copy_from_slice(&32u16.to_le_bytes());
        bs[26..28].copy_from_slice(&64u16.to_le_bytes());
        bs[36..40].copy_from_slice(&sectors_per_fat.to_le_bytes());
        bs[44..48].copy_from_slice(&2u32.to_le_bytes());
        let fs_info: u16 = if bps >= 512 { 1 } else { 0 };
        bs[48..50].copy_from_slice(&fs_info.to_le_bytes());
        bs[64] = 0x80;
        bs[66] = 0x29;
        bs[67..71].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        bs[71..82].copy_from_slice(b"TESTVOL    ");
        bs[82..90].copy_from_slice(b"FAT32   ");
        bs[510] = 0x55;
        bs[511] = 0xAA;

        let mut img = TestImage {
            bytes,
            bytes_per_sector: bps,
            sectors_per_cluster: spc,
            sectors_per_fat,
        };
        img.set_fat(0, 0x0FFF_FFF8);
        img.set_fat(1, EOC);
        img.set_fat(2, EOC);
        img
    }

    pub fn bytes(&self) -> &[u8] { &self.bytes }

    pub fn fat_offset(&self) -> usize { (RESERVED_SECTORS * self.bytes_per_sector) as usize }

    pub fn bytes_per_cluster(&self) -> usize {
        (self.bytes_per_sector * self.sectors_per_cluster) as usize
    }

    pub fn cluster_offset(&self, cluster: u32) -> usize {
        let data_start = (RESERVED_SECTORS + self.sectors_per_fat) * self.bytes_per_sector;
        data_start as usize + (cluster as usize - 2) * self.bytes_per_cluster()
    }

    pub fn fat(&self, cluster: u32) -> u32 {
        let off = self.fat_offset() + cluster as usize * 4;
        u32::from_le_bytes(self.bytes[off..off + 4].try_into().unwrap())
    }

    pub fn set_fat(&mut self, cluster: u32, value: u32) {
        let off = self.fat_offset() + cluster as usize * 4;
        self.bytes[off..off + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Links `clusters` into one chain ending in EOC.
    pub fn chain(&mut self, clusters: &[u32]) {
        for pair in clusters.windows(2) {
            self.set_fat(pair[0], pair[1]);
        }
        if let Some(&last) = clusters.last() {
            self.set_fat(last, EOC);
        }
    }

    /// Writes a raw entry into slot `slot` of the directory whose first cluster is `dir`.
    pub fn put_entry(&mut self, dir: u32, slot: usize, entry: &DirEntry) {
        let off = self.cluster_offset(dir) + slot * 32;
        self.bytes[off..off + 32].copy_from_slice(&entry.to_bytes());
    }

    pub fn write_data(&mut self, cluster: u32, data: &[u8]) {
        let off = self.cluster_offset(cluster);
        self.bytes[off..off + data.len()].copy_from_slice(data);
    }

    pub fn device(self) -> MemoryDevice { MemoryDevice(self.bytes) }
}

// ─── fatfs reference images ────────────────────────────────────────────────────

/// A 40 MB volume formatted by `fatfs`. FAT32 needs at least 65 525 clusters and the
/// `Fat32` hint picks 512-byte clusters, so ~34 MB is the minimum.
pub fn fatfs_image() -> MemoryDevice {
    const SIZE: usize = 40 * 1024 * 1024;
    let mut cursor = Cursor::new(vec![0u8; SIZE]);
    fatfs::format_volume(
        &mut cursor,
        fatfs::FormatVolumeOptions::new().fat_type(fatfs::FatType::Fat32),
    ).expect("format_volume failed");
    MemoryDevice(cursor.into_inner())
}

/// A `fatfs` image with one file in the root directory.
pub fn fatfs_with_file(name: &str, content: &[u8]) -> MemoryDevice {
    let mut disk = fatfs_image();
    {
        let mut cursor = Cursor::new(&mut disk.0);
        let fs = fatfs::FileSystem::new(&mut cursor, fatfs::FsOptions::new())
            .expect("FileSystem::new failed");
        let mut f = fs.root_dir().create_file(name).expect("create_file failed");
        f.truncate().unwrap();
        f.write_all(content).unwrap();
    }
    disk
}

/// Reads a file through `fatfs`; `path` is relative to the root, `/`-separated.
pub fn read_via_fatfs(disk: &mut MemoryDevice, path: &str) -> Vec<u8> {
    let mut cursor = Cursor::new(&mut disk.0);
    let fs = fatfs::FileSystem::new(&mut cursor, fatfs::FsOptions::new()).unwrap();
    let mut f = fs.root_dir().open_file(path).unwrap();
    let mut buf = Vec::new();
    f.read_to_end(&mut buf).unwrap();
    buf
}

/// Names `fatfs` sees in a directory, without `.` and `..`.
pub fn list_via_fatfs(disk: &mut MemoryDevice, dir: &str) -> Vec<String> {
    let mut cursor = Cursor::new(&mut disk.0);
    let fs = fatfs::FileSystem::new(&mut cursor, fatfs::FsOptions::new()).unwrap();
    let root = fs.root_dir();
    let dir = if dir.is_empty() { root } else { root.open_dir(dir).unwrap() };
    dir.iter()
        .map(|e| e.unwrap().file_name())
        .filter(|n| n != "." && n != "..")
        .collect()
}
