//! On-disk structures: the boot sector and the 32-byte directory entry.
//!
//! Both are `repr(C, packed)` mirrors of the little-endian disk format. Multi-byte fields
//! are stored exactly as they appear on disk and converted in the accessors.

use bitflags::bitflags;
use log::{error, warn};

use crate::error::{FsError, Result};
use crate::time::DateTime;

// ─── Constants ─────────────────────────────────────────────────────────────────

pub const SECTOR_SIZE:       usize = 512;
pub const DIR_ENTRY_SIZE:    usize = 32;
pub const FAT32_MIN_CLUSTERS: u32  = 65_525;

const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
const FS_INFO_NONE:   u16     = 0xFFFF;

const NAME_END:     u8 = 0x00;
const NAME_DELETED: u8 = 0xE5;

/// Visible name of the activity log. On disk it lives in a slot whose first name byte is
/// the deleted marker, so other FAT implementations skip it.
pub const LOG_FILE_NAME: &str = "fs.log";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Attributes: u8 {
        const READ_ONLY = 1 << 0;
        const HIDDEN    = 1 << 1;
        const SYSTEM    = 1 << 2;
        const VOLUME    = 1 << 3;
        const DIRECTORY = 1 << 4;
        const ARCHIVE   = 1 << 5;
        const DEVICE    = 1 << 6;
        const RESERVED  = 1 << 7;
    }
}

// ─── Boot sector ───────────────────────────────────────────────────────────────

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct BootSector {
    jump:               [u8; 3],
    oem:                [u8; 8],
    bytes_per_sector:   u16,
    sectors_per_clus:   u8,
    reserved_sectors:   u16,
    num_fats:           u8,
    root_entry_count:   u16,
    total_sectors_16:   u16,
    media:              u8,
    fat_size_16:        u16,
    sectors_per_track:  u16,
    num_heads:          u16,
    hidden_sectors:     u32,
    total_sectors_32:   u32,
    // FAT32 extension
    fat_size_32:        u32,
    ext_flags:          u16,
    fs_version:         u16,
    root_cluster:       u32,
    fs_info:            u16,
    backup_boot_sector: u16,
    _reserved:          [u8; 12],
    // Generic extension
    drive_number:       u8,
    _reserved2:         u8,
    boot_signature:     u8,
    volume_id:          u32,
    volume_label:       [u8; 11],
    fs_type:            [u8; 8],
}

const _: () = assert!(size_of::<BootSector>() == 90);

impl BootSector {
    /// Reinterprets the first bytes of sector 0. Fails if the 0x55AA signature is missing.
    pub fn from_sector(sec: &[u8; SECTOR_SIZE]) -> Result<Self> {
        if sec[510..512] != BOOT_SIGNATURE {
            return Err(FsError::InvalidArgument("missing boot sector signature"));
        }
        Ok(unsafe { core::ptr::read_unaligned(sec.as_ptr() as *const BootSector) })
    }

    pub fn bytes_per_sector(&self) -> u16    { u16::from_le(self.bytes_per_sector) }
    pub fn sectors_per_cluster(&self) -> u8  { self.sectors_per_clus }
    pub fn reserved_sectors(&self) -> u16    { u16::from_le(self.reserved_sectors) }
    pub fn num_fats(&self) -> u8             { self.num_fats }
    pub fn root_entry_count(&self) -> u16    { u16::from_le(self.root_entry_count) }
    pub fn media(&self) -> u8                { self.media }
    pub fn version(&self) -> u16             { u16::from_le(self.fs_version) }
    pub fn root_cluster(&self) -> u32        { u32::from_le(self.root_cluster) }
    pub fn fs_info_sector(&self) -> u16      { u16::from_le(self.fs_info) }
    pub fn backup_boot_sector(&self) -> u16  { u16::from_le(self.backup_boot_sector) }
    pub fn volume_id(&self) -> u32           { u32::from_le(self.volume_id) }

    /// The 16-bit count, or the 32-bit one when the 16-bit field is 0.
    pub fn total_sectors(&self) -> u32 {
        match u16::from_le(self.total_sectors_16) {
            0 => u32::from_le(self.total_sectors_32),
            n => n as u32,
        }
    }

    /// The 16-bit count, or the FAT32 extension's 32-bit one when the 16-bit field is 0.
    pub fn sectors_per_fat(&self) -> u32 {
        match u16::from_le(self.fat_size_16) {
            0 => u32::from_le(self.fat_size_32),
            n => n as u32,
        }
    }

    pub fn oem_name(&self) -> String { latin1(&self.oem).trim_end().to_string() }
    pub fn volume_label(&self) -> String { latin1(&self.volume_label).trim_end().to_string() }
    pub fn fs_type(&self) -> String { latin1(&self.fs_type).trim_end().to_string() }
}

/// Validated volume layout derived from the boot sector. All offsets are in bytes from the
/// start of the volume.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub bytes_per_sector:    u32,
    pub sectors_per_cluster: u32,
    /// log2 of bytes per cluster.
    pub cluster_order:       u32,
    pub reserved_sectors:    u32,
    pub num_fats:            u32,
    pub sectors_per_fat:     u32,
    pub root_cluster:        u32,
    pub fs_info_sector:      u32,
    pub total_sectors:       u32,
    pub num_data_clusters:   u32,
    pub fat_offset:          u64,
    pub fat_size:            u64,
    pub data_start:          u64,
}

impl Geometry {
    pub fn from_boot_sector(bs: &BootSector) -> Result<Self> {
        let bytes_per_sector = bs.bytes_per_sector() as u32;
        if !bytes_per_sector.is_power_of_two() || !(32..=4096).contains(&bytes_per_sector) {
            error!("fat32: invalid bytes per sector {bytes_per_sector}");
            return Err(FsError::InvalidArgument("bytes per sector"));
        }
        let sector_order = bytes_per_sector.trailing_zeros();

        let sectors_per_cluster = bs.sectors_per_cluster() as u32;
        if !sectors_per_cluster.is_power_of_two() || sectors_per_cluster > 128 {
            error!("fat32: invalid sectors per cluster {sectors_per_cluster}");
            return Err(FsError::InvalidArgument("sectors per cluster"));
        }
        let cluster_order = sector_order + sectors_per_cluster.trailing_zeros();

        let num_fats = bs.num_fats() as u32;
        if num_fats != 1 && num_fats != 2 {
            error!("fat32: invalid number of FAT copies {num_fats}");
            return Err(FsError::InvalidArgument("number of FAT copies"));
        }

        let root_entry_count = bs.root_entry_count() as u32;
        if root_entry_count != 0 {
            warn!("fat32: root entry count is {root_entry_count}, expected 0 on FAT32");
        }

        if bs.version() != 0 {
            error!("fat32: unsupported filesystem version {:#06x}", bs.version());
            return Err(FsError::InvalidArgument("filesystem version"));
        }

        let mut fs_info_sector = bs.fs_info_sector();
        if fs_info_sector == FS_INFO_NONE {
            fs_info_sector = 0;
        }
        if fs_info_sector != 0 && sector_order < 9 {
            error!("fat32: FS info sector present with {bytes_per_sector}-byte sectors");
            return Err(FsError::InvalidArgument("FS info sector"));
        }

        let sectors_per_fat = bs.sectors_per_fat();
        if sectors_per_fat == 0 {
            return Err(FsError::InvalidArgument("sectors per FAT"));
        }

        let reserved_sectors = bs.reserved_sectors() as u32;
        let total_sectors = bs.total_sectors();
        let root_dir_sectors = (root_entry_count * DIR_ENTRY_SIZE as u32).div_ceil(bytes_per_sector);
        let meta_sectors = reserved_sectors as u64
            + num_fats as u64 * sectors_per_fat as u64
            + root_dir_sectors as u64;
        if meta_sectors >= total_sectors as u64 {
            error!("fat32: {total_sectors} sectors leave no room for a data region");
            return Err(FsError::InvalidArgument("total sectors"));
        }
        let data_sectors = total_sectors as u64 - meta_sectors;

        let fat_size = (sectors_per_fat as u64) << sector_order;
        // The table can't describe more clusters than it has entries for.
        let fat_capacity = (fat_size / 4).saturating_sub(2);
        let num_data_clusters =
            (data_sectors >> sectors_per_cluster.trailing_zeros()).min(fat_capacity) as u32;
        if num_data_clusters < FAT32_MIN_CLUSTERS {
            warn!("fat32: only {num_data_clusters} data clusters, volume is not FAT32 sized");
        }

        let root_cluster = bs.root_cluster();
        if root_cluster < 2 || root_cluster >= num_data_clusters + 2 {
            error!("fat32: root cluster {root_cluster} out of range");
            return Err(FsError::InvalidArgument("root cluster"));
        }

        Ok(Geometry {
            bytes_per_sector,
            sectors_per_cluster,
            cluster_order,
            reserved_sectors,
            num_fats,
            sectors_per_fat,
            root_cluster,
            fs_info_sector: fs_info_sector as u32,
            total_sectors,
            num_data_clusters,
            fat_offset: (reserved_sectors as u64) << sector_order,
            fat_size,
            data_start: meta_sectors << sector_order,
        })
    }

    pub fn bytes_per_cluster(&self) -> u32 { 1 << self.cluster_order }
}

// ─── Directory entry (32 bytes) ────────────────────────────────────────────────

#[repr(C, packed)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    name:        [u8; 8],
    ext:         [u8; 3],
    attr:        u8,
    _reserved:   u8,
    crt_tenths:  u8,
    crt_time:    u16,
    crt_date:    u16,
    acc_date:    u16,
    cluster_hi:  u16,
    mod_time:    u16,
    mod_date:    u16,
    cluster_lo:  u16,
    size:        u32,
}

const _: () = assert!(size_of::<DirEntry>() == DIR_ENTRY_SIZE);

impl DirEntry {
    /// A fresh entry with every timestamp set to `now`.
    pub fn new(name: [u8; 8], ext: [u8; 3], attr: Attributes, cluster: u32, now: DateTime) -> Self {
        let (date, time) = (now.fat_date().to_le(), now.fat_time().to_le());
        DirEntry {
            name, ext,
            attr: attr.bits(),
            _reserved: 0,
            crt_tenths: 0,
            crt_time: time,
            crt_date: date,
            acc_date: date,
            cluster_hi: ((cluster >> 16) as u16).to_le(),
            mod_time: time,
            mod_date: date,
            cluster_lo: (cluster as u16).to_le(),
            size: 0,
        }
    }

    pub fn from_bytes(raw: &[u8; DIR_ENTRY_SIZE]) -> Self {
        unsafe { core::ptr::read_unaligned(raw.as_ptr() as *const DirEntry) }
    }

    pub fn to_bytes(&self) -> [u8; DIR_ENTRY_SIZE] {
        unsafe { core::mem::transmute::<DirEntry, [u8; DIR_ENTRY_SIZE]>(*self) }
    }

    pub fn name(&self) -> [u8; 8] { self.name }
    pub fn ext(&self) -> [u8; 3]  { self.ext }
    pub fn attributes(&self) -> Attributes { Attributes::from_bits_retain(self.attr) }
    pub fn set_attributes(&mut self, attr: Attributes) { self.attr = attr.bits(); }

    pub fn is_end(&self) -> bool     { self.name[0] == NAME_END }
    pub fn is_deleted(&self) -> bool { self.name[0] == NAME_DELETED }
    pub fn is_dir(&self) -> bool     { self.attributes().contains(Attributes::DIRECTORY) }
    pub fn is_read_only(&self) -> bool { self.attributes().contains(Attributes::READ_ONLY) }

    /// The activity log's slot: deleted marker, then `s`, extension `log`.
    pub fn is_log_slot(&self) -> bool {
        self.name[0] == NAME_DELETED && self.name[1] == b's' && self.ext == *b"log"
    }

    /// True for entries a directory listing must skip: volume labels, long-name slots,
    /// deleted slots and names with characters FAT doesn't allow.
    pub fn is_ignored(&self) -> bool {
        self.attributes().contains(Attributes::VOLUME)
            || !basename_valid(&self.name)
            || !extension_valid(&self.ext)
    }

    pub fn mark_deleted(&mut self) { self.name[0] = NAME_DELETED; }

    pub fn cluster(&self) -> u32 {
        ((u16::from_le(self.cluster_hi) as u32) << 16) | u16::from_le(self.cluster_lo) as u32
    }
    pub fn set_cluster(&mut self, cluster: u32) {
        self.cluster_hi = ((cluster >> 16) as u16).to_le();
        self.cluster_lo = (cluster as u16).to_le();
    }

    pub fn size(&self) -> u32 { u32::from_le(self.size) }
    pub fn set_size(&mut self, size: u32) { self.size = size.to_le(); }

    pub fn created(&self) -> DateTime {
        DateTime::from_fat(u16::from_le(self.crt_date), u16::from_le(self.crt_time))
    }
    pub fn modified(&self) -> DateTime {
        DateTime::from_fat(u16::from_le(self.mod_date), u16::from_le(self.mod_time))
    }
    /// FAT keeps no access time of day.
    pub fn accessed(&self) -> DateTime {
        DateTime::from_fat(u16::from_le(self.acc_date), 0)
    }

    pub fn set_modified(&mut self, at: DateTime) {
        self.mod_date = at.fat_date().to_le();
        self.mod_time = at.fat_time().to_le();
    }
    pub fn set_accessed(&mut self, at: DateTime) {
        self.acc_date = at.fat_date().to_le();
    }

    /// `"HELLO   TXT"` → `"HELLO.TXT"`. Bytes above 0x7F map to the same code point.
    pub fn short_name(&self) -> String {
        let base = latin1(&self.name);
        let ext = latin1(&self.ext);
        let (base, ext) = (base.trim_end_matches(' '), ext.trim_end_matches(' '));
        if ext.is_empty() { base.to_string() } else { format!("{base}.{ext}") }
    }
}

impl core::fmt::Debug for DirEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DirEntry")
            .field("name", &self.short_name())
            .field("attr", &self.attributes())
            .field("cluster", &self.cluster())
            .field("size", &self.size())
            .finish()
    }
}

// ─── 8.3 names ─────────────────────────────────────────────────────────────────

fn latin1(bytes: &[u8]) -> String { bytes.iter().map(|&b| b as char).collect() }

fn is_legal_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b >= 128 || b" $%-_@~`!(){}^#&".contains(&b)
}

pub fn basename_valid(name: &[u8; 8]) -> bool {
    !matches!(name[0], NAME_END | b' ' | NAME_DELETED) && name.iter().all(|&b| is_legal_char(b))
}

pub fn extension_valid(ext: &[u8; 3]) -> bool {
    ext.iter().all(|&b| is_legal_char(b))
}

/// Encodes a file name as a space-padded 8.3 pair, preserving case.
/// Fails for names that don't fit, contain characters FAT forbids, start with a space
/// or end in a dot.
pub fn encode_name(filename: &str) -> Result<([u8; 8], [u8; 3])> {
    if filename.ends_with('.') {
        return Err(FsError::InvalidArgument("name ends in a dot"));
    }
    let (base, extension) = match filename.rfind('.') {
        Some(i) => (&filename[..i], &filename[i + 1..]),
        None    => (filename, ""),
    };
    let to_bytes = |s: &str| -> Option<Vec<u8>> {
        s.chars().map(|c| u8::try_from(c as u32).ok().filter(|&b| is_legal_char(b))).collect()
    };
    let base = to_bytes(base).ok_or(FsError::InvalidArgument("illegal character in name"))?;
    let extension = to_bytes(extension).ok_or(FsError::InvalidArgument("illegal character in name"))?;
    if base.is_empty() || base.len() > 8 || extension.len() > 3 {
        return Err(FsError::InvalidArgument("name does not fit 8.3"));
    }

    let mut name = [b' '; 8];
    let mut ext  = [b' '; 3];
    name[..base.len()].copy_from_slice(&base);
    ext[..extension.len()].copy_from_slice(&extension);
    if !basename_valid(&name) {
        return Err(FsError::InvalidArgument("invalid base name"));
    }
    Ok((name, ext))
}

/// The raw `.` and `..` names of a directory's first two slots.
pub const DOT_NAME:    [u8; 8] = *b".       ";
pub const DOTDOT_NAME: [u8; 8] = *b"..      ";
pub const BLANK_EXT:   [u8; 3] = *b"   ";
