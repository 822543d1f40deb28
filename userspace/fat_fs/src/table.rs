//! The File Allocation Table: cluster chains, free-space search and data-region I/O.
//!
//! The first FAT copy is loaded into memory at mount. Every mutation is written to the
//! device first and then to the in-memory image, so the two never disagree after a
//! successful call. Only the first copy is maintained.

use log::{debug, error, warn};

use crate::device::BlockDevice;
use crate::error::{FsError, Result};
use crate::layout::Geometry;

// ─── Constants ─────────────────────────────────────────────────────────────────

pub const CLUSTER_FREE:      u32 = 0;
pub const CLUSTER_FIRST:     u32 = 2;
/// Lowest end-of-chain marker. Anything at or above it ends a chain.
pub const CLUSTER_EOC_MIN:   u32 = 0x0FFF_FFF8;
/// End-of-chain value this driver writes.
pub const CLUSTER_EOC:       u32 = 0x0FFF_FFFF;
const ENTRY_MASK:            u32 = 0x0FFF_FFFF;

pub fn is_eoc(cluster: u32) -> bool { cluster >= CLUSTER_EOC_MIN }

// ─── Table ─────────────────────────────────────────────────────────────────────

pub struct ClusterTable<D> {
    device:            D,
    fat:               Vec<u8>,
    fat_offset:        u64,
    data_start:        u64,
    cluster_order:     u32,
    num_data_clusters: u32,
    writable:          bool,
}

impl<D: BlockDevice> ClusterTable<D> {
    /// Loads the first FAT copy described by `geometry` from `device`.
    pub fn load(mut device: D, geometry: &Geometry, writable: bool) -> Result<Self> {
        let mut fat = vec![0u8; geometry.fat_size as usize];
        let n = device.read_full_at(geometry.fat_offset, &mut fat)?;
        if n < fat.len() {
            error!("fat32: allocation table truncated ({n} of {} bytes)", fat.len());
            return Err(FsError::short_transfer(n, fat.len()));
        }
        debug!("fat32: loaded {} byte FAT at {:#x}", fat.len(), geometry.fat_offset);
        Ok(ClusterTable {
            device,
            fat,
            fat_offset: geometry.fat_offset,
            data_start: geometry.data_start,
            cluster_order: geometry.cluster_order,
            num_data_clusters: geometry.num_data_clusters,
            writable,
        })
    }

    pub fn num_data_clusters(&self) -> u32 { self.num_data_clusters }
    pub fn bytes_per_cluster(&self) -> u32 { 1 << self.cluster_order }
    pub fn is_writable(&self) -> bool { self.writable }

    pub fn device(&self) -> &D { &self.device }
    pub fn into_device(self) -> D { self.device }

    pub fn is_valid_cluster(&self, cluster: u32) -> bool {
        cluster >= CLUSTER_FIRST && cluster - CLUSTER_FIRST < self.num_data_clusters
    }

    fn raw_entry(&self, cluster: u32) -> u32 {
        let off = cluster as usize * 4;
        self.fat.get(off..off + 4)
            .map_or(CLUSTER_EOC, |b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) & ENTRY_MASK)
    }

    /// Follows one link. Anything that isn't a valid data cluster comes back as EOC.
    pub fn next_cluster(&self, cluster: u32) -> u32 {
        if !self.is_valid_cluster(cluster) { return CLUSTER_EOC; }
        let next = self.raw_entry(cluster);
        if self.is_valid_cluster(next) { next } else { CLUSTER_EOC }
    }

    pub fn is_free(&self, cluster: u32) -> bool {
        self.is_valid_cluster(cluster) && self.raw_entry(cluster) == CLUSTER_FREE
    }

    /// Writes `next` as the successor of `cluster`, on disk and in memory.
    pub fn set_next_cluster(&mut self, cluster: u32, next: u32) -> Result<()> {
        if !self.writable { return Err(FsError::ReadOnly); }
        if !self.is_valid_cluster(cluster) {
            return Err(FsError::InvalidArgument("cluster out of range"));
        }
        let bytes = (next & ENTRY_MASK).to_le_bytes();
        let disk_off = self.fat_offset + cluster as u64 * 4;
        let n = self.device.write_full_at(disk_off, &bytes)?;
        if n < bytes.len() {
            error!("fat32: short FAT write for cluster {cluster}");
            return Err(FsError::short_transfer(n, bytes.len()));
        }
        let off = cluster as usize * 4;
        self.fat[off..off + 4].copy_from_slice(&bytes);
        Ok(())
    }

    /// Lowest-numbered free cluster.
    pub fn next_free_cluster(&self) -> Result<u32> {
        (CLUSTER_FIRST..CLUSTER_FIRST + self.num_data_clusters)
            .find(|&c| self.raw_entry(c) == CLUSTER_FREE)
            .ok_or(FsError::NoSpace)
    }

    /// Claims the lowest free cluster as a one-cluster chain.
    pub fn allocate_cluster(&mut self) -> Result<u32> {
        let cluster = self.next_free_cluster()?;
        self.set_next_cluster(cluster, CLUSTER_EOC)?;
        Ok(cluster)
    }

    /// Frees `start` and every cluster after it.
    pub fn free_chain(&mut self, start: u32) -> Result<u32> {
        let clusters: Vec<u32> = self.chain(start).collect();
        for &c in &clusters {
            self.set_next_cluster(c, CLUSTER_FREE)?;
        }
        Ok(clusters.len() as u32)
    }

    pub fn cluster_offset(&self, cluster: u32) -> u64 {
        self.data_start + (((cluster - CLUSTER_FIRST) as u64) << self.cluster_order)
    }

    /// Cluster holding byte `offset` of the chain starting at `start`.
    pub fn seek_cluster(&self, start: u32, offset: u64) -> Result<u32> {
        let mut cluster = start;
        for _ in 0..(offset >> self.cluster_order) {
            cluster = self.next_cluster(cluster);
            if is_eoc(cluster) { return Err(FsError::Overflow); }
        }
        if !self.is_valid_cluster(cluster) { return Err(FsError::Overflow); }
        Ok(cluster)
    }

    pub fn clusters_for_size(&self, size: u64) -> u64 {
        size.div_ceil(self.bytes_per_cluster() as u64)
    }

    /// Bytes from `offset` to the end of its cluster, capped at `remaining`.
    pub fn bytes_left_in_cluster(&self, offset: u64, remaining: usize) -> usize {
        let bpc = self.bytes_per_cluster() as u64;
        ((bpc - (offset & (bpc - 1))) as usize).min(remaining)
    }

    /// Iterates a chain from `start`, stopping at EOC or after `num_data_clusters` links.
    pub fn chain(&self, start: u32) -> Chain<'_, D> {
        Chain { table: self, next: start, left: self.num_data_clusters }
    }

    // ─── Data region ───────────────────────────────────────────────────────────

    pub fn read_data(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        Ok(self.device.read_full_at(offset, buf)?)
    }

    pub fn write_data(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        if !self.writable { return Err(FsError::ReadOnly); }
        Ok(self.device.write_full_at(offset, buf)?)
    }

    /// Overwrites a whole cluster with zeroes.
    pub fn zero_cluster(&mut self, cluster: u32) -> Result<()> {
        let zeros = vec![0u8; self.bytes_per_cluster() as usize];
        let n = self.write_data(self.cluster_offset(cluster), &zeros)?;
        if n < zeros.len() {
            return Err(FsError::short_transfer(n, zeros.len()));
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> { Ok(self.device.flush()?) }
}

pub struct Chain<'a, D> {
    table: &'a ClusterTable<D>,
    next:  u32,
    left:  u32,
}

impl<D: BlockDevice> Iterator for Chain<'_, D> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let cluster = self.next;
        if !self.table.is_valid_cluster(cluster) { return None; }
        if self.left == 0 {
            warn!("fat32: chain through cluster {cluster} does not terminate");
            return None;
        }
        self.left -= 1;
        self.next = self.table.next_cluster(cluster);
        Some(cluster)
    }
}
