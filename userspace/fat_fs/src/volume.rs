//! A mounted FAT32 volume: geometry, allocation table and the path cache.
//!
//! The volume is the single owner of every piece of mount state. Requests are served
//! by the methods in `requests.rs`; this module holds mount/unmount, path resolution and
//! the entry-creation path they share.

use std::fs::{File, OpenOptions};
use std::path::Path;

use log::{debug, error, info, warn};

use crate::device::BlockDevice;
use crate::error::{FsError, Result};
use crate::file::{join_path, FileHandle};
use crate::hierarchy_tree::NodeId;
use crate::layout::{BootSector, Geometry, SECTOR_SIZE};
use crate::path_cache::PathCache;
use crate::table::ClusterTable;
use crate::time::DateTime;

// ─── Options ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MountMode {
    #[default]
    ReadWrite,
    ReadOnly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MountOptions {
    pub mode:         MountMode,
    /// Record reads and writes in the hidden `/fs.log`.
    pub activity_log: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        MountOptions { mode: MountMode::ReadWrite, activity_log: true }
    }
}

impl MountOptions {
    pub fn read_only() -> Self {
        MountOptions { mode: MountMode::ReadOnly, ..Self::default() }
    }

    pub fn is_writable(&self) -> bool { self.mode == MountMode::ReadWrite }
}

/// Summary of a mounted volume, as printed by `fat_fs info`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeInfo {
    pub oem_name:          String,
    pub label:             String,
    pub fs_type:           String,
    pub volume_id:         u32,
    pub bytes_per_sector:  u32,
    pub bytes_per_cluster: u32,
    pub data_clusters:     u32,
    pub free_clusters:     u32,
    pub root_cluster:      u32,
}

// ─── Volume ────────────────────────────────────────────────────────────────────

pub struct Volume<D> {
    pub(crate) table:    ClusterTable<D>,
    pub(crate) cache:    PathCache,
    pub(crate) root:     NodeId,
    pub(crate) options:  MountOptions,
    geometry: Geometry,
    boot:     BootSector,
}

impl Volume<File> {
    /// Opens the image at `path` and mounts it.
    pub fn open_image(path: impl AsRef<Path>, options: MountOptions) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(options.is_writable())
            .open(path.as_ref())?;
        Self::mount(file, options)
    }
}

impl<D: BlockDevice> Volume<D> {
    /// Reads and validates the boot sector, loads the allocation table and caches the
    /// root directory.
    pub fn mount(mut device: D, options: MountOptions) -> Result<Self> {
        let mut sector = [0u8; SECTOR_SIZE];
        let n = device.read_full_at(0, &mut sector)?;
        if n < SECTOR_SIZE {
            error!("fat32: device too small for a boot sector ({n} bytes)");
            return Err(FsError::short_transfer(n, SECTOR_SIZE));
        }
        let boot = BootSector::from_sector(&sector)?;
        let geometry = Geometry::from_boot_sector(&boot)?;
        let table = ClusterTable::load(device, &geometry, options.is_writable())?;

        let mut cache = PathCache::new();
        let root = cache.insert(FileHandle::root(geometry.root_cluster, DateTime::now()), None)?;

        info!(
            "fat32: mounted {:?}: {} clusters of {} bytes, root at {}{}",
            boot.volume_label(),
            geometry.num_data_clusters,
            geometry.bytes_per_cluster(),
            geometry.root_cluster,
            if options.is_writable() { "" } else { " (read-only)" },
        );
        Ok(Volume { table, cache, root, options, geometry, boot })
    }

    /// Flushes the device and drops every cached handle.
    pub fn unmount(mut self) -> Result<D> {
        if self.options.is_writable() {
            self.table.flush()?;
        }
        debug!("fat32: unmount, dropping {} cached handles", self.cache.size());
        self.cache.clear();
        Ok(self.table.into_device())
    }

    pub fn geometry(&self) -> &Geometry { &self.geometry }
    pub fn options(&self) -> MountOptions { self.options }
    pub fn root(&self) -> NodeId { self.root }
    pub fn cache(&self) -> &PathCache { &self.cache }
    pub fn table(&self) -> &ClusterTable<D> { &self.table }

    pub fn free_clusters(&self) -> u32 {
        let first = crate::table::CLUSTER_FIRST;
        (first..first + self.geometry.num_data_clusters)
            .filter(|&c| self.table.is_free(c))
            .count() as u32
    }

    pub fn info(&self) -> VolumeInfo {
        VolumeInfo {
            oem_name: self.boot.oem_name(),
            label: self.boot.volume_label(),
            fs_type: self.boot.fs_type(),
            volume_id: self.boot.volume_id(),
            bytes_per_sector: self.geometry.bytes_per_sector,
            bytes_per_cluster: self.geometry.bytes_per_cluster(),
            data_clusters: self.geometry.num_data_clusters,
            free_clusters: self.free_clusters(),
            root_cluster: self.geometry.root_cluster,
        }
    }

    pub(crate) fn require_writable(&self) -> Result<()> {
        if self.options.is_writable() { Ok(()) } else { Err(FsError::ReadOnly) }
    }

    pub(crate) fn file(&self, id: NodeId) -> Result<&FileHandle> {
        self.cache.file(id).ok_or(FsError::NotFound)
    }

    // ─── Resolution ────────────────────────────────────────────────────────────

    /// Populates the cache with `dir`'s entries the first time it is needed.
    pub(crate) fn ensure_children(&mut self, dir: NodeId) -> Result<()> {
        let file = self.cache.file_mut(dir).ok_or(FsError::NotFound)?;
        if !file.is_dir() { return Err(FsError::NotDir); }
        if file.children_read() { return Ok(()); }

        let children = file.read_children(&mut self.table)?;
        for child in children {
            // Two slots with the same name: the first one stays visible.
            let _ = self.cache.insert(child, Some(dir));
        }
        Ok(())
    }

    /// Finds the handle for an absolute path, reading directories along the way.
    pub fn resolve(&mut self, path: &str) -> Result<NodeId> {
        if !path.starts_with('/') {
            return Err(FsError::InvalidArgument("path must be absolute"));
        }
        if let Some(id) = self.cache.search(path) {
            return Ok(id);
        }

        let mut cur = self.root;
        let mut cur_path = String::from("/");
        for component in path.split('/').filter(|c| !c.is_empty()) {
            self.ensure_children(cur)?;
            cur_path = join_path(&cur_path, component);
            cur = self.cache.search(&cur_path).ok_or(FsError::NotFound)?;
        }
        Ok(cur)
    }

    // ─── Creation ──────────────────────────────────────────────────────────────

    /// Creates `name` inside the directory `parent` and caches it.
    pub(crate) fn create_in(&mut self, parent: NodeId, name: &str, is_dir: bool, as_log: bool) -> Result<NodeId> {
        self.ensure_children(parent)?;
        let parent_file = self.cache.file(parent).ok_or(FsError::NotFound)?;
        if self.cache.search(&join_path(parent_file.path(), name)).is_some() {
            return Err(FsError::Exists);
        }

        let mut child = FileHandle::create(&mut self.table, parent_file, name, is_dir)?;
        if as_log {
            child.mark_as_log();
        }
        let parent_file = self.cache.file_mut(parent).ok_or(FsError::NotFound)?;
        if let Err(e) = parent_file.add_child(&mut self.table, &mut child) {
            warn!("fat32: could not add {} to its directory: {e}", child.path());
            let _ = self.table.free_chain(child.start_cluster());
            return Err(e);
        }
        self.cache.insert(child, Some(parent))
    }

    /// Splits `path` into its parent's id and the final component, and creates it.
    pub(crate) fn create_path(&mut self, path: &str, is_dir: bool) -> Result<NodeId> {
        self.require_writable()?;
        let (parent_path, name) = split_path(path)?;
        let parent = self.resolve(parent_path)?;
        self.create_in(parent, name, is_dir, false)
    }
}

/// `/a/b/c` → (`/a/b`, `c`). Trailing slashes are ignored.
pub(crate) fn split_path(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/').ok_or(FsError::InvalidArgument("path must be absolute"))?;
    let name = &trimmed[idx + 1..];
    if name.is_empty() {
        return Err(FsError::InvalidArgument("path has no final component"));
    }
    let parent = if idx == 0 { "/" } else { &trimmed[..idx] };
    Ok((parent, name))
}
