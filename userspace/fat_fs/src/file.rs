//! One cached file or directory and the byte-range operations on it.
//!
//! A `FileHandle` owns a copy of its directory entry. Every operation that changes the
//! entry writes it back to its slot in the parent directory before returning. The
//! cluster table is borrowed per call.

use fat_api_types::fs::{FileStat, S_IFDIR, S_IFREG};
use log::{debug, warn};

use crate::device::BlockDevice;
use crate::error::{FsError, Result};
use crate::layout::{
    encode_name, Attributes, DirEntry, BLANK_EXT, DIR_ENTRY_SIZE, DOTDOT_NAME, DOT_NAME,
    LOG_FILE_NAME,
};
use crate::table::{is_eoc, ClusterTable, CLUSTER_EOC};
use crate::time::DateTime;

/// Where a directory entry lives: the parent directory's first cluster and the slot
/// index within the parent's entry table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryLocation {
    pub dir_cluster: u32,
    pub slot:        u32,
}

#[derive(Debug)]
pub struct FileHandle {
    entry:         DirEntry,
    name:          String,
    path:          String,
    start_cluster: u32,
    /// `None` for the root directory, which has no entry of its own.
    location:      Option<EntryLocation>,
    open_count:    u32,
    children_read: bool,
    /// Slots in use, counting deleted and skipped ones; the next child goes here.
    num_entries:   u32,
    is_log:        bool,
}

pub fn join_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') { format!("{parent}{name}") } else { format!("{parent}/{name}") }
}

impl FileHandle {
    pub fn root(cluster: u32, mounted_at: DateTime) -> Self {
        FileHandle {
            entry: DirEntry::new([b' '; 8], BLANK_EXT, Attributes::DIRECTORY, cluster, mounted_at),
            name: "/".to_string(),
            path: "/".to_string(),
            start_cluster: cluster,
            location: None,
            open_count: 0,
            children_read: false,
            num_entries: 0,
            is_log: false,
        }
    }

    /// Wraps an entry read from slot `location` of the directory at `parent_path`.
    pub fn from_entry(entry: DirEntry, parent_path: &str, location: EntryLocation) -> Self {
        let is_log = entry.is_log_slot();
        let name = if is_log { LOG_FILE_NAME.to_string() } else { entry.short_name() };
        FileHandle {
            path: join_path(parent_path, &name),
            name,
            start_cluster: entry.cluster(),
            entry,
            location: Some(location),
            open_count: 0,
            children_read: false,
            num_entries: 0,
            is_log,
        }
    }

    pub fn entry(&self) -> &DirEntry { &self.entry }
    pub fn name(&self) -> &str { &self.name }
    pub fn path(&self) -> &str { &self.path }
    pub fn start_cluster(&self) -> u32 { self.start_cluster }
    pub fn location(&self) -> Option<EntryLocation> { self.location }
    pub fn size(&self) -> u32 { self.entry.size() }
    pub fn is_dir(&self) -> bool { self.entry.is_dir() }
    pub fn is_root(&self) -> bool { self.location.is_none() }
    pub fn is_log(&self) -> bool { self.is_log }
    pub fn open_count(&self) -> u32 { self.open_count }
    pub fn children_read(&self) -> bool { self.children_read }
    pub fn num_entries(&self) -> u32 { self.num_entries }

    pub(crate) fn inc_open_count(&mut self) { self.open_count += 1; }
    pub(crate) fn dec_open_count(&mut self) { self.open_count = self.open_count.saturating_sub(1); }

    /// Turns a freshly created file into the hidden activity log slot.
    pub(crate) fn mark_as_log(&mut self) {
        self.entry.mark_deleted();
        self.entry.set_attributes(Attributes::SYSTEM);
        self.is_log = true;
    }

    // ─── Creation ──────────────────────────────────────────────────────────────

    /// Builds a new file or directory named `name` inside `parent` and allocates its
    /// first cluster. A directory's cluster is zeroed and given `.` and `..` entries.
    /// The entry itself is written once the handle is added with [`Self::add_child`].
    pub fn create<D: BlockDevice>(
        table: &mut ClusterTable<D>,
        parent: &FileHandle,
        name: &str,
        is_dir: bool,
    ) -> Result<Self> {
        if !parent.is_dir() { return Err(FsError::NotDir); }
        let (base, ext) = encode_name(name)?;
        let now = DateTime::now();
        let cluster = table.allocate_cluster()?;
        let attr = if is_dir { Attributes::DIRECTORY } else { Attributes::ARCHIVE };
        let entry = DirEntry::new(base, ext, attr, cluster, now);
        let name = entry.short_name();

        let mut handle = FileHandle {
            path: join_path(&parent.path, &name),
            name,
            entry,
            start_cluster: cluster,
            location: None,
            open_count: 0,
            children_read: is_dir,
            num_entries: 0,
            is_log: false,
        };

        if is_dir {
            let parent_cluster = if parent.is_root() { 0 } else { parent.start_cluster };
            if let Err(e) = handle.init_directory(table, parent_cluster, now) {
                let _ = table.free_chain(cluster);
                return Err(e);
            }
        }
        debug!("fat32: created {} at cluster {cluster}", handle.path);
        Ok(handle)
    }

    fn init_directory<D: BlockDevice>(
        &mut self,
        table: &mut ClusterTable<D>,
        parent_cluster: u32,
        now: DateTime,
    ) -> Result<()> {
        table.zero_cluster(self.start_cluster)?;
        let dot = DirEntry::new(DOT_NAME, BLANK_EXT, Attributes::DIRECTORY, self.start_cluster, now);
        let dotdot = DirEntry::new(DOTDOT_NAME, BLANK_EXT, Attributes::DIRECTORY, parent_cluster, now);
        let base = table.cluster_offset(self.start_cluster);
        for (i, e) in [dot, dotdot].iter().enumerate() {
            let bytes = e.to_bytes();
            let n = table.write_data(base + (i * DIR_ENTRY_SIZE) as u64, &bytes)?;
            if n < bytes.len() { return Err(FsError::short_transfer(n, bytes.len())); }
        }
        self.num_entries = 2;
        Ok(())
    }

    // ─── Entry persistence ─────────────────────────────────────────────────────

    fn entry_offset<D: BlockDevice>(table: &ClusterTable<D>, loc: EntryLocation) -> Result<u64> {
        let byte = loc.slot as u64 * DIR_ENTRY_SIZE as u64;
        let cluster = table.seek_cluster(loc.dir_cluster, byte)
            .map_err(|_| FsError::NoSpace)?;
        let in_cluster = byte & (table.bytes_per_cluster() as u64 - 1);
        Ok(table.cluster_offset(cluster) + in_cluster)
    }

    /// Rewrites this handle's entry in its parent. No-op for the root.
    pub fn write_entry<D: BlockDevice>(&self, table: &mut ClusterTable<D>) -> Result<()> {
        let Some(loc) = self.location else { return Ok(()) };
        let offset = Self::entry_offset(table, loc)?;
        let bytes = self.entry.to_bytes();
        let n = table.write_data(offset, &bytes)?;
        if n < bytes.len() {
            return Err(FsError::short_transfer(n, bytes.len()));
        }
        Ok(())
    }

    // ─── Data ──────────────────────────────────────────────────────────────────

    /// Reads up to `buf.len()` bytes at `offset`. Returns the bytes transferred, which
    /// is short only at end of file, end of chain or a short device read.
    pub fn read<D: BlockDevice>(
        &mut self,
        table: &mut ClusterTable<D>,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<usize> {
        if self.is_dir() { return Err(FsError::IsDir); }
        let size = self.size() as u64;
        if offset > size { return Err(FsError::Overflow); }
        let len = (buf.len() as u64).min(size - offset) as usize;
        if len == 0 { return Ok(0); }

        let mask = table.bytes_per_cluster() as u64 - 1;
        let mut cluster = table.seek_cluster(self.start_cluster, offset)?;
        let mut done = 0;
        let mut pos = offset;
        while done < len {
            let chunk = table.bytes_left_in_cluster(pos, len - done);
            let disk_off = table.cluster_offset(cluster) + (pos & mask);
            let n = table.read_data(disk_off, &mut buf[done..done + chunk])?;
            done += n;
            pos += n as u64;
            if n < chunk { break; }
            if done < len {
                cluster = table.next_cluster(cluster);
                if is_eoc(cluster) { break; }
            }
        }

        if table.is_writable() {
            self.entry.set_accessed(DateTime::now());
            self.write_entry(table)?;
        }
        Ok(done)
    }

    /// Successor of `cluster`, linking a newly allocated cluster if the chain ends here.
    fn next_or_extend<D: BlockDevice>(table: &mut ClusterTable<D>, cluster: u32) -> Result<u32> {
        let next = table.next_cluster(cluster);
        if !is_eoc(next) { return Ok(next); }
        let fresh = table.allocate_cluster()?;
        table.set_next_cluster(cluster, fresh)?;
        Ok(fresh)
    }

    fn write_chunks<D: BlockDevice>(
        &mut self,
        table: &mut ClusterTable<D>,
        buf: &[u8],
        offset: u64,
        done: &mut usize,
    ) -> Result<()> {
        // A start cluster the FAT shows as free was released by an earlier remove.
        if !table.is_valid_cluster(self.start_cluster) || table.is_free(self.start_cluster) {
            let first = table.allocate_cluster()?;
            self.start_cluster = first;
            self.entry.set_cluster(first);
        }
        let bpc = table.bytes_per_cluster() as u64;
        let mut cluster = self.start_cluster;
        for _ in 0..offset / bpc {
            cluster = Self::next_or_extend(table, cluster)?;
        }

        let mut pos = offset;
        while *done < buf.len() {
            let chunk = table.bytes_left_in_cluster(pos, buf.len() - *done);
            let disk_off = table.cluster_offset(cluster) + (pos & (bpc - 1));
            let n = table.write_data(disk_off, &buf[*done..*done + chunk])?;
            *done += n;
            pos += n as u64;
            if n < chunk {
                return Err(FsError::short_transfer(n, chunk));
            }
            if *done < buf.len() {
                cluster = Self::next_or_extend(table, cluster)?;
            }
        }
        Ok(())
    }

    /// Writes `buf` at `offset`, growing the cluster chain as needed. The file grows if
    /// the write ends past the current size.
    ///
    /// A failure after some bytes reached the disk returns the partial count. The
    /// allocation table may then hold a cluster the entry doesn't account for.
    pub fn write<D: BlockDevice>(
        &mut self,
        table: &mut ClusterTable<D>,
        buf: &[u8],
        offset: u64,
    ) -> Result<usize> {
        if self.is_dir() { return Err(FsError::IsDir); }
        let size = self.size() as u64;
        if offset > size { return Err(FsError::Overflow); }
        if offset + buf.len() as u64 > u32::MAX as u64 { return Err(FsError::NoSpace); }
        if buf.is_empty() { return Ok(0); }

        let mut done = 0;
        match self.write_chunks(table, buf, offset, &mut done) {
            Ok(()) => {}
            Err(e) if done == 0 => return Err(e),
            Err(e) => warn!("fat32: write to {} stopped after {done} bytes: {e}", self.path),
        }

        let end = offset + done as u64;
        if end > size {
            self.entry.set_size(end as u32);
        }
        self.entry.set_modified(DateTime::now());
        self.write_entry(table)?;
        Ok(done)
    }

    /// Shrinks the file to `new_size` bytes, freeing clusters past the new end. Growing
    /// is not supported; a larger `new_size` leaves the file alone.
    pub fn truncate<D: BlockDevice>(&mut self, table: &mut ClusterTable<D>, new_size: u64) -> Result<()> {
        if self.is_dir() { return Err(FsError::IsDir); }
        let size = self.size() as u64;
        if new_size >= size { return Ok(()); }

        if table.is_valid_cluster(self.start_cluster) {
            let keep = table.clusters_for_size(new_size).max(1);
            let current = table.chain(self.start_cluster).count() as u64;
            if keep < current {
                let bpc = table.bytes_per_cluster() as u64;
                let last = table.seek_cluster(self.start_cluster, (keep - 1) * bpc)?;
                let rest = table.next_cluster(last);
                table.set_next_cluster(last, CLUSTER_EOC)?;
                let freed = table.free_chain(rest)?;
                debug!("fat32: truncate {} freed {freed} clusters", self.path);
            }
        }

        self.entry.set_size(new_size as u32);
        self.entry.set_modified(DateTime::now());
        self.write_entry(table)
    }

    /// Frees the cluster chain and marks the entry deleted on disk. The handle itself
    /// stays cached until the caller drops it.
    pub fn remove<D: BlockDevice>(&mut self, table: &mut ClusterTable<D>) -> Result<()> {
        if self.is_root() { return Err(FsError::InvalidArgument("cannot remove the root")); }
        if table.is_valid_cluster(self.start_cluster) {
            table.free_chain(self.start_cluster)?;
        }
        self.entry.set_size(0);
        self.entry.mark_deleted();
        self.write_entry(table)
    }

    pub fn set_times<D: BlockDevice>(
        &mut self,
        table: &mut ClusterTable<D>,
        accessed: DateTime,
        modified: DateTime,
    ) -> Result<()> {
        self.entry.set_accessed(accessed);
        self.entry.set_modified(modified);
        self.write_entry(table)
    }

    // ─── Directories ───────────────────────────────────────────────────────────

    /// Reads every live entry of this directory from disk and returns new handles for
    /// them. Updates the slot count and marks the directory as read.
    pub fn read_children<D: BlockDevice>(&mut self, table: &mut ClusterTable<D>) -> Result<Vec<FileHandle>> {
        if !self.is_dir() { return Err(FsError::NotDir); }
        let bpc = table.bytes_per_cluster() as usize;
        let clusters: Vec<u32> = table.chain(self.start_cluster).collect();
        let mut buf = vec![0u8; bpc];
        let mut children = Vec::new();
        let mut slot = 0u32;

        'clusters: for cluster in clusters {
            let n = table.read_data(table.cluster_offset(cluster), &mut buf)?;
            if n < bpc { return Err(FsError::short_transfer(n, bpc)); }
            for raw in buf.chunks_exact(DIR_ENTRY_SIZE) {
                let Ok(raw) = <&[u8; DIR_ENTRY_SIZE]>::try_from(raw) else { continue };
                let entry = DirEntry::from_bytes(raw);
                if entry.is_end() { break 'clusters; }
                let location = EntryLocation { dir_cluster: self.start_cluster, slot };
                slot += 1;
                if entry.is_log_slot() {
                    let mut entry = entry;
                    if table.is_free(entry.cluster()) {
                        entry.set_cluster(0);
                        entry.set_size(0);
                    }
                    children.push(FileHandle::from_entry(entry, &self.path, location));
                } else if !entry.is_ignored() {
                    children.push(FileHandle::from_entry(entry, &self.path, location));
                }
            }
        }

        self.num_entries = slot;
        self.children_read = true;
        debug!("fat32: {} has {} entries in {slot} slots", self.path, children.len());
        Ok(children)
    }

    /// Stores `child`'s entry in this directory's next free slot, linking one more
    /// zeroed cluster to the directory when its current clusters are full.
    pub fn add_child<D: BlockDevice>(&mut self, table: &mut ClusterTable<D>, child: &mut FileHandle) -> Result<()> {
        if !self.is_dir() { return Err(FsError::NotDir); }
        let slot = self.num_entries;
        let per_cluster = table.bytes_per_cluster() / DIR_ENTRY_SIZE as u32;
        let needed = (slot / per_cluster + 1) as usize;
        let clusters: Vec<u32> = table.chain(self.start_cluster).collect();
        if needed > clusters.len() {
            let Some(&last) = clusters.last() else { return Err(FsError::NoSpace) };
            let fresh = table.allocate_cluster()?;
            if let Err(e) = table.zero_cluster(fresh).and_then(|_| table.set_next_cluster(last, fresh)) {
                let _ = table.set_next_cluster(fresh, 0);
                return Err(e);
            }
            debug!("fat32: directory {} grew into cluster {fresh}", self.path);
        }

        child.location = Some(EntryLocation { dir_cluster: self.start_cluster, slot });
        child.write_entry(table)?;
        self.num_entries += 1;
        Ok(())
    }

    // ─── Metadata ──────────────────────────────────────────────────────────────

    pub fn stat<D: BlockDevice>(&self, table: &ClusterTable<D>) -> FileStat {
        let kind = if self.is_dir() { S_IFDIR } else { S_IFREG };
        let perm = if self.entry.is_read_only() { 0o555 } else { 0o777 };
        FileStat {
            mode: kind | perm,
            size: self.size() as u64,
            blocks: table.chain(self.start_cluster).count() as u64,
            block_size: table.bytes_per_cluster(),
            atime: self.entry.accessed().to_unix(),
            mtime: self.entry.modified().to_unix(),
            ctime: self.entry.created().to_unix(),
        }
    }
}
