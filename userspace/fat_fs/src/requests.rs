//! The request boundary: one method per filesystem operation a host layer forwards.
//!
//! Path-addressed requests resolve through the cache first. Handle-addressed ones take
//! the `NodeId` returned by `open`/`opendir`/`mknod`/`mkdir`.

use fat_api_types::fs::{self as api, FileStat, FsOperation};
use log::{debug, error, warn};

use crate::device::BlockDevice;
use crate::error::{FsError, Result};
use crate::hierarchy_tree::NodeId;
use crate::time::DateTime;
use crate::volume::Volume;

fn trace<T>(op: FsOperation, target: &str, result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => debug!("fat32: {} {target}", op.as_str()),
        Err(e @ FsError::Io(_)) => error!("fat32: {} {target}: {e}", op.as_str()),
        Err(e) => debug!("fat32: {} {target}: {e}", op.as_str()),
    }
    result
}

impl<D: BlockDevice> Volume<D> {
    pub fn getattr(&mut self, path: &str) -> Result<FileStat> {
        let result = self.resolve(path).and_then(|id| self.fgetattr(id));
        trace(FsOperation::GetAttr, path, result)
    }

    pub fn fgetattr(&self, id: NodeId) -> Result<FileStat> {
        Ok(self.file(id)?.stat(&self.table))
    }

    /// Opens a regular file and pins it and its ancestors in the cache.
    pub fn open(&mut self, path: &str) -> Result<NodeId> {
        let result = self.resolve(path).and_then(|id| {
            if self.file(id)?.is_dir() { return Err(FsError::IsDir); }
            self.cache.inc_open_count(id);
            Ok(id)
        });
        trace(FsOperation::Open, path, result)
    }

    pub fn opendir(&mut self, path: &str) -> Result<NodeId> {
        let result = self.resolve(path).and_then(|id| {
            self.ensure_children(id)?;
            self.cache.inc_open_count(id);
            Ok(id)
        });
        trace(FsOperation::OpenDir, path, result)
    }

    pub fn release(&mut self, id: NodeId) {
        self.cache.dec_open_count(id);
        debug!("fat32: {} {id:?}", FsOperation::Release.as_str());
    }

    pub fn releasedir(&mut self, id: NodeId) {
        self.cache.dec_open_count(id);
        debug!("fat32: {} {id:?}", FsOperation::ReleaseDir.as_str());
    }

    pub fn read(&mut self, id: NodeId, buf: &mut [u8], offset: u64) -> Result<usize> {
        let file = self.cache.file_mut(id).ok_or(FsError::NotFound)?;
        let path = file.path().to_string();
        let is_log = file.is_log();
        let result = file.read(&mut self.table, buf, offset);
        if result.is_ok() && !is_log {
            self.record_activity(&path, FsOperation::Read);
        }
        trace(FsOperation::Read, &path, result)
    }

    pub fn write(&mut self, id: NodeId, buf: &[u8], offset: u64) -> Result<usize> {
        self.require_writable()?;
        let file = self.cache.file_mut(id).ok_or(FsError::NotFound)?;
        let path = file.path().to_string();
        let is_log = file.is_log();
        let result = file.write(&mut self.table, buf, offset);
        if result.is_ok() && !is_log {
            self.record_activity(&path, FsOperation::Write);
        }
        trace(FsOperation::Write, &path, result)
    }

    pub fn truncate(&mut self, path: &str, size: u64) -> Result<()> {
        let result = self.require_writable()
            .and_then(|_| self.resolve(path))
            .and_then(|id| {
                let file = self.cache.file_mut(id).ok_or(FsError::NotFound)?;
                file.truncate(&mut self.table, size)
            });
        trace(FsOperation::Truncate, path, result)
    }

    /// Sets access and modification times, given as Unix seconds.
    pub fn utime(&mut self, path: &str, atime: i64, mtime: i64) -> Result<()> {
        let result = self.require_writable()
            .and_then(|_| self.resolve(path))
            .and_then(|id| {
                let file = self.cache.file_mut(id).ok_or(FsError::NotFound)?;
                file.set_times(&mut self.table, DateTime::from_unix(atime), DateTime::from_unix(mtime))
            });
        trace(FsOperation::SetTimes, path, result)
    }

    pub fn mknod(&mut self, path: &str) -> Result<NodeId> {
        let result = self.create_path(path, false);
        trace(FsOperation::CreateFile, path, result)
    }

    pub fn mkdir(&mut self, path: &str) -> Result<NodeId> {
        let result = self.create_path(path, true);
        trace(FsOperation::CreateDir, path, result)
    }

    /// Lists a directory: `.` and `..` first, then its entries, most recently cached
    /// first. Listing the root creates the activity log if it is missing.
    pub fn readdir(&mut self, id: NodeId) -> Result<Vec<api::DirEntry>> {
        let result = self.list(id);
        let path = self.file(id).map(|f| f.path().to_string()).unwrap_or_default();
        trace(FsOperation::ReadDir, &path, result)
    }

    fn list(&mut self, id: NodeId) -> Result<Vec<api::DirEntry>> {
        self.ensure_children(id)?;
        if id == self.root {
            if let Err(e) = self.ensure_activity_log() {
                warn!("fat32: could not create the activity log: {e}");
            }
        }

        let dot = |name: &str| api::DirEntry { name: name.to_string(), is_dir: true, size: 0 };
        let children = self.cache.flatten_children(id);
        let mut out = Vec::with_capacity(children.len() + 2);
        out.push(dot("."));
        out.push(dot(".."));
        for child in children {
            let f = self.file(child)?;
            if f.is_log() { continue; }
            out.push(api::DirEntry { name: f.name().to_string(), is_dir: f.is_dir(), size: f.size() as u64 });
        }
        Ok(out)
    }

    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let result = self.require_writable()
            .and_then(|_| self.resolve(path))
            .and_then(|id| {
                let file = self.cache.file_mut(id).ok_or(FsError::NotFound)?;
                if file.is_dir() { return Err(FsError::IsDir); }
                file.remove(&mut self.table)?;
                let key = file.path().to_string();
                self.cache.delete(&key);
                Ok(())
            });
        trace(FsOperation::Unlink, path, result)
    }

    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let result = self.require_writable()
            .and_then(|_| self.resolve(path))
            .and_then(|id| {
                if id == self.root {
                    return Err(FsError::InvalidArgument("cannot remove the root"));
                }
                self.ensure_children(id)?;
                if self.cache.children(id).next().is_some() {
                    return Err(FsError::NotEmpty);
                }
                let file = self.cache.file_mut(id).ok_or(FsError::NotFound)?;
                file.remove(&mut self.table)?;
                let key = file.path().to_string();
                self.cache.delete(&key);
                Ok(())
            });
        trace(FsOperation::RemoveDir, path, result)
    }
}

#[cfg(test)]
mod tests {
    use fat_api_types::fs::{FsResult, S_IFDIR, S_IFREG};

    use super::*;
    use crate::device::MemoryDevice;
    use crate::test_image::{fatfs_image, fatfs_with_file, list_via_fatfs, read_via_fatfs, TestImage};
    use crate::volume::MountOptions;

    fn no_log() -> MountOptions {
        MountOptions { activity_log: false, ..MountOptions::default() }
    }

    /// 512-byte sectors, 8 sectors per cluster.
    fn small_volume() -> Volume<MemoryDevice> {
        Volume::mount(TestImage::new(512, 8, 64).device(), no_log()).unwrap()
    }

    fn names(entries: &[api::DirEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len as u32).map(|i| (i ^ 0xAB) as u8).collect()
    }

    // ── files ────────────────────────────────────────────────────────────────

    #[test]
    fn write_truncate_scenario() {
        let mut vol = small_volume();
        vol.mknod("/a.txt").unwrap();
        let id = vol.open("/a.txt").unwrap();
        let data = pattern(10_000);
        assert_eq!(vol.write(id, &data, 0).unwrap(), 10_000);
        let st = vol.getattr("/a.txt").unwrap();
        assert_eq!(st.size, 10_000);
        assert_eq!(st.blocks, 3);

        let mut back = vec![0u8; 10_000];
        assert_eq!(vol.read(id, &mut back, 0).unwrap(), 10_000);
        assert_eq!(back, data);

        let start = vol.file(id).unwrap().start_cluster();
        let chain: Vec<u32> = vol.table().chain(start).collect();
        let free_before = vol.free_clusters();
        vol.truncate("/a.txt", 4096).unwrap();
        assert_eq!(vol.free_clusters(), free_before + 2);
        assert_eq!(vol.table().next_free_cluster().unwrap(), chain[1]);

        let mut back = vec![0u8; 10_000];
        assert_eq!(vol.read(id, &mut back, 0).unwrap(), 4096);
        assert_eq!(&back[..4096], &data[..4096]);
        vol.release(id);
    }

    #[test]
    fn open_counts_pin_ancestors() {
        let mut vol = small_volume();
        vol.mkdir("/d").unwrap();
        vol.mknod("/d/f").unwrap();
        let f = vol.open("/d/f").unwrap();
        let d = vol.resolve("/d").unwrap();
        assert_eq!(vol.file(d).unwrap().open_count(), 1);
        assert_eq!(vol.file(vol.root()).unwrap().open_count(), 1);
        vol.release(f);
        assert_eq!(vol.file(d).unwrap().open_count(), 0);
    }

    #[test]
    fn open_rejects_directories() {
        let mut vol = small_volume();
        vol.mkdir("/d").unwrap();
        assert!(matches!(vol.open("/d"), Err(FsError::IsDir)));
        vol.mknod("/f").unwrap();
        assert!(matches!(vol.opendir("/f"), Err(FsError::NotDir)));
    }

    #[test]
    fn utime_sets_times() {
        let mut vol = small_volume();
        vol.mknod("/t").unwrap();
        // 2001-09-09 01:46:40 UTC
        vol.utime("/t", 1_000_000_000, 1_000_000_000).unwrap();
        let st = vol.getattr("/t").unwrap();
        assert_eq!(st.mtime, 1_000_000_000);
        assert_eq!(st.atime, 999_993_600);
    }

    #[test]
    fn getattr_kinds() {
        let mut vol = small_volume();
        vol.mkdir("/d").unwrap();
        vol.mknod("/d/f").unwrap();
        assert_eq!(vol.getattr("/d").unwrap().mode, S_IFDIR | 0o777);
        assert_eq!(vol.getattr("/d/f").unwrap().mode, S_IFREG | 0o777);
        assert!(vol.getattr("/").unwrap().is_dir());
        let err = vol.getattr("/nope").unwrap_err();
        assert_eq!(FsResult::from(&err).errno(), 2);
    }

    // ── directories ──────────────────────────────────────────────────────────

    #[test]
    fn mkdir_mknod_readdir_rmdir_scenario() {
        let mut vol = small_volume();
        vol.mkdir("/d").unwrap();
        vol.mknod("/d/f").unwrap();
        let d = vol.opendir("/d").unwrap();
        assert_eq!(names(&vol.readdir(d).unwrap()), [".", "..", "f"]);
        vol.releasedir(d);
        assert!(matches!(vol.rmdir("/d"), Err(FsError::NotEmpty)));

        vol.unlink("/d/f").unwrap();
        vol.rmdir("/d").unwrap();
        assert!(matches!(vol.resolve("/d"), Err(FsError::NotFound)));
        let root = vol.root();
        assert_eq!(names(&vol.readdir(root).unwrap()), [".", ".."]);
    }

    #[test]
    fn directory_tree_survives_remount() {
        let mut vol = small_volume();
        vol.mkdir("/d").unwrap();
        vol.mkdir("/d/e").unwrap();
        let f = vol.mknod("/d/e/f.bin").unwrap();
        vol.write(f, b"nested", 0).unwrap();

        let mut vol = Volume::mount(vol.unmount().unwrap(), no_log()).unwrap();
        let f = vol.open("/d/e/f.bin").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(vol.read(f, &mut buf, 0).unwrap(), 6);
        assert_eq!(&buf[..6], b"nested");
        let e = vol.resolve("/d/e").unwrap();
        assert_eq!(names(&vol.readdir(e).unwrap()), [".", "..", "f.bin"]);
    }

    #[test]
    fn unlink_and_rmdir_type_checks() {
        let mut vol = small_volume();
        vol.mkdir("/d").unwrap();
        vol.mknod("/f").unwrap();
        assert!(matches!(vol.unlink("/d"), Err(FsError::IsDir)));
        assert!(matches!(vol.rmdir("/f"), Err(FsError::NotDir)));
        assert!(matches!(vol.rmdir("/"), Err(FsError::InvalidArgument(_))));
    }

    #[test]
    fn unlink_frees_clusters() {
        let mut vol = small_volume();
        let free = vol.free_clusters();
        let f = vol.mknod("/big").unwrap();
        vol.write(f, &pattern(9000), 0).unwrap();
        assert_eq!(vol.free_clusters(), free - 3);
        vol.unlink("/big").unwrap();
        assert_eq!(vol.free_clusters(), free);
        assert!(matches!(vol.getattr("/big"), Err(FsError::NotFound)));
    }

    #[test]
    fn create_errors() {
        let mut vol = small_volume();
        vol.mknod("/x").unwrap();
        assert!(matches!(vol.mknod("/x"), Err(FsError::Exists)));
        assert!(matches!(vol.mkdir("/x"), Err(FsError::Exists)));
        assert!(matches!(vol.mknod("/toolongname.txt"), Err(FsError::InvalidArgument(_))));
        assert!(matches!(vol.mknod("/a.b.c"), Err(FsError::InvalidArgument(_))));
        assert!(matches!(vol.mknod("/missing/f"), Err(FsError::NotFound)));
        assert!(matches!(vol.mknod("/x/f"), Err(FsError::NotDir)));
    }

    #[test]
    fn trailing_dot_names_are_rejected() {
        let mut vol = small_volume();
        assert!(matches!(vol.mknod("/abc."), Err(FsError::InvalidArgument(_))));
        assert!(matches!(vol.mkdir("/abc."), Err(FsError::InvalidArgument(_))));
        vol.mknod("/abc").unwrap();
        assert!(matches!(vol.mknod("/abc"), Err(FsError::Exists)));

        let mut vol = Volume::mount(vol.unmount().unwrap(), no_log()).unwrap();
        let root = vol.root();
        assert_eq!(names(&vol.readdir(root).unwrap()), [".", "..", "abc"]);
    }

    // ── activity log ─────────────────────────────────────────────────────────

    #[test]
    fn root_listing_creates_hidden_log() {
        let mut vol = Volume::mount(TestImage::new(512, 8, 64).device(), MountOptions::default()).unwrap();
        let root = vol.root();
        assert_eq!(names(&vol.readdir(root).unwrap()), [".", ".."]);
        let log = vol.resolve("/fs.log").unwrap();
        assert!(vol.file(log).unwrap().is_log());
        assert_eq!(vol.file(log).unwrap().size(), 0);
    }

    #[test]
    fn reads_and_writes_are_logged() {
        let mut vol = Volume::mount(TestImage::new(512, 8, 64).device(), MountOptions::default()).unwrap();
        let f = vol.mknod("/notes.txt").unwrap();
        vol.write(f, b"hello", 0).unwrap();
        let mut buf = [0u8; 5];
        vol.read(f, &mut buf, 0).unwrap();

        let log = vol.open("/fs.log").unwrap();
        let size = vol.file(log).unwrap().size() as usize;
        let mut text = vec![0u8; size];
        vol.read(log, &mut text, 0).unwrap();
        let text = String::from_utf8(text).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("\t/notes.txt\twrite"));
        assert!(lines[1].ends_with("\t/notes.txt\tread"));
        // Reading the log itself added nothing.
        assert_eq!(vol.file(log).unwrap().size() as usize, size);
    }

    #[test]
    fn removed_log_shaped_file_does_not_share_clusters() {
        let mut vol = small_volume();
        let f = vol.mknod("/xs.log").unwrap();
        vol.write(f, &pattern(100), 0).unwrap();
        vol.release(f);
        vol.unlink("/xs.log").unwrap();

        let mut vol = Volume::mount(vol.unmount().unwrap(), MountOptions::default()).unwrap();
        let root = vol.root();
        vol.readdir(root).unwrap();
        let victim = vol.mknod("/victim.txt").unwrap();
        vol.write(victim, &[b'V'; 100], 0).unwrap();

        let log = vol.resolve("/fs.log").unwrap();
        assert_ne!(vol.file(log).unwrap().start_cluster(), vol.file(victim).unwrap().start_cluster());
        let mut buf = [0u8; 100];
        assert_eq!(vol.read(victim, &mut buf, 0).unwrap(), 100);
        assert_eq!(buf, [b'V'; 100]);
    }

    // ── read-only mounts ─────────────────────────────────────────────────────

    #[test]
    fn read_only_mount_refuses_mutation() {
        let mut disk = fatfs_with_file("DATA.BIN", b"payload");
        let before = disk.0.clone();
        let mut vol = Volume::mount(disk, MountOptions::read_only()).unwrap();

        let id = vol.open("/DATA.BIN").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(vol.read(id, &mut buf, 0).unwrap(), 7);
        assert!(matches!(vol.write(id, b"x", 0), Err(FsError::ReadOnly)));
        assert!(matches!(vol.truncate("/DATA.BIN", 0), Err(FsError::ReadOnly)));
        assert!(matches!(vol.utime("/DATA.BIN", 0, 0), Err(FsError::ReadOnly)));
        assert!(matches!(vol.mknod("/NEW"), Err(FsError::ReadOnly)));
        assert!(matches!(vol.mkdir("/NEW"), Err(FsError::ReadOnly)));
        assert!(matches!(vol.unlink("/DATA.BIN"), Err(FsError::ReadOnly)));
        assert!(matches!(vol.rmdir("/DATA.BIN"), Err(FsError::ReadOnly)));
        let root = vol.root();
        vol.readdir(root).unwrap();

        disk = vol.unmount().unwrap();
        assert!(disk.0 == before, "read-only mount modified the image");
    }

    // ── fatfs interoperability ───────────────────────────────────────────────

    #[test]
    fn reads_file_written_by_fatfs() {
        let content = pattern(10_000);
        let mut vol = Volume::mount(fatfs_with_file("MULTI.BIN", &content), no_log()).unwrap();
        let id = vol.open("/MULTI.BIN").unwrap();
        let mut buf = vec![0u8; content.len()];
        assert_eq!(vol.read(id, &mut buf, 0).unwrap(), content.len());
        assert_eq!(buf, content);
    }

    #[test]
    fn fatfs_reads_what_we_write() {
        let content = pattern(8192);
        let mut vol = Volume::mount(fatfs_image(), no_log()).unwrap();
        vol.mkdir("/SUB").unwrap();
        let f = vol.mknod("/SUB/OUT.BIN").unwrap();
        vol.write(f, &content, 0).unwrap();
        let g = vol.mknod("/TOP.TXT").unwrap();
        vol.write(g, b"top level", 0).unwrap();

        let mut disk = vol.unmount().unwrap();
        assert_eq!(read_via_fatfs(&mut disk, "SUB/OUT.BIN"), content);
        assert_eq!(read_via_fatfs(&mut disk, "TOP.TXT"), b"top level");
        let mut root = list_via_fatfs(&mut disk, "");
        root.sort();
        assert_eq!(root, ["SUB", "TOP.TXT"]);
        assert_eq!(list_via_fatfs(&mut disk, "SUB"), ["OUT.BIN"]);
    }

    #[test]
    fn fatfs_skips_the_activity_log() {
        let mut vol = Volume::mount(fatfs_image(), MountOptions::default()).unwrap();
        let f = vol.mknod("/SEEN.TXT").unwrap();
        vol.write(f, b"x", 0).unwrap();
        let mut disk = vol.unmount().unwrap();
        assert_eq!(list_via_fatfs(&mut disk, ""), ["SEEN.TXT"]);
    }

    #[test]
    fn overwrite_file_created_by_fatfs() {
        let mut vol = Volume::mount(fatfs_with_file("OVER.TXT", b"original"), no_log()).unwrap();
        let id = vol.open("/OVER.TXT").unwrap();
        vol.write(id, b"replaced", 0).unwrap();
        vol.release(id);
        let mut disk = vol.unmount().unwrap();
        assert_eq!(read_via_fatfs(&mut disk, "OVER.TXT"), b"replaced");
    }
}
