//! A FAT32 volume driver over any positioned block device.
//!
//! [`Volume`] mounts an image, caches the directory tree it touches in a path-keyed
//! [`hierarchy_tree::HierarchyTree`], and serves path- and handle-addressed requests
//! (`getattr`, `read`, `write`, `mkdir`, ...). Failures come back as [`FsError`], which
//! converts to the shared `fat_api_types::fs::FsResult` codes.

pub mod activity_log;
pub mod device;
pub mod error;
pub mod file;
pub mod hierarchy_tree;
pub mod layout;
pub mod logger;
pub mod path_cache;
mod requests;
pub mod table;
pub mod time;
pub mod volume;

#[cfg(test)]
mod test_image;

pub use device::{BlockDevice, MemoryDevice};
pub use error::{FsError, Result};
pub use hierarchy_tree::NodeId;
pub use volume::{MountMode, MountOptions, Volume, VolumeInfo};
