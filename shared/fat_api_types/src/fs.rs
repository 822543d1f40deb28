use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Request kinds accepted by the FAT32 volume.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum FsOperation {
    GetAttr    = 0,
    Open       = 1,
    OpenDir    = 2,
    Read       = 3,
    Write      = 4,
    Truncate   = 5,
    SetTimes   = 6,
    CreateFile = 7,
    CreateDir  = 8,
    ReadDir    = 9,
    Unlink     = 10,
    RemoveDir  = 11,
    Release    = 12,
    ReleaseDir = 13,
}

impl FsOperation {
    /// Lower-case verb used in the activity log and in trace output.
    pub fn as_str(self) -> &'static str {
        match self {
            FsOperation::GetAttr    => "getattr",
            FsOperation::Open       => "open",
            FsOperation::OpenDir    => "opendir",
            FsOperation::Read       => "read",
            FsOperation::Write      => "write",
            FsOperation::Truncate   => "truncate",
            FsOperation::SetTimes   => "utime",
            FsOperation::CreateFile => "mknod",
            FsOperation::CreateDir  => "mkdir",
            FsOperation::ReadDir    => "readdir",
            FsOperation::Unlink     => "unlink",
            FsOperation::RemoveDir  => "rmdir",
            FsOperation::Release    => "release",
            FsOperation::ReleaseDir => "releasedir",
        }
    }
}

/// Result codes returned across the request boundary.
#[repr(u64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum FsResult {
    Ok              = 0,
    NotFound        = 1,
    IsDir           = 2,
    NotDir          = 3,
    NoSpace         = 4,
    IoError         = 5,
    Overflow        = 6,
    InvalidArgument = 7,
    NotEmpty        = 8,
    Exists          = 9,
    ReadOnly        = 10,
}

impl FsResult {
    /// Unknown codes collapse to `IoError`.
    pub fn from_u64(v: u64) -> Self {
        Self::try_from(v).unwrap_or(FsResult::IoError)
    }

    /// POSIX errno for this result (Linux numbering); 0 for `Ok`.
    pub fn errno(self) -> i32 {
        match self {
            FsResult::Ok              => 0,
            FsResult::NotFound        => 2,  // ENOENT
            FsResult::IoError         => 5,  // EIO
            FsResult::Exists          => 17, // EEXIST
            FsResult::NotDir          => 20, // ENOTDIR
            FsResult::IsDir           => 21, // EISDIR
            FsResult::InvalidArgument => 22, // EINVAL
            FsResult::NoSpace         => 28, // ENOSPC
            FsResult::ReadOnly        => 30, // EROFS
            FsResult::NotEmpty        => 39, // ENOTEMPTY
            FsResult::Overflow        => 75, // EOVERFLOW
        }
    }
}

pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;

/// Attributes of one file or directory, as reported by `getattr`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileStat {
    /// File type bits (`S_IFDIR`/`S_IFREG`) plus permission bits.
    pub mode:       u32,
    pub size:       u64,
    /// Clusters in the file's chain.
    pub blocks:     u64,
    pub block_size: u32,
    /// Seconds since the Unix epoch, UTC.
    pub atime:      i64,
    pub mtime:      i64,
    pub ctime:      i64,
}

impl FileStat {
    pub fn is_dir(&self) -> bool { self.mode & S_IFDIR != 0 }
}

/// A single directory listing entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name:   String,
    pub is_dir: bool,
    pub size:   u64,
}
