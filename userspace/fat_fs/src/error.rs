use std::io;

use fat_api_types::fs::FsResult;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("not a directory")]
    NotDir,
    #[error("is a directory")]
    IsDir,
    #[error("directory not empty")]
    NotEmpty,
    #[error("file exists")]
    Exists,
    #[error("no space left on volume")]
    NoSpace,
    #[error("offset past end of file or cluster chain")]
    Overflow,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("volume is mounted read-only")]
    ReadOnly,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = core::result::Result<T, FsError>;

impl FsError {
    /// A transfer that stopped before `expected` bytes without an OS error.
    pub(crate) fn short_transfer(done: usize, expected: usize) -> Self {
        FsError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("short transfer: {done} of {expected} bytes"),
        ))
    }
}

impl From<&FsError> for FsResult {
    fn from(err: &FsError) -> Self {
        match err {
            FsError::NotFound           => FsResult::NotFound,
            FsError::NotDir             => FsResult::NotDir,
            FsError::IsDir              => FsResult::IsDir,
            FsError::NotEmpty           => FsResult::NotEmpty,
            FsError::Exists             => FsResult::Exists,
            FsError::NoSpace            => FsResult::NoSpace,
            FsError::Overflow           => FsResult::Overflow,
            FsError::InvalidArgument(_) => FsResult::InvalidArgument,
            FsError::ReadOnly           => FsResult::ReadOnly,
            FsError::Io(_)              => FsResult::IoError,
        }
    }
}

impl From<FsError> for FsResult {
    fn from(err: FsError) -> Self { FsResult::from(&err) }
}
