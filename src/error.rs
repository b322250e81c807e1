use std::io;
use std::os::raw::c_int;

use thiserror::Error;

/// Everything a file system operation can fail with. Contention between
/// openers is never surfaced here; it is resolved by blocking inside the
/// file table.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("file is being deleted: {0}")]
    PendingDelete(String),
    #[error("file is busy: {0}")]
    Busy(String),
    #[error("handle is not registered in the file table")]
    StaleHandle,
    #[error("operation not permitted in mode {0}")]
    ModeViolation(&'static str),
    #[error("directory has no free slots")]
    DirectoryFull,
    #[error("no free blocks left on the device")]
    NoFreeBlocks,
    #[error("file exceeds maximum indexable size")]
    FileTooLarge,
    #[error("seek to {offset} (whence {whence}) is out of range")]
    BadSeek { offset: i32, whence: &'static str },
    #[error("on-disk structure is inconsistent: {0}")]
    Corruption(String),
    #[error("raw device error: {0}")]
    Device(#[from] io::Error),
}

impl FsError {
    /// The errno a shell layer would report for this error.
    pub fn errno(&self) -> c_int {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::PendingDelete(_) => libc::EBUSY,
            FsError::Busy(_) => libc::EBUSY,
            FsError::StaleHandle => libc::EBADF,
            FsError::ModeViolation(_) => libc::EACCES,
            FsError::DirectoryFull => libc::ENOSPC,
            FsError::NoFreeBlocks => libc::ENOSPC,
            FsError::FileTooLarge => libc::EFBIG,
            FsError::BadSeek { .. } => libc::EINVAL,
            FsError::Corruption(_) => libc::EIO,
            FsError::Device(_) => libc::EIO,
        }
    }
}
