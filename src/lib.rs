//! A single-volume, user-level file system on a fixed-size raw block device.
//!
//! Files are named byte streams backed by 32-byte inodes with 11 direct
//! block pointers and one indirect block. A flat root directory is itself
//! persisted as a regular file (inode 0, name "/"), and a file table
//! coordinates concurrent openers per inode.

mod consts;
mod directory;
mod driver;
mod error;
mod filetable;
mod fs;
mod inode;
mod io;
mod superblock;

pub use consts::{BlockPointer, InodePointer, BLOCK_SIZE, MAX_NAME_LENGTH};
pub use driver::file_drive::FileDrive;
pub use driver::DeviceDriver;
pub use error::FsError;
pub use filetable::{FileHandle, Mode};
pub use fs::{FileSystem, Whence};
