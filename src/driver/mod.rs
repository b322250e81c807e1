use std::io;

pub(crate) mod file_drive;

/// Contract of the raw block device: whole 512-byte blocks, indexed from 0.
/// A write-through disk cache with the same contract can be substituted for
/// the drive without the file system noticing.
pub trait DeviceDriver {
    fn get_block_count(&self) -> u64;
    fn read_block(&mut self, index: u64) -> io::Result<Vec<u8>>;
    fn write_block(&mut self, index: u64, data: &[u8]) -> io::Result<()>;
}
