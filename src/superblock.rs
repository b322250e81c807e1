use log::{debug, warn};

use crate::consts::{BlockPointer, BLOCK_SIZE, INODE_SIZE};
use crate::driver::DeviceDriver;
use crate::error::FsError;
use crate::inode::Inode;
use crate::io::IO;

const DEFAULT_INODE_COUNT: i32 = 64;

/// Block 0 of the volume: total block count, how many inodes the inode
/// region holds, and the head of the free-block list.
///
/// The free list is threaded through the free blocks themselves: the first
/// 4 bytes of a free block name the next free block, -1 terminates.
#[derive(Debug, PartialEq)]
pub struct SuperBlock {
    pub total_blocks: i32,
    pub inode_count: i32,
    pub free_list: i32,
}

impl SuperBlock {
    /// Loads the superblock, falling back to a default format when the
    /// on-disk record does not match the device.
    pub fn read<D: DeviceDriver>(io: &IO<D>) -> Result<SuperBlock, FsError> {
        let buffer = io.read_block(0)?;
        let total_blocks = i32::from_le_bytes(buffer[0..4].try_into().unwrap());
        let inode_count = i32::from_le_bytes(buffer[4..8].try_into().unwrap());
        let free_list = i32::from_le_bytes(buffer[8..12].try_into().unwrap());

        let device_blocks = io.get_block_count() as i32;
        let mut superblock = SuperBlock { total_blocks, inode_count, free_list };

        if total_blocks == device_blocks && inode_count > 0 && free_list >= 2 {
            return Ok(superblock);
        }

        warn!("superblock invalid, default format( {} )", DEFAULT_INODE_COUNT);
        superblock.total_blocks = device_blocks;
        superblock.format(io, DEFAULT_INODE_COUNT)?;
        Ok(superblock)
    }

    /// Resets the inode region to `inode_count` blank inodes and rebuilds
    /// the free list over all remaining blocks.
    pub fn format<D: DeviceDriver>(
        &mut self,
        io: &IO<D>,
        inode_count: i32,
    ) -> Result<(), FsError> {
        self.inode_count = inode_count;

        for inum in 0..inode_count {
            Inode::new().to_disk(io, inum as i16)?;
        }

        // The region after the superblock holds the inode slots; the free
        // pool starts past it.
        let first_free = 2 + inode_count * INODE_SIZE as i32 / BLOCK_SIZE as i32;
        if first_free >= self.total_blocks {
            self.free_list = -1;
            self.sync(io)?;
            return Ok(());
        }

        for block in first_free..self.total_blocks {
            let next = if block + 1 < self.total_blocks { block + 1 } else { -1 };
            let mut buffer = vec![0u8; BLOCK_SIZE];
            buffer[0..4].copy_from_slice(&next.to_le_bytes());
            io.write_block(block, &buffer)?;
        }

        self.free_list = first_free;
        self.sync(io)
    }

    /// Pops the head of the free list, or `None` when the pool is empty.
    pub fn allocate<D: DeviceDriver>(
        &mut self,
        io: &IO<D>,
    ) -> Result<Option<BlockPointer>, FsError> {
        if self.free_list == -1 {
            return Ok(None);
        }

        let index = self.free_list;
        let mut buffer = io.read_block(index)?;
        self.free_list = i32::from_le_bytes(buffer[0..4].try_into().unwrap());
        buffer[0..4].copy_from_slice(&0i32.to_le_bytes());
        io.write_block(index, &buffer)?;

        debug!("allocated block {}, free list head now {}", index, self.free_list);
        Ok(Some(index as BlockPointer))
    }

    /// Pushes a block back as the new free-list head. Negative block
    /// numbers are rejected.
    pub fn free<D: DeviceDriver>(
        &mut self,
        io: &IO<D>,
        block: BlockPointer,
    ) -> Result<bool, FsError> {
        if block < 0 {
            return Ok(false);
        }

        let mut buffer = vec![0u8; BLOCK_SIZE];
        buffer[0..4].copy_from_slice(&self.free_list.to_le_bytes());
        io.write_block(block as i32, &buffer)?;
        self.free_list = block as i32;
        Ok(true)
    }

    pub fn sync<D: DeviceDriver>(&self, io: &IO<D>) -> Result<(), FsError> {
        let mut buffer = vec![0u8; BLOCK_SIZE];
        buffer[0..4].copy_from_slice(&self.total_blocks.to_le_bytes());
        buffer[4..8].copy_from_slice(&self.inode_count.to_le_bytes());
        buffer[8..12].copy_from_slice(&self.free_list.to_le_bytes());
        io.write_block(0, &buffer)?;
        debug!("superblock synchronized");
        Ok(())
    }
}
