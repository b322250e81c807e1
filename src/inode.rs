use log::warn;

use crate::consts::{
    BlockPointer, InodePointer, BLOCK_SIZE, DIRECT_POINTERS, INODES_PER_BLOCK, INODE_REGION_START,
    INODE_SIZE, NULL_POINTER, POINTERS_PER_INDEX,
};
use crate::driver::DeviceDriver;
use crate::error::FsError;
use crate::io::IO;

/// Per-inode access state, persisted in the inode's flag field. The file
/// table drives all transitions; `Writable` is what a release of a
/// pending-delete leaves behind so the queued writer is admitted next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessFlag {
    Free,
    Idle,
    Active,
    Writable,
    PendingDeleteFromIdle,
    PendingDeleteFromActive,
}

impl AccessFlag {
    fn to_disk(self) -> i16 {
        match self {
            AccessFlag::Free => 0,
            AccessFlag::Idle => 1,
            AccessFlag::Active => 2,
            AccessFlag::Writable => 3,
            AccessFlag::PendingDeleteFromIdle => 4,
            AccessFlag::PendingDeleteFromActive => 5,
        }
    }

    fn from_disk(value: i16) -> Result<AccessFlag, FsError> {
        match value {
            0 => Ok(AccessFlag::Free),
            1 => Ok(AccessFlag::Idle),
            2 => Ok(AccessFlag::Active),
            3 => Ok(AccessFlag::Writable),
            4 => Ok(AccessFlag::PendingDeleteFromIdle),
            5 => Ok(AccessFlag::PendingDeleteFromActive),
            _ => Err(FsError::Corruption(format!("unknown access flag {}", value))),
        }
    }
}

/// Outcome of registering a block for a file offset.
#[derive(Debug, PartialEq, Eq)]
pub enum Register {
    Done,
    /// The slot for this offset already points at a block.
    AlreadyRegistered,
    /// A lower direct slot is still empty; direct slots fill in order.
    PriorSlotEmpty,
    /// The offset lands in the indirect range but no index block exists
    /// yet. The caller allocates one and retries.
    NeedsIndexBlock,
}

/// One file's metadata: 32 bytes on disk, 16 to a block, starting right
/// after the superblock. -1 marks an unused pointer.
#[derive(Debug, Clone, PartialEq)]
pub struct Inode {
    pub length: i32,
    pub count: i16,
    pub flag: AccessFlag,
    pub direct: [BlockPointer; DIRECT_POINTERS],
    pub indirect: BlockPointer,
}

impl Inode {
    pub fn new() -> Inode {
        Inode {
            length: 0,
            count: 0,
            flag: AccessFlag::Free,
            direct: [NULL_POINTER; DIRECT_POINTERS],
            indirect: NULL_POINTER,
        }
    }

    #[inline]
    fn slot(inum: InodePointer) -> (i32, usize) {
        let block = INODE_REGION_START + inum as i32 / INODES_PER_BLOCK as i32;
        let offset = (inum as usize % INODES_PER_BLOCK) * INODE_SIZE;
        (block, offset)
    }

    pub fn from_disk<D: DeviceDriver>(
        io: &IO<D>,
        inum: InodePointer,
    ) -> Result<Inode, FsError> {
        let (block, offset) = Inode::slot(inum);
        let buffer = io.read_block(block)?;
        Inode::from_bytes(&buffer[offset..offset + INODE_SIZE])
    }

    pub fn to_disk<D: DeviceDriver>(
        &self,
        io: &IO<D>,
        inum: InodePointer,
    ) -> Result<(), FsError> {
        let (block, offset) = Inode::slot(inum);
        let mut buffer = io.read_block(block)?;
        buffer[offset..offset + INODE_SIZE].copy_from_slice(&self.to_bytes());
        io.write_block(block, &buffer)
    }

    pub fn to_bytes(&self) -> [u8; INODE_SIZE] {
        let mut bytes = [0u8; INODE_SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.count.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.flag.to_disk().to_le_bytes());
        for i in 0..DIRECT_POINTERS {
            bytes[8 + i * 2..10 + i * 2].copy_from_slice(&self.direct[i].to_le_bytes());
        }
        bytes[30..32].copy_from_slice(&self.indirect.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Inode, FsError> {
        let length = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let count = i16::from_le_bytes(bytes[4..6].try_into().unwrap());
        let flag = AccessFlag::from_disk(i16::from_le_bytes(bytes[6..8].try_into().unwrap()))?;
        let mut direct = [NULL_POINTER; DIRECT_POINTERS];
        for (i, slot) in direct.iter_mut().enumerate() {
            *slot = i16::from_le_bytes(bytes[8 + i * 2..10 + i * 2].try_into().unwrap());
        }
        let indirect = i16::from_le_bytes(bytes[30..32].try_into().unwrap());
        Ok(Inode { length, count, flag, direct, indirect })
    }

    /// Translates a byte offset into the physical block holding it, or
    /// `None` if no block is registered there yet.
    pub fn find_target_block<D: DeviceDriver>(
        &self,
        io: &IO<D>,
        offset: i32,
    ) -> Result<Option<BlockPointer>, FsError> {
        let block_index = offset as usize / BLOCK_SIZE;

        if block_index < DIRECT_POINTERS {
            let pointer = self.direct[block_index];
            return Ok(if pointer < 0 { None } else { Some(pointer) });
        }

        if self.indirect < 0 {
            return Ok(None);
        }

        let index = block_index - DIRECT_POINTERS;
        if index >= POINTERS_PER_INDEX {
            return Ok(None);
        }

        let buffer = io.read_block(self.indirect as i32)?;
        let pointer = i16::from_le_bytes(buffer[index * 2..index * 2 + 2].try_into().unwrap());
        Ok(if pointer < 0 { None } else { Some(pointer) })
    }

    /// Binds a freshly allocated block to the slot covering `offset`.
    /// Direct slots must fill low-to-high; a hole means corruption.
    pub fn register_target_block<D: DeviceDriver>(
        &mut self,
        io: &IO<D>,
        offset: i32,
        block: BlockPointer,
    ) -> Result<Register, FsError> {
        let block_index = offset as usize / BLOCK_SIZE;

        if block_index < DIRECT_POINTERS {
            if self.direct[block_index] >= 0 {
                return Ok(Register::AlreadyRegistered);
            }
            if block_index > 0 && self.direct[block_index - 1] == NULL_POINTER {
                return Ok(Register::PriorSlotEmpty);
            }
            self.direct[block_index] = block;
            return Ok(Register::Done);
        }

        if self.indirect < 0 {
            return Ok(Register::NeedsIndexBlock);
        }

        let index = block_index - DIRECT_POINTERS;
        if index >= POINTERS_PER_INDEX {
            return Err(FsError::FileTooLarge);
        }

        let mut buffer = io.read_block(self.indirect as i32)?;
        let current = i16::from_le_bytes(buffer[index * 2..index * 2 + 2].try_into().unwrap());
        if current > 0 {
            warn!("index block slot {} already holds block {}", index, current);
            return Ok(Register::AlreadyRegistered);
        }

        buffer[index * 2..index * 2 + 2].copy_from_slice(&block.to_le_bytes());
        io.write_block(self.indirect as i32, &buffer)?;
        Ok(Register::Done)
    }

    /// Adopts `block` as the index block. Only legal once every direct
    /// slot is filled and no index block is registered yet.
    pub fn register_index_block<D: DeviceDriver>(
        &mut self,
        io: &IO<D>,
        block: BlockPointer,
    ) -> Result<bool, FsError> {
        if self.direct.contains(&NULL_POINTER) {
            return Ok(false);
        }
        if self.indirect != NULL_POINTER {
            return Ok(false);
        }

        self.indirect = block;
        let mut buffer = vec![0u8; BLOCK_SIZE];
        for i in 0..POINTERS_PER_INDEX {
            buffer[i * 2..i * 2 + 2].copy_from_slice(&NULL_POINTER.to_le_bytes());
        }
        io.write_block(block as i32, &buffer)?;
        Ok(true)
    }

    /// Detaches the index block and hands its raw contents to the caller,
    /// who frees the blocks it references.
    pub fn unregister_index_block<D: DeviceDriver>(
        &mut self,
        io: &IO<D>,
    ) -> Result<Option<Vec<u8>>, FsError> {
        if self.indirect < 0 {
            return Ok(None);
        }

        let buffer = io.read_block(self.indirect as i32)?;
        self.indirect = NULL_POINTER;
        Ok(Some(buffer))
    }
}
