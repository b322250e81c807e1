pub const BLOCK_SIZE: usize = 512;
pub const INODE_SIZE: usize = 32;
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;
pub const DIRECT_POINTERS: usize = 11;
pub const POINTERS_PER_INDEX: usize = BLOCK_SIZE / 2;
pub const MAX_NAME_LENGTH: usize = 30;
// Two bytes reserved per name character in the directory payload.
pub const NAME_SLOT_SIZE: usize = MAX_NAME_LENGTH * 2;

// Inode slots start right after the superblock.
pub const INODE_REGION_START: i32 = 1;

pub const NULL_POINTER: i16 = -1;

pub type BlockPointer = i16;
pub type InodePointer = i16;
