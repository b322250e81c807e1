use crate::consts::{InodePointer, MAX_NAME_LENGTH, NAME_SLOT_SIZE};
use crate::error::FsError;

/// The single flat namespace: filename to inode number, ordered by inode
/// number. Slot 0 is pinned to the root entry "/", under which the
/// serialized form of this table is stored as a regular file.
///
/// A slot with size 0 is unallocated; its name is meaningless.
pub struct Directory {
    sizes: Vec<i32>,
    names: Vec<String>,
}

impl Directory {
    pub fn new(max_inodes: usize) -> Directory {
        let mut directory = Directory {
            sizes: vec![0; max_inodes],
            names: vec![String::new(); max_inodes],
        };
        directory.sizes[0] = 1;
        directory.names[0] = "/".to_string();
        directory
    }

    pub fn capacity(&self) -> usize {
        self.sizes.len()
    }

    /// Binds `name` to the first free slot and returns its inode number.
    pub fn allocate(&mut self, name: &str) -> Result<InodePointer, FsError> {
        let name = truncate_name(name);
        for i in 1..self.sizes.len() {
            if self.sizes[i] != 0 {
                continue;
            }
            self.sizes[i] = name.chars().count() as i32;
            self.names[i] = name;
            return Ok(i as InodePointer);
        }
        Err(FsError::DirectoryFull)
    }

    /// Clears the slot for `inum`; false if it was already free.
    pub fn free(&mut self, inum: InodePointer) -> bool {
        if self.sizes[inum as usize] > 0 {
            self.sizes[inum as usize] = 0;
            self.names[inum as usize].clear();
            return true;
        }
        false
    }

    pub fn lookup(&self, name: &str) -> Option<InodePointer> {
        if name == "/" {
            return Some(0);
        }
        let length = name.chars().count() as i32;
        for i in 0..self.sizes.len() {
            if self.sizes[i] == length && self.names[i] == name {
                return Some(i as InodePointer);
            }
        }
        None
    }

    /// Serialized payload of the root file: every size field, then every
    /// fixed-width name slot.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.sizes.len() * (4 + NAME_SLOT_SIZE));
        for size in &self.sizes {
            bytes.extend_from_slice(&size.to_le_bytes());
        }
        for name in &self.names {
            let mut slot = [0u8; NAME_SLOT_SIZE];
            let raw = name.as_bytes();
            let take = raw.len().min(NAME_SLOT_SIZE);
            slot[..take].copy_from_slice(&raw[..take]);
            bytes.extend_from_slice(&slot);
        }
        bytes
    }

    /// Rebuilds the table from a payload read out of the root file.
    pub fn from_bytes(&mut self, data: &[u8]) {
        let count = self.sizes.len();
        for i in 0..count {
            self.sizes[i] = i32::from_le_bytes(data[i * 4..i * 4 + 4].try_into().unwrap());
        }
        let mut offset = count * 4;
        for i in 0..count {
            let slot = &data[offset..offset + NAME_SLOT_SIZE];
            let end = slot.iter().position(|&b| b == 0).unwrap_or(NAME_SLOT_SIZE);
            let decoded = String::from_utf8_lossy(&slot[..end]);
            self.names[i] = decoded.chars().take(self.sizes[i] as usize).collect();
            offset += NAME_SLOT_SIZE;
        }
    }
}

/// Caps a name at 30 characters, and further at whatever fits the 60-byte
/// slot once UTF-8 encoded, so a stored name always survives the trip
/// through `to_bytes`.
fn truncate_name(name: &str) -> String {
    let mut truncated = String::new();
    for c in name.chars().take(MAX_NAME_LENGTH) {
        if truncated.len() + c.len_utf8() > NAME_SLOT_SIZE {
            break;
        }
        truncated.push(c);
    }
    truncated
}
