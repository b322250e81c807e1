use std::sync::Mutex;

use crate::consts::BLOCK_SIZE;
use crate::driver::DeviceDriver;
use crate::error::FsError;

/// Bounds-checked block access on top of the device driver.
///
/// The device sits behind a mutex so that handles working on distinct
/// inodes can reach it without any outer lock; block ownership is
/// coordinated by the file table, not here.
pub(crate) struct IO<D: DeviceDriver> {
    device: Mutex<D>,
    block_count: u64,
}

impl<D: DeviceDriver> IO<D> {
    pub fn new(device: D) -> IO<D> {
        let block_count = device.get_block_count();
        IO { device: Mutex::new(device), block_count }
    }

    pub fn get_block_count(&self) -> u64 {
        self.block_count
    }

    pub fn read_block(&self, index: i32) -> Result<Vec<u8>, FsError> {
        self.check_index(index)?;
        let block = self
            .device
            .lock()
            .expect("device lock poisoned")
            .read_block(index as u64)?;
        if block.len() != BLOCK_SIZE {
            return Err(FsError::Corruption(format!(
                "device returned a short block for index {}",
                index
            )));
        }
        Ok(block)
    }

    pub fn write_block(&self, index: i32, data: &[u8]) -> Result<(), FsError> {
        self.check_index(index)?;
        if data.len() != BLOCK_SIZE {
            return Err(FsError::Corruption(format!(
                "block size mismatch on write to index {}",
                index
            )));
        }
        self.device
            .lock()
            .expect("device lock poisoned")
            .write_block(index as u64, data)?;
        Ok(())
    }

    fn check_index(&self, index: i32) -> Result<(), FsError> {
        if index < 0 || index as u64 >= self.block_count {
            return Err(FsError::Corruption(format!(
                "block index {} out of range (device has {} blocks)",
                index, self.block_count
            )));
        }
        Ok(())
    }
}
