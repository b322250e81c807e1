use std::fs::{File, OpenOptions};
use std::io;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::consts::BLOCK_SIZE;
use crate::driver::DeviceDriver;

/// A drive backed by a plain file. Creating one truncates the image file to
/// the requested geometry, so tests start from a blank device.
pub struct FileDrive {
    file: File,
    block_count: u64,
}

impl FileDrive {
    pub fn new<P: AsRef<Path>>(path: P, block_count: u64) -> FileDrive {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).expect("could not create image directory");
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .expect("could not create image file");
        file.set_len(block_count * BLOCK_SIZE as u64)
            .expect("could not size image file");
        FileDrive { file, block_count }
    }

    /// Reopens an existing image without wiping it.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<FileDrive> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let block_count = file.metadata()?.len() / BLOCK_SIZE as u64;
        Ok(FileDrive { file, block_count })
    }
}

impl DeviceDriver for FileDrive {
    fn get_block_count(&self) -> u64 {
        self.block_count
    }

    fn read_block(&mut self, index: u64) -> io::Result<Vec<u8>> {
        let mut buffer = vec![0u8; BLOCK_SIZE];
        self.file.seek(SeekFrom::Start(index * BLOCK_SIZE as u64))?;
        self.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn write_block(&mut self, index: u64, data: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(index * BLOCK_SIZE as u64))?;
        self.file.write_all(data)
    }
}
