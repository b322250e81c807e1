use std::sync::{Mutex, MutexGuard};

use log::error;

use crate::consts::{
    BlockPointer, BLOCK_SIZE, DIRECT_POINTERS, NAME_SLOT_SIZE, NULL_POINTER, POINTERS_PER_INDEX,
};
use crate::directory::Directory;
use crate::driver::DeviceDriver;
use crate::error::FsError;
use crate::filetable::{FileHandle, FileTable, Mode};
use crate::inode::{Inode, Register};
use crate::io::IO;
use crate::superblock::SuperBlock;

/// Reference point for `seek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// The top-level orchestrator: one mounted volume.
///
/// All operations take `&self` and may be called from any number of
/// threads; admission to a file is coordinated by the file table, and
/// operations on one handle serialize on that handle.
pub struct FileSystem<D: DeviceDriver> {
    io: IO<D>,
    superblock: Mutex<SuperBlock>,
    filetable: FileTable,
}

impl<D: DeviceDriver> FileSystem<D> {
    /// Mounts the volume, default-formatting it when the superblock does
    /// not match the device, and rebuilds the directory from the root
    /// file's bytes.
    pub fn mount(device: D) -> Result<FileSystem<D>, FsError> {
        let io = IO::new(device);
        let superblock = SuperBlock::read(&io)?;
        let directory = Directory::new(superblock.inode_count as usize);
        let fs = FileSystem {
            io,
            superblock: Mutex::new(superblock),
            filetable: FileTable::new(directory),
        };

        let root = fs.open("/", Mode::Read)?;
        let size = fs.size(&root) as usize;
        if size > 0 {
            let inner = fs.filetable.lock_inner();
            let expected = inner.directory.capacity() * (4 + NAME_SLOT_SIZE);
            if size < expected {
                drop(inner);
                fs.close(root)?;
                return Err(FsError::Corruption(format!(
                    "root file holds {} bytes, directory needs {}",
                    size, expected
                )));
            }
            drop(inner);

            let mut buffer = vec![0u8; size];
            fs.read(&root, &mut buffer)?;
            fs.filetable.lock_inner().directory.from_bytes(&buffer);
        }
        fs.close(root)?;

        Ok(fs)
    }

    /// Wipes the volume: `max_files` blank inodes, an empty directory, and
    /// an empty file table.
    pub fn format(&self, max_files: i32) -> Result<(), FsError> {
        let mut inner = self.filetable.lock_inner();
        self.lock_superblock().format(&self.io, max_files)?;
        inner.reset(Directory::new(max_files as usize));
        Ok(())
    }

    /// Opens `name`, creating it for non-read modes. `Mode::Write`
    /// truncates the file before the handle is returned.
    pub fn open(&self, name: &str, mode: Mode) -> Result<FileHandle, FsError> {
        let handle = self.filetable.falloc(&self.io, name, mode)?;

        if mode == Mode::Write {
            if let Err(err) = self.deallocate_all_blocks(name, &handle) {
                self.filetable.ffree(&self.io, &handle).ok();
                return Err(err);
            }
        }

        Ok(handle)
    }

    /// Drops one reference to the handle; the last close releases the
    /// entry from the file table.
    pub fn close(&self, handle: FileHandle) -> Result<(), FsError> {
        {
            let mut state = handle.lock_state();
            if state.handles == 0 {
                return Err(FsError::StaleHandle);
            }
            state.handles -= 1;
            if state.handles > 0 {
                return Ok(());
            }
        }

        if self.filetable.ffree(&self.io, &handle)? {
            Ok(())
        } else {
            Err(FsError::StaleHandle)
        }
    }

    /// Registers another reference to an open instance; each duplicate
    /// needs its own matching `close`.
    pub fn duplicate(&self, handle: &FileHandle) -> FileHandle {
        handle.lock_state().handles += 1;
        handle.clone()
    }

    /// Current file length in bytes.
    pub fn size(&self, handle: &FileHandle) -> i32 {
        handle.lock_state().inode.length
    }

    /// Reads up to `buffer.len()` bytes at the seek pointer, advancing it
    /// by the amount copied.
    pub fn read(&self, handle: &FileHandle, buffer: &mut [u8]) -> Result<usize, FsError> {
        if !handle.mode().can_read() {
            return Err(FsError::ModeViolation(handle.mode().as_str()));
        }

        let mut state = handle.lock_state();
        let mut result = 0usize;

        while result < buffer.len() && state.seek_ptr < state.inode.length {
            let target = match state.inode.find_target_block(&self.io, state.seek_ptr)? {
                Some(block) => block,
                None => break,
            };
            let block = self.io.read_block(target as i32)?;

            let start = state.seek_ptr as usize % BLOCK_SIZE;
            let in_block = BLOCK_SIZE - start;
            let in_file = (state.inode.length - state.seek_ptr) as usize;
            let wanted = buffer.len() - result;
            let delta = in_block.min(in_file).min(wanted);

            buffer[result..result + delta].copy_from_slice(&block[start..start + delta]);
            state.seek_ptr += delta as i32;
            result += delta;
        }

        Ok(result)
    }

    /// Writes `buffer` at the seek pointer, allocating blocks on demand
    /// and extending the file length past the previous end.
    pub fn write(&self, handle: &FileHandle, buffer: &[u8]) -> Result<usize, FsError> {
        if !handle.mode().can_write() {
            return Err(FsError::ModeViolation(handle.mode().as_str()));
        }

        let mut state = handle.lock_state();
        let mut written = 0usize;

        while written < buffer.len() {
            let seek = state.seek_ptr;
            let target = match state.inode.find_target_block(&self.io, seek)? {
                Some(block) => block,
                None => {
                    let mut superblock = self.lock_superblock();
                    let fresh = superblock
                        .allocate(&self.io)?
                        .ok_or(FsError::NoFreeBlocks)?;

                    if let Err(err) =
                        self.bind_block(&mut state.inode, &mut superblock, seek, fresh)
                    {
                        superblock.free(&self.io, fresh).ok();
                        return Err(err);
                    }

                    fresh
                }
            };

            let mut block = self.io.read_block(target as i32)?;
            let start = seek as usize % BLOCK_SIZE;
            let delta = (BLOCK_SIZE - start).min(buffer.len() - written);

            block[start..start + delta].copy_from_slice(&buffer[written..written + delta]);
            self.io.write_block(target as i32, &block)?;

            state.seek_ptr += delta as i32;
            written += delta;
            if state.seek_ptr > state.inode.length {
                state.inode.length = state.seek_ptr;
            }
        }

        state.inode.to_disk(&self.io, handle.inode_number())?;
        Ok(written)
    }

    /// Moves the seek pointer. SET and CUR reject targets outside
    /// `[0, length]`; END clamps into that range instead of rejecting,
    /// preserving the historical asymmetry between the three.
    pub fn seek(&self, handle: &FileHandle, offset: i32, whence: Whence) -> Result<i32, FsError> {
        let mut state = handle.lock_state();
        let length = state.inode.length;

        match whence {
            Whence::Set => {
                if offset < 0 || offset > length {
                    return Err(FsError::BadSeek { offset, whence: "SET" });
                }
                state.seek_ptr = offset;
            }
            Whence::Cur => {
                let target = state.seek_ptr as i64 + offset as i64;
                if target < 0 || target > length as i64 {
                    return Err(FsError::BadSeek { offset, whence: "CUR" });
                }
                state.seek_ptr = target as i32;
            }
            Whence::End => {
                let target = length as i64 + offset as i64;
                state.seek_ptr = target.clamp(0, length as i64) as i32;
            }
        }

        Ok(state.seek_ptr)
    }

    /// Removes `name` from the directory, going through the write-open
    /// path so deletion waits its turn behind current holders.
    pub fn delete(&self, name: &str) -> Result<(), FsError> {
        let handle = self.open(name, Mode::Write)?;
        let inum = handle.inode_number();

        let freed = self.filetable.lock_inner().directory.free(inum);
        if freed {
            self.close(handle)
        } else {
            self.close(handle).ok();
            Err(FsError::NotFound(name.to_string()))
        }
    }

    /// Persists the directory into the root file and flushes allocator
    /// metadata. The one explicit consistency point of the volume.
    pub fn sync(&self) -> Result<(), FsError> {
        let handle = self.open("/", Mode::Write)?;
        let bytes = self.filetable.lock_inner().directory.to_bytes();
        self.write(&handle, &bytes)?;
        self.close(handle)?;
        self.lock_superblock().sync(&self.io)
    }

    /// Registers `fresh` as the block covering `seek`, adopting an index
    /// block first when the offset lands past the direct range. Any block
    /// allocated here but not adopted goes back to the pool before the
    /// error surfaces.
    fn bind_block(
        &self,
        inode: &mut Inode,
        superblock: &mut SuperBlock,
        seek: i32,
        fresh: BlockPointer,
    ) -> Result<(), FsError> {
        match inode.register_target_block(&self.io, seek, fresh)? {
            Register::Done => Ok(()),
            Register::AlreadyRegistered | Register::PriorSlotEmpty => {
                error!("filesystem panic on write");
                Err(FsError::Corruption(
                    "inconsistent block registration during write".to_string(),
                ))
            }
            Register::NeedsIndexBlock => {
                let index = superblock
                    .allocate(&self.io)?
                    .ok_or(FsError::NoFreeBlocks)?;
                if !inode.register_index_block(&self.io, index)? {
                    superblock.free(&self.io, index).ok();
                    error!("filesystem panic on write");
                    return Err(FsError::Corruption(
                        "could not adopt an index block".to_string(),
                    ));
                }
                if inode.register_target_block(&self.io, seek, fresh)? != Register::Done {
                    error!("filesystem panic on write");
                    return Err(FsError::Corruption(
                        "index block slot taken right after adoption".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Returns every block the inode owns to the free pool. Only legal
    /// while this entry is the sole holder of the inode.
    fn deallocate_all_blocks(&self, name: &str, handle: &FileHandle) -> Result<(), FsError> {
        let mut state = handle.lock_state();
        if state.inode.count != 1 {
            return Err(FsError::Busy(name.to_string()));
        }

        let mut superblock = self.lock_superblock();

        let index_block = state.inode.indirect;
        if let Some(contents) = state.inode.unregister_index_block(&self.io)? {
            for i in 0..POINTERS_PER_INDEX {
                let pointer = i16::from_le_bytes([contents[i * 2], contents[i * 2 + 1]]);
                if pointer > 0 {
                    superblock.free(&self.io, pointer)?;
                }
            }
            superblock.free(&self.io, index_block)?;
        }

        for i in 0..DIRECT_POINTERS {
            if state.inode.direct[i] != NULL_POINTER {
                superblock.free(&self.io, state.inode.direct[i])?;
                state.inode.direct[i] = NULL_POINTER;
            }
        }

        state.inode.length = 0;
        state.inode.to_disk(&self.io, handle.inode_number())
    }

    fn lock_superblock(&self) -> MutexGuard<'_, SuperBlock> {
        self.superblock.lock().expect("superblock lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::{FileSystem, Whence};
    use crate::driver::file_drive::FileDrive;
    use crate::error::FsError;
    use crate::filetable::Mode;

    fn fresh_fs(path: &str, blocks: u64, max_files: i32) -> FileSystem<FileDrive> {
        let fs = FileSystem::mount(FileDrive::new(path, blocks)).unwrap();
        fs.format(max_files).unwrap();
        fs
    }

    #[test]
    fn write_then_read_single_block() {
        let fs = fresh_fs("./test-images/fs_single_block.img", 1024, 32);

        let handle = fs.open("greeting", Mode::ReadWrite).unwrap();
        assert_eq!(fs.write(&handle, b"hello world").unwrap(), 11);
        assert_eq!(fs.size(&handle), 11);

        fs.seek(&handle, 0, Whence::Set).unwrap();
        let mut buffer = [0u8; 32];
        assert_eq!(fs.read(&handle, &mut buffer).unwrap(), 11);
        assert_eq!(&buffer[..11], b"hello world");

        fs.close(handle).unwrap();
    }

    #[test]
    fn empty_file_reads_nothing() {
        let fs = fresh_fs("./test-images/fs_empty.img", 1024, 32);

        let handle = fs.open("empty", Mode::ReadWrite).unwrap();
        let mut buffer = [0u8; 8];
        assert_eq!(fs.read(&handle, &mut buffer).unwrap(), 0);
        fs.close(handle).unwrap();
    }

    #[test]
    fn write_spanning_indirect_blocks() {
        let fs = fresh_fs("./test-images/fs_indirect.img", 4096, 32);

        // 14 blocks of payload forces 3 entries into the index block.
        let payload: Vec<u8> = (0..512 * 14).map(|i| (i % 251) as u8).collect();
        let handle = fs.open("big.bin", Mode::ReadWrite).unwrap();
        assert_eq!(fs.write(&handle, &payload).unwrap(), payload.len());
        assert_eq!(fs.size(&handle), payload.len() as i32);

        fs.seek(&handle, 0, Whence::Set).unwrap();
        let mut readback = vec![0u8; payload.len()];
        assert_eq!(fs.read(&handle, &mut readback).unwrap(), payload.len());
        assert_eq!(readback, payload);

        fs.close(handle).unwrap();
    }

    #[test]
    fn overwrite_in_place() {
        let fs = fresh_fs("./test-images/fs_overwrite.img", 1024, 32);

        let handle = fs.open("song", Mode::ReadWrite).unwrap();
        fs.write(&handle, b"hello world").unwrap();
        fs.seek(&handle, 6, Whence::Set).unwrap();
        fs.write(&handle, b"rust!").unwrap();

        fs.seek(&handle, 0, Whence::Set).unwrap();
        let mut buffer = [0u8; 11];
        fs.read(&handle, &mut buffer).unwrap();
        assert_eq!(&buffer, b"hello rust!");
        assert_eq!(fs.size(&handle), 11);

        fs.close(handle).unwrap();
    }

    #[test]
    fn append_positions_at_end() {
        let fs = fresh_fs("./test-images/fs_append.img", 1024, 32);

        let handle = fs.open("log", Mode::ReadWrite).unwrap();
        fs.write(&handle, b"first.").unwrap();
        fs.close(handle).unwrap();

        let appender = fs.open("log", Mode::Append).unwrap();
        fs.write(&appender, b"second.").unwrap();
        fs.close(appender).unwrap();

        let reader = fs.open("log", Mode::Read).unwrap();
        let mut buffer = [0u8; 16];
        assert_eq!(fs.read(&reader, &mut buffer).unwrap(), 13);
        assert_eq!(&buffer[..13], b"first.second.");
        fs.close(reader).unwrap();
    }

    #[test]
    fn mode_violations() {
        let fs = fresh_fs("./test-images/fs_modes.img", 1024, 32);

        let writer = fs.open("a", Mode::Write).unwrap();
        let mut buffer = [0u8; 4];
        assert!(matches!(fs.read(&writer, &mut buffer), Err(FsError::ModeViolation(_))));
        fs.write(&writer, b"data").unwrap();
        fs.close(writer).unwrap();

        let reader = fs.open("a", Mode::Read).unwrap();
        assert!(matches!(fs.write(&reader, b"nope"), Err(FsError::ModeViolation(_))));
        fs.close(reader).unwrap();
    }

    #[test]
    fn read_of_missing_file() {
        let fs = fresh_fs("./test-images/fs_missing.img", 1024, 32);
        assert!(matches!(fs.open("ghost", Mode::Read), Err(FsError::NotFound(_))));
    }

    #[test]
    fn seek_rules() {
        let fs = fresh_fs("./test-images/fs_seek.img", 1024, 32);

        let handle = fs.open("seekme", Mode::ReadWrite).unwrap();
        fs.write(&handle, &[7u8; 100]).unwrap();

        assert!(matches!(
            fs.seek(&handle, -5, Whence::Set),
            Err(FsError::BadSeek { .. })
        ));
        assert!(matches!(
            fs.seek(&handle, 101, Whence::Set),
            Err(FsError::BadSeek { .. })
        ));

        assert_eq!(fs.seek(&handle, 10, Whence::Set).unwrap(), 10);
        assert_eq!(fs.seek(&handle, 0, Whence::Cur).unwrap(), 10);
        assert_eq!(fs.seek(&handle, -10, Whence::Cur).unwrap(), 0);
        assert!(matches!(
            fs.seek(&handle, -1, Whence::Cur),
            Err(FsError::BadSeek { .. })
        ));

        // END never rejects; it clamps into range.
        assert_eq!(fs.seek(&handle, 100, Whence::End).unwrap(), 100);
        assert_eq!(fs.seek(&handle, 0, Whence::End).unwrap(), 100);
        assert_eq!(fs.seek(&handle, -30, Whence::End).unwrap(), 70);
        assert_eq!(fs.seek(&handle, -500, Whence::End).unwrap(), 0);

        fs.close(handle).unwrap();
    }

    #[test]
    fn write_open_succeeds_after_shared_readers() {
        let fs = fresh_fs("./test-images/fs_shared_readers.img", 1024, 32);

        let handle = fs.open("victim", Mode::Write).unwrap();
        fs.write(&handle, b"shared bytes").unwrap();
        fs.close(handle).unwrap();

        let first = fs.open("victim", Mode::Read).unwrap();
        let second = fs.open("victim", Mode::Read).unwrap();
        fs.close(first).unwrap();
        fs.close(second).unwrap();

        // With no readers left the truncating open goes through.
        let handle = fs.open("victim", Mode::Write).unwrap();
        assert_eq!(fs.size(&handle), 0);
        fs.close(handle).unwrap();

        fs.delete("victim").unwrap();
    }

    #[test]
    fn truncate_on_write_open_returns_blocks() {
        // Small pool: writing the file twice only fits if truncation
        // returned the first generation of blocks.
        let fs = fresh_fs("./test-images/fs_truncate.img", 17, 16);

        let payload = [3u8; 512 * 10];
        let handle = fs.open("fat", Mode::Write).unwrap();
        fs.write(&handle, &payload).unwrap();
        fs.close(handle).unwrap();

        let handle = fs.open("fat", Mode::Write).unwrap();
        assert_eq!(fs.size(&handle), 0);
        assert_eq!(fs.write(&handle, &payload).unwrap(), payload.len());
        fs.close(handle).unwrap();
    }

    #[test]
    fn write_fails_when_pool_is_exhausted() {
        let fs = fresh_fs("./test-images/fs_exhausted.img", 8, 16);

        let handle = fs.open("toobig", Mode::Write).unwrap();
        let result = fs.write(&handle, &[1u8; 512 * 20]);
        assert!(matches!(result, Err(FsError::NoFreeBlocks)));
        fs.close(handle).unwrap();
    }

    #[test]
    fn failed_indirect_write_returns_the_data_block() {
        // 12 free blocks: 11 direct plus one the failed write must hand back.
        let fs = fresh_fs("./test-images/fs_failed_indirect.img", 15, 16);

        let handle = fs.open("a", Mode::Write).unwrap();
        fs.write(&handle, &[5u8; 512 * 11]).unwrap();

        // The 12th block needs an index block; the pool can cover the data
        // block but not the index, so the write fails and both go back.
        assert!(matches!(
            fs.write(&handle, &[5u8; 512]),
            Err(FsError::NoFreeBlocks)
        ));
        fs.close(handle).unwrap();

        let other = fs.open("b", Mode::Write).unwrap();
        assert_eq!(fs.write(&other, &[6u8; 512]).unwrap(), 512);
        fs.close(other).unwrap();
    }

    #[test]
    fn delete_removes_the_name() {
        let fs = fresh_fs("./test-images/fs_delete.img", 1024, 32);

        let handle = fs.open("doomed", Mode::Write).unwrap();
        fs.write(&handle, b"short lived").unwrap();
        fs.close(handle).unwrap();

        fs.delete("doomed").unwrap();
        assert!(matches!(fs.open("doomed", Mode::Read), Err(FsError::NotFound(_))));
    }

    #[test]
    fn duplicate_handles_close_independently() {
        let fs = fresh_fs("./test-images/fs_duplicate.img", 1024, 32);

        let handle = fs.open("shared", Mode::ReadWrite).unwrap();
        let twin = fs.duplicate(&handle);

        fs.write(&handle, b"once").unwrap();
        fs.close(handle).unwrap();

        // The entry is still live through the twin.
        assert_eq!(fs.size(&twin), 4);
        fs.close(twin.clone()).unwrap();

        // A third close has nothing left to release.
        assert!(matches!(fs.close(twin), Err(FsError::StaleHandle)));
    }

    #[test]
    fn sync_survives_remount() {
        let path = "./test-images/fs_remount.img";
        {
            let fs = fresh_fs(path, 4096, 64);
            let handle = fs.open("persistent.txt", Mode::Write).unwrap();
            fs.write(&handle, b"still here after remount").unwrap();
            fs.close(handle).unwrap();
            fs.sync().unwrap();
        }

        let fs = FileSystem::mount(FileDrive::open(path).unwrap()).unwrap();
        let handle = fs.open("persistent.txt", Mode::Read).unwrap();
        let mut buffer = [0u8; 64];
        let read = fs.read(&handle, &mut buffer).unwrap();
        assert_eq!(&buffer[..read], b"still here after remount");
        fs.close(handle).unwrap();
    }

    #[test]
    fn second_writer_blocks_until_release() {
        let fs = Arc::new(fresh_fs("./test-images/fs_contention.img", 1024, 32));

        let first = fs.open("contested", Mode::Write).unwrap();
        fs.write(&first, b"held").unwrap();

        let acquired = Arc::new(AtomicBool::new(false));
        let worker = {
            let fs = fs.clone();
            let acquired = acquired.clone();
            thread::spawn(move || {
                let second = fs.open("contested", Mode::Write).unwrap();
                acquired.store(true, Ordering::SeqCst);
                fs.write(&second, b"mine now").unwrap();
                fs.close(second).unwrap();
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!acquired.load(Ordering::SeqCst), "writer was admitted while held");

        fs.close(first).unwrap();
        worker.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));

        let reader = fs.open("contested", Mode::Read).unwrap();
        let mut buffer = [0u8; 16];
        let read = fs.read(&reader, &mut buffer).unwrap();
        assert_eq!(&buffer[..read], b"mine now");
        fs.close(reader).unwrap();
    }

    #[test]
    fn readers_block_writers_until_closed() {
        let fs = Arc::new(fresh_fs("./test-images/fs_reader_writer.img", 1024, 32));

        let setup = fs.open("data", Mode::Write).unwrap();
        fs.write(&setup, b"payload").unwrap();
        fs.close(setup).unwrap();

        let reader = fs.open("data", Mode::Read).unwrap();

        let acquired = Arc::new(AtomicBool::new(false));
        let worker = {
            let fs = fs.clone();
            let acquired = acquired.clone();
            thread::spawn(move || {
                let writer = fs.open("data", Mode::Write).unwrap();
                acquired.store(true, Ordering::SeqCst);
                fs.close(writer).unwrap();
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!acquired.load(Ordering::SeqCst), "writer was admitted past a reader");

        fs.close(reader).unwrap();
        worker.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn format_wipes_the_namespace() {
        let fs = fresh_fs("./test-images/fs_format.img", 1024, 32);

        let handle = fs.open("temp", Mode::Write).unwrap();
        fs.write(&handle, b"bytes").unwrap();
        fs.close(handle).unwrap();

        fs.format(16).unwrap();
        assert!(matches!(fs.open("temp", Mode::Read), Err(FsError::NotFound(_))));
    }
}
