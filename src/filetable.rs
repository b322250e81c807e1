use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use log::trace;

use crate::consts::InodePointer;
use crate::directory::Directory;
use crate::driver::DeviceDriver;
use crate::error::FsError;
use crate::inode::{AccessFlag, Inode};
use crate::io::IO;

/// Access mode of an open file. Fixed for the lifetime of the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    /// Write-only; opening truncates the file.
    Write,
    ReadWrite,
    /// Like ReadWrite, but the seek pointer starts at end-of-file.
    Append,
}

impl Mode {
    pub(crate) fn can_read(self) -> bool {
        !matches!(self, Mode::Write | Mode::Append)
    }

    pub(crate) fn can_write(self) -> bool {
        self != Mode::Read
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Mode::Read => "r",
            Mode::Write => "w",
            Mode::ReadWrite => "w+",
            Mode::Append => "a",
        }
    }
}

/// One open instance of a file: its cursor, its in-memory inode, and the
/// number of handles aliasing it. Destroyed when the handle count hits 0.
pub struct FileTableEntry {
    inum: InodePointer,
    mode: Mode,
    state: Mutex<EntryState>,
}

pub(crate) struct EntryState {
    pub seek_ptr: i32,
    pub inode: Inode,
    pub handles: u32,
}

impl FileTableEntry {
    fn new(inum: InodePointer, inode: Inode, mode: Mode) -> FileTableEntry {
        let seek_ptr = if mode == Mode::Append { inode.length } else { 0 };
        FileTableEntry {
            inum,
            mode,
            state: Mutex::new(EntryState { seek_ptr, inode, handles: 1 }),
        }
    }

    pub fn inode_number(&self) -> InodePointer {
        self.inum
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().expect("file table entry lock poisoned")
    }
}

/// An open file, shareable across threads. Every operation on the same
/// handle is serialized by the entry's internal lock.
pub type FileHandle = Arc<FileTableEntry>;

pub(crate) struct TableInner {
    entries: Vec<FileHandle>,
    pub directory: Directory,
}

impl TableInner {
    /// Drops every live entry and swaps in a fresh directory; used by
    /// format.
    pub fn reset(&mut self, directory: Directory) {
        self.entries.clear();
        self.directory = directory;
    }
}

/// The set of all open files plus the per-inode admission state machine.
///
/// Admission and release run inside one critical section; blocked openers
/// park on the condvar and re-derive the inode from disk on every wake, so
/// spurious wakeups only cost a retry.
pub(crate) struct FileTable {
    inner: Mutex<TableInner>,
    wakeup: Condvar,
}

impl FileTable {
    pub fn new(directory: Directory) -> FileTable {
        FileTable {
            inner: Mutex::new(TableInner { entries: Vec::new(), directory }),
            wakeup: Condvar::new(),
        }
    }

    pub fn lock_inner(&self) -> MutexGuard<'_, TableInner> {
        self.inner.lock().expect("file table lock poisoned")
    }

    /// Admits an opener for `name`, blocking until the inode's access
    /// state permits the requested mode. Creates the file for non-read
    /// modes when no directory entry exists.
    pub fn falloc<D: DeviceDriver>(
        &self,
        io: &IO<D>,
        name: &str,
        mode: Mode,
    ) -> Result<FileHandle, FsError> {
        let mut inner = self.lock_inner();

        let (inum, mut inode) = loop {
            let inum = match inner.directory.lookup(name) {
                Some(inum) => inum,
                None => {
                    if mode == Mode::Read {
                        return Err(FsError::NotFound(name.to_string()));
                    }
                    let inum = inner.directory.allocate(name)?;
                    let mut inode = Inode::new();
                    inode.flag = AccessFlag::Active;
                    trace!("created {} as inode {}", name, inum);
                    break (inum, inode);
                }
            };

            let mut inode = Inode::from_disk(io, inum)?;

            if mode == Mode::Read {
                if matches!(inode.flag, AccessFlag::Free | AccessFlag::Idle) {
                    inode.flag = AccessFlag::Idle;
                    break (inum, inode);
                }
            } else {
                match inode.flag {
                    AccessFlag::PendingDeleteFromIdle => {
                        return Err(FsError::PendingDelete(name.to_string()));
                    }
                    AccessFlag::Free | AccessFlag::Writable => {
                        inode.flag = AccessFlag::Active;
                        break (inum, inode);
                    }
                    AccessFlag::Idle => {
                        inode.flag = AccessFlag::PendingDeleteFromIdle;
                        inode.to_disk(io, inum)?;
                    }
                    AccessFlag::Active => {
                        inode.flag = AccessFlag::PendingDeleteFromActive;
                        inode.to_disk(io, inum)?;
                    }
                    AccessFlag::PendingDeleteFromActive => {}
                }
            }

            trace!("opener of {} ({}) waiting, flag {:?}", name, mode.as_str(), inode.flag);
            inner = self.wakeup.wait(inner).expect("file table lock poisoned");
        };

        inode.count += 1;
        inode.to_disk(io, inum)?;

        let entry: FileHandle = Arc::new(FileTableEntry::new(inum, inode, mode));
        inner.entries.push(entry.clone());
        Ok(entry)
    }

    /// Releases an entry and wakes every blocked opener to re-evaluate.
    /// Returns false if the entry was not in the table.
    ///
    /// The share count is re-derived from disk rather than taken from the
    /// entry's private copy, which goes stale as soon as another opener is
    /// admitted. The access state collapses only when the last holder
    /// leaves; until then the flag stays put so remaining holders keep
    /// their admission guarantees.
    pub fn ffree<D: DeviceDriver>(
        &self,
        io: &IO<D>,
        handle: &FileHandle,
    ) -> Result<bool, FsError> {
        let mut inner = self.lock_inner();

        let position = inner.entries.iter().position(|e| Arc::ptr_eq(e, handle));
        let position = match position {
            Some(position) => position,
            None => return Ok(false),
        };
        inner.entries.remove(position);

        let mut inode = Inode::from_disk(io, handle.inum)?;
        inode.count -= 1;
        if inode.count <= 0 {
            inode.count = 0;
            inode.flag = match inode.flag {
                AccessFlag::Idle | AccessFlag::Active => AccessFlag::Free,
                AccessFlag::PendingDeleteFromIdle | AccessFlag::PendingDeleteFromActive => {
                    AccessFlag::Writable
                }
                other => other,
            };
        }
        inode.to_disk(io, handle.inum)?;
        trace!("released inode {}, count {}, flag {:?}", handle.inum, inode.count, inode.flag);

        self.wakeup.notify_all();
        Ok(true)
    }
}
