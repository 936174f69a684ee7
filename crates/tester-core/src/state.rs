//! Stores shared between the link thread and control surfaces
//!
//! The link thread and any control surface (RAM poke, snapshot editor, state
//! load/save) hold the same [`TesterState`]. Each lock covers one operation.

use std::path::Path;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::memory::EcuMemory;
use crate::persist::{self, PersistError};
use crate::vfs::{FileTree, VirtualFs};

#[derive(Debug, Default)]
pub struct TesterState {
    memory: Mutex<EcuMemory>,
    fs: Mutex<VirtualFs>,
}

impl TesterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tree(tree: FileTree) -> Self {
        Self {
            memory: Mutex::new(EcuMemory::new()),
            fs: Mutex::new(VirtualFs::from_tree(tree)),
        }
    }

    /// Run `f` with the ECU memory locked.
    pub fn with_memory<R>(&self, f: impl FnOnce(&mut EcuMemory) -> R) -> R {
        f(&mut self.memory.lock())
    }

    /// Run `f` with the filesystem locked.
    pub fn with_fs<R>(&self, f: impl FnOnce(&mut VirtualFs) -> R) -> R {
        f(&mut self.fs.lock())
    }

    // -------------------------------------------------------------------------
    // Memory accessors
    // -------------------------------------------------------------------------

    pub fn poke_ram(&self, addr: u16, value: u8) {
        self.memory.lock().poke_ram(addr, value);
    }

    pub fn peek_ram(&self, addr: u16) -> Option<u8> {
        self.memory.lock().peek_ram(addr)
    }

    pub fn set_value(&self, code: u8, value: u32) {
        self.memory.lock().set_value(code, value);
    }

    /// Contents of a snapshot buffer, created or padded on access.
    pub fn snapshot(&self, index: u8) -> Vec<u8> {
        self.memory.lock().snapshot(index).to_vec()
    }

    pub fn set_snapshot(&self, index: u8, content: Vec<u8>) {
        self.memory.lock().set_snapshot(index, content);
    }

    pub fn snapshot_indices(&self) -> Vec<u8> {
        self.memory.lock().snapshot_indices()
    }

    pub fn error_memory(&self) -> Vec<u8> {
        self.memory.lock().error_memory().to_vec()
    }

    pub fn set_error_memory(&self, content: Vec<u8>) {
        self.memory.lock().set_error_memory(content);
    }

    // -------------------------------------------------------------------------
    // Filesystem
    // -------------------------------------------------------------------------

    /// Copy of the whole file tree.
    pub fn file_tree(&self) -> FileTree {
        self.fs.lock().tree().clone()
    }

    /// Forget the file and listing cursors of a finished or starting
    /// connection.
    pub fn reset_session(&self) {
        if let Some(path) = self.fs.lock().reset_session() {
            debug!(file = %path, "Closed file left open by the previous session");
        }
    }

    /// Write the file tree to `path`. The copy is taken under the lock, the
    /// write happens outside it.
    pub fn save_state(&self, path: &Path) -> Result<(), PersistError> {
        let tree = self.file_tree();
        persist::save(&tree, path)?;
        info!(path = %path.display(), directories = tree.len(), "Saved filesystem state");
        Ok(())
    }

    /// Replace the file tree with the one stored at `path`. Refused while a
    /// file is open.
    pub fn load_state(&self, path: &Path) -> Result<(), PersistError> {
        let tree = persist::load(path)?;
        let directories = tree.len();
        self.fs.lock().replace_tree(tree)?;
        info!(path = %path.display(), directories, "Loaded filesystem state");
        Ok(())
    }
}
