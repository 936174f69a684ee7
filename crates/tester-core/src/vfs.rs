//! Tester flash filesystem
//!
//! A two-level tree (directory → file → bytes) with a single open-file
//! cursor and a directory listing cursor, matching what the PC software
//! drives through the file transfer opcodes.
//!
//! Reads are served in chunks of at most [`CHUNK_SIZE`] bytes. Every chunk is
//! also added column-wise into a [`ChecksumAccumulator`]: byte `i` of each
//! chunk lands in column `i`, so after a transfer the PC can ask for the
//! complemented columns and compare them with its own.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::checksum::complemented_sum;

/// Largest chunk served by one read, and the accumulator width.
pub const CHUNK_SIZE: usize = 110;

/// Directory used for paths without a separator.
pub const ROOT_DIR: &str = "";

pub type Directory = BTreeMap<String, Vec<u8>>;
pub type FileTree = BTreeMap<String, Directory>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("No file is open")]
    NoOpenFile,

    #[error("File {0} is still open")]
    FileOpen(FilePath),
}

/// Split a Tester path at its last `/` into directory and file name.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(pos) => (&path[..pos], &path[pos + 1..]),
        None => (ROOT_DIR, path),
    }
}

/// Decode a path payload: bytes up to the first NUL, lossily as UTF-8.
pub fn path_from_payload(payload: &[u8]) -> String {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePath {
    pub dir: String,
    pub name: String,
}

impl FilePath {
    pub fn parse(path: &str) -> Self {
        let (dir, name) = split_path(path);
        Self {
            dir: dir.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (in dir {})", self.name, self.dir)
    }
}

/// Column checksum over every chunk read since the file was opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumAccumulator {
    columns: [u8; CHUNK_SIZE],
}

impl Default for ChecksumAccumulator {
    fn default() -> Self {
        Self {
            columns: [0; CHUNK_SIZE],
        }
    }
}

impl ChecksumAccumulator {
    pub fn clear(&mut self) {
        self.columns = [0; CHUNK_SIZE];
    }

    pub fn add_chunk(&mut self, chunk: &[u8]) {
        for (column, &b) in self.columns.iter_mut().zip(chunk) {
            *column = column.wrapping_add(b);
        }
    }

    pub fn columns(&self) -> &[u8; CHUNK_SIZE] {
        &self.columns
    }

    /// Bitwise complement of every column, as reported to the PC.
    pub fn complement(&self) -> [u8; CHUNK_SIZE] {
        self.columns.map(|c| !c)
    }
}

/// One chunk served from the open file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadChunk {
    /// Bytes sent in this chunk (empty at end of file).
    pub data: Vec<u8>,
    /// Complemented 8-bit sum of `data`.
    pub checksum: u8,
    /// Bytes left in the file before this chunk.
    pub remaining: usize,
    /// File position the chunk started at.
    pub position: usize,
}

/// A directory listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub size: u32,
}

#[derive(Debug, Clone)]
struct OpenFile {
    path: FilePath,
    position: usize,
}

#[derive(Debug, Clone, Default)]
struct Listing {
    dir: String,
    next: usize,
}

#[derive(Debug, Clone, Default)]
pub struct VirtualFs {
    tree: FileTree,
    open: Option<OpenFile>,
    accumulator: ChecksumAccumulator,
    listing: Listing,
}

impl VirtualFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tree(tree: FileTree) -> Self {
        Self {
            tree,
            ..Default::default()
        }
    }

    pub fn tree(&self) -> &FileTree {
        &self.tree
    }

    /// Swap in a whole new tree. Refused while a file is open, since the
    /// cursor would point into the old tree.
    pub fn replace_tree(&mut self, tree: FileTree) -> Result<FileTree, FsError> {
        if let Some(open) = &self.open {
            return Err(FsError::FileOpen(open.path.clone()));
        }
        self.listing = Listing::default();
        Ok(std::mem::replace(&mut self.tree, tree))
    }

    pub fn file(&self, dir: &str, name: &str) -> Option<&[u8]> {
        self.tree.get(dir)?.get(name).map(Vec::as_slice)
    }

    pub fn open_file(&self) -> Option<&FilePath> {
        self.open.as_ref().map(|o| &o.path)
    }

    pub fn is_file_open(&self) -> bool {
        self.open.is_some()
    }

    /// Create or truncate a file and make it the open file.
    pub fn open_for_write(&mut self, path: &str) -> FilePath {
        let path = FilePath::parse(path);
        self.tree
            .entry(path.dir.clone())
            .or_default()
            .insert(path.name.clone(), Vec::new());
        self.open = Some(OpenFile {
            path: path.clone(),
            position: 0,
        });
        path
    }

    /// Open a file for chunked reading. Missing files read as empty and are
    /// not created.
    pub fn open_for_read(&mut self, path: &str) -> FilePath {
        let path = FilePath::parse(path);
        self.accumulator.clear();
        self.open = Some(OpenFile {
            path: path.clone(),
            position: 0,
        });
        path
    }

    /// Append to the open file, returning its new size.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, FsError> {
        let open = self.open.as_ref().ok_or(FsError::NoOpenFile)?;
        let file = self
            .tree
            .entry(open.path.dir.clone())
            .or_default()
            .entry(open.path.name.clone())
            .or_default();
        file.extend_from_slice(data);
        Ok(file.len())
    }

    /// Serve the next chunk of the open file and fold it into the accumulator.
    pub fn read_chunk(&mut self) -> Result<ReadChunk, FsError> {
        let open = self.open.as_mut().ok_or(FsError::NoOpenFile)?;
        let content = self
            .tree
            .get(&open.path.dir)
            .and_then(|d| d.get(&open.path.name))
            .map(Vec::as_slice)
            .unwrap_or_default();

        let position = open.position.min(content.len());
        let remaining = content.len() - position;
        let data = content[position..position + remaining.min(CHUNK_SIZE)].to_vec();

        self.accumulator.add_chunk(&data);
        open.position = position + data.len();

        Ok(ReadChunk {
            checksum: complemented_sum(&data),
            data,
            remaining,
            position,
        })
    }

    pub fn accumulator(&self) -> &ChecksumAccumulator {
        &self.accumulator
    }

    /// Detach the open file, returning which one it was.
    pub fn close(&mut self) -> Option<FilePath> {
        self.open.take().map(|o| o.path)
    }

    /// Drop the cursors a connection leaves behind: the open file, the read
    /// checksum and the listing position. The tree itself is kept.
    pub fn reset_session(&mut self) -> Option<FilePath> {
        self.accumulator.clear();
        self.listing = Listing::default();
        self.close()
    }

    /// Select a directory and rewind the listing cursor.
    pub fn change_dir(&mut self, dir: &str) {
        self.listing = Listing {
            dir: dir.to_string(),
            next: 0,
        };
    }

    pub fn current_dir(&self) -> &str {
        &self.listing.dir
    }

    /// Next file of the selected directory, or `None` once exhausted.
    pub fn next_entry(&mut self) -> Option<DirEntry> {
        let (name, content) = self
            .tree
            .get(&self.listing.dir)?
            .iter()
            .nth(self.listing.next)?;
        self.listing.next += 1;
        Some(DirEntry {
            name: name.clone(),
            size: content.len() as u32,
        })
    }
}
