//! Saved filesystem state
//!
//! The whole flash filesystem is written as one JSON document with file
//! contents hex encoded:
//!
//! ```json
//! { "version": 1, "directories": { "/DATA": { "ECU.BIN": "0a0b0c" } } }
//! ```
//!
//! Only whole-tree load and save are supported.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vfs::{FileTree, FsError};

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid state document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid hex contents for {dir}/{name}: {source}")]
    Hex {
        dir: String,
        name: String,
        source: hex::FromHexError,
    },

    #[error("Unsupported state version {0}")]
    Version(u32),

    #[error(transparent)]
    Filesystem(#[from] FsError),
}

#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    version: u32,
    directories: BTreeMap<String, BTreeMap<String, String>>,
}

/// Serialize a tree into the state document format.
pub fn to_json(tree: &FileTree) -> Result<String, PersistError> {
    let doc = StateDocument {
        version: STATE_VERSION,
        directories: tree
            .iter()
            .map(|(dir, files)| {
                let files = files
                    .iter()
                    .map(|(name, content)| (name.clone(), hex::encode(content)))
                    .collect();
                (dir.clone(), files)
            })
            .collect(),
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

/// Parse a state document back into a tree.
pub fn from_json(text: &str) -> Result<FileTree, PersistError> {
    let doc: StateDocument = serde_json::from_str(text)?;
    if doc.version != STATE_VERSION {
        return Err(PersistError::Version(doc.version));
    }

    let mut tree = FileTree::new();
    for (dir, files) in doc.directories {
        let entry = tree.entry(dir.clone()).or_default();
        for (name, content) in files {
            let bytes = hex::decode(&content).map_err(|source| PersistError::Hex {
                dir: dir.clone(),
                name: name.clone(),
                source,
            })?;
            entry.insert(name, bytes);
        }
    }
    Ok(tree)
}

/// Write a tree to `path`, going through a temporary file so a failed save
/// never leaves a half-written state behind.
pub fn save(tree: &FileTree, path: &Path) -> Result<(), PersistError> {
    let json = to_json(tree)?;
    let tmp = path.with_extension("tmp");
    let io_err = |source| PersistError::Io {
        path: path.display().to_string(),
        source,
    };
    std::fs::write(&tmp, json).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

pub fn load(path: &Path) -> Result<FileTree, PersistError> {
    let text = std::fs::read_to_string(path).map_err(|source| PersistError::Io {
        path: path.display().to_string(),
        source,
    })?;
    from_json(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> FileTree {
        let mut tree = FileTree::new();
        tree.entry("/DATA".to_string())
            .or_default()
            .insert("ECU.BIN".to_string(), vec![0x0A, 0x0B, 0x0C]);
        tree.entry("".to_string())
            .or_default()
            .insert("EMPTY".to_string(), Vec::new());
        tree
    }

    #[test]
    fn document_shape() {
        let json = to_json(&sample_tree()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["directories"]["/DATA"]["ECU.BIN"], "0a0b0c");
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved-state");
        save(&sample_tree(), &path).unwrap();
        assert_eq!(load(&path).unwrap(), sample_tree());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn rejects_bad_documents() {
        assert!(matches!(from_json("{"), Err(PersistError::Json(_))));
        assert!(matches!(
            from_json(r#"{"version": 7, "directories": {}}"#),
            Err(PersistError::Version(7))
        ));
        assert!(matches!(
            from_json(r#"{"version": 1, "directories": {"/D": {"F": "zz"}}}"#),
            Err(PersistError::Hex { .. })
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load(&dir.path().join("absent")),
            Err(PersistError::Io { .. })
        ));
    }
}
