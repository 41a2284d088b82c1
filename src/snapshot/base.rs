//! Persisted base snapshot.
//!
//! The base records the filesystem state both sides were believed to agree
//! on as of the last successful sync. It is loaded at session start, mutated
//! in memory as actions complete, and written back atomically (temp file +
//! rename) so a crash never leaves a half-written snapshot on disk.

use crate::error::{Result, SyncError};
use crate::snapshot::FsNode;
use std::fs;
use std::path::{Path, PathBuf};

/// Owns the on-disk location of the base snapshot.
pub struct BaseStore {
    path: PathBuf,
}

impl BaseStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the base snapshot, returning an empty tree when the file does
    /// not exist (the "never synced before" state).
    pub fn load(&self) -> Result<FsNode> {
        if !self.path.exists() {
            return Ok(FsNode::empty_dir());
        }
        let data = fs::read(&self.path)?;
        let node = serde_json::from_slice(&data)?;
        Ok(node)
    }

    /// Persist the base snapshot, replacing any previous file atomically.
    pub fn save(&self, base: &FsNode) -> Result<()> {
        let data = serde_json::to_vec_pretty(base)?;
        let temp = self.path.with_extension("tmp");

        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(&temp, &data)?;
            fs::rename(&temp, &self.path)
        };

        write().map_err(|source| SyncError::Persist {
            path: self.path.clone(),
            source,
        })
    }

    /// Delete the snapshot file, e.g. when the user discards sync history
    /// for an initial sync. Absence is not an error.
    pub fn discard(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
