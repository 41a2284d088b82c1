//! Local half of the transfer transport: the sync directory on disk.

use crate::error::Result;
use crate::snapshot::{md5_hex, FsNode};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// File operations rooted at the local sync directory.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, rel_path: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in rel_path.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }

    pub async fn read(&self, rel_path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.resolve(rel_path)).await?)
    }

    pub async fn write(&self, rel_path: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, data).await?;
        Ok(())
    }

    /// Delete a file or directory tree; absence is already-satisfied.
    pub async fn delete(&self, rel_path: &str) -> Result<()> {
        let path = self.resolve(rel_path);
        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            fs::remove_dir_all(&path).await?;
        } else {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    pub async fn create_dir(&self, rel_path: &str) -> Result<()> {
        fs::create_dir_all(self.resolve(rel_path)).await?;
        Ok(())
    }

    /// Stat for verification: re-reads and re-hashes files.
    pub async fn stat(&self, rel_path: &str) -> Result<Option<FsNode>> {
        let path = self.resolve(rel_path);
        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            return Ok(Some(FsNode::empty_dir()));
        }
        let data = fs::read(&path).await?;
        Ok(Some(FsNode::File {
            size: data.len() as u64,
            md5: md5_hex(&data),
        }))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
