//! Blob-store boundary.
//!
//! The archive's physical transport is a key-value store: `upload`,
//! `download`, `list`. The pipeline and accessor only speak this trait, so
//! a cloud-backed transport slots in without touching them and tests run
//! against a temp directory.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::ArchiveError;
use crate::spectral::SpectralFrame;

pub trait BlobStore: Send + Sync {
    /// Copy a local file into the store under `key`.
    fn upload(&self, local: &Path, key: &str) -> Result<(), ArchiveError>;

    /// Fetch the blob at `key` into a local file.
    fn download(&self, key: &str, local: &Path) -> Result<(), ArchiveError>;

    /// All keys starting with `prefix`, relative to the store root.
    fn list(&self, prefix: &str) -> Result<Vec<String>, ArchiveError>;

    fn exists(&self, key: &str) -> bool {
        self.list(key).map(|keys| keys.iter().any(|k| k == key)).unwrap_or(false)
    }
}

/// Filesystem-backed store: keys are paths relative to a root directory.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl BlobStore for LocalStore {
    fn upload(&self, local: &Path, key: &str) -> Result<(), ArchiveError> {
        let dest = self.path_for(key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(local, &dest).map_err(|e| ArchiveError::WriteFailed {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    fn download(&self, key: &str, local: &Path) -> Result<(), ArchiveError> {
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(self.path_for(key), local)?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, ArchiveError> {
        let mut keys = Vec::new();
        if !self.root.exists() {
            return Ok(keys);
        }
        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let key = rel.to_string_lossy().replace('\\', "/");
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Write a frame blob directly under `key`.
pub fn write_frame(store: &dyn BlobStore, key: &str, frame: &SpectralFrame) -> Result<(), ArchiveError> {
    let staging = tempfile::NamedTempFile::new()?;
    serde_json::to_writer(&staging, frame)?;
    store.upload(staging.path(), key)
}

/// Read a frame blob from `key`.
pub fn read_frame(store: &dyn BlobStore, key: &str) -> Result<SpectralFrame, ArchiveError> {
    let staging = tempfile::NamedTempFile::new()?;
    store.download(key, staging.path())?;
    let file = fs::File::open(staging.path())?;
    Ok(serde_json::from_reader(file)?)
}
