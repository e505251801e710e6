//! Content-addressed cache of verified libraries.
//!
//! Layout: `<root>/<algorithm>/<digest>/<file>`, with an advisory lock file
//! `<root>/<algorithm>/<digest>.lock` serializing writers across processes.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::util::fs::{dir_size, ensure_dir, remove_dir_all_if_exists};
use crate::util::hash::{Checksum, HashAlgorithm};

/// Exclusive lock on one cache entry, released on drop.
pub struct EntryLock {
    file: File,
}

impl Drop for EntryLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// A stored library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub algorithm: HashAlgorithm,
    pub digest: String,
    pub path: PathBuf,
    pub size: u64,
}

/// The on-disk library cache. Safe to delete at any time.
#[derive(Debug, Clone)]
pub struct LibraryCache {
    root: PathBuf,
}

impl LibraryCache {
    pub fn new(root: PathBuf) -> Self {
        LibraryCache { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, checksum: &Checksum) -> PathBuf {
        self.root
            .join(checksum.algorithm().as_str())
            .join(checksum.digest())
    }

    /// Where the artifact with `checksum` is stored.
    pub fn entry_path(&self, checksum: &Checksum, file_name: &str) -> PathBuf {
        self.entry_dir(checksum).join(file_name)
    }

    /// Where an unverified (`NOCHECK`) download for `key` is stored.
    pub fn unchecked_path(&self, key: &str, file_name: &str) -> PathBuf {
        self.root.join("unchecked").join(key).join(file_name)
    }

    /// Block until this process holds the entry's lock.
    pub fn lock(&self, checksum: &Checksum) -> Result<EntryLock> {
        let lock_path = self
            .root
            .join(checksum.algorithm().as_str())
            .join(format!("{}.lock", checksum.digest()));
        if let Some(parent) = lock_path.parent() {
            ensure_dir(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("failed to create lock file: {}", lock_path.display()))?;

        file.lock_exclusive()
            .with_context(|| format!("failed to lock {}", lock_path.display()))?;

        Ok(EntryLock { file })
    }

    /// Return the stored artifact if present and intact.
    pub fn lookup(&self, checksum: &Checksum, file_name: &str) -> Result<Option<PathBuf>> {
        let path = self.entry_path(checksum, file_name);
        if path.is_file() && checksum.matches_file(&path)? {
            return Ok(Some(path));
        }
        Ok(None)
    }

    /// A temporary file inside the cache, on the same filesystem as the entries.
    pub fn staging_file(&self) -> Result<NamedTempFile> {
        let tmp_dir = self.root.join("tmp");
        ensure_dir(&tmp_dir)?;
        NamedTempFile::new_in(&tmp_dir)
            .with_context(|| format!("failed to create temp file in {}", tmp_dir.display()))
    }

    /// Move a verified download into place.
    pub fn store(&self, checksum: &Checksum, file_name: &str, staged: NamedTempFile) -> Result<PathBuf> {
        let dest = self.entry_path(checksum, file_name);
        if let Some(parent) = dest.parent() {
            ensure_dir(parent)?;
        }
        staged
            .persist(&dest)
            .with_context(|| format!("failed to store {}", dest.display()))?;
        Ok(dest)
    }

    /// Every stored artifact, sorted by path.
    pub fn list(&self) -> Vec<CacheEntry> {
        let mut entries = Vec::new();
        for algorithm in [HashAlgorithm::Sha1, HashAlgorithm::Sha256] {
            let dir = self.root.join(algorithm.as_str());
            for entry in WalkDir::new(&dir)
                .min_depth(2)
                .max_depth(2)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let digest = entry
                    .path()
                    .parent()
                    .and_then(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                entries.push(CacheEntry {
                    algorithm,
                    digest,
                    path: entry.path().to_path_buf(),
                    size: entry.metadata().map(|m| m.len()).unwrap_or(0),
                });
            }
        }
        entries
    }

    /// Delete the whole cache, returning the number of bytes freed.
    pub fn clean(&self) -> Result<u64> {
        let size = dir_size(&self.root);
        remove_dir_all_if_exists(&self.root)?;
        Ok(size)
    }
}
