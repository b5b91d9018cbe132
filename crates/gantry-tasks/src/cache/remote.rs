//! Shared cache tier consulted on local misses

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use super::{CacheError, METADATA_FILE, TEMP_PREFIX};

/// A cache shared between machines or workspaces.
///
/// Implementations move whole entry directories between `cache_dir` and the
/// remote store.
pub trait RemoteCache: Send + Sync {
    /// Materialize `{cache_dir}/{hash}` from the remote. Returns false when
    /// the remote has no entry for the hash.
    fn retrieve(&self, hash: &str, cache_dir: &Path) -> Result<bool, CacheError>;

    /// Publish `{cache_dir}/{hash}` to the remote. Returns false when nothing
    /// was stored.
    fn store(&self, hash: &str, cache_dir: &Path) -> Result<bool, CacheError>;
}

/// Remote cache backed by a directory, typically a network mount
#[derive(Debug, Clone)]
pub struct DirectoryRemoteCache {
    directory: PathBuf,
    read_only: bool,
}

impl DirectoryRemoteCache {
    /// Create a read-write remote cache
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            read_only: false,
        }
    }

    /// Never publish entries
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

impl RemoteCache for DirectoryRemoteCache {
    fn retrieve(&self, hash: &str, cache_dir: &Path) -> Result<bool, CacheError> {
        let source = self.directory.join(hash);
        if !source.join(METADATA_FILE).is_file() {
            return Ok(false);
        }
        debug!(hash, remote = %self.directory.display(), "retrieving from remote cache");
        publish_copy(&source, cache_dir, hash)
    }

    fn store(&self, hash: &str, cache_dir: &Path) -> Result<bool, CacheError> {
        if self.read_only {
            return Ok(false);
        }
        let source = cache_dir.join(hash);
        if !source.is_dir() || self.directory.join(hash).exists() {
            return Ok(false);
        }
        debug!(hash, remote = %self.directory.display(), "storing in remote cache");
        publish_copy(&source, &self.directory, hash)
    }
}

/// Copy `source` into a staging directory under `parent`, then rename it to
/// `{parent}/{hash}`. Losing the rename to another writer is not an error.
fn publish_copy(source: &Path, parent: &Path, hash: &str) -> Result<bool, CacheError> {
    fs::create_dir_all(parent)?;
    let staging = tempfile::Builder::new()
        .prefix(&format!("{}{}-", TEMP_PREFIX, hash))
        .tempdir_in(parent)?;

    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| CacheError::Remote(e.to_string()))?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let dest = staging.path().join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &dest)?;
        }
    }

    let target = parent.join(hash);
    match fs::rename(staging.path(), &target) {
        Ok(()) => Ok(true),
        Err(_) if target.join(METADATA_FILE).exists() => Ok(true),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(dir: &Path, hash: &str) {
        let path = dir.join(hash);
        fs::create_dir_all(path.join("outputs/dist")).unwrap();
        fs::write(path.join(METADATA_FILE), "{}").unwrap();
        fs::write(path.join("outputs/dist/app.js"), "app").unwrap();
    }

    #[test]
    fn test_store_and_retrieve() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("local");
        let remote = DirectoryRemoteCache::new(temp.path().join("remote"));
        entry(&local, "h1");

        assert!(remote.store("h1", &local).unwrap());
        // already present
        assert!(!remote.store("h1", &local).unwrap());

        let other = temp.path().join("other");
        assert!(remote.retrieve("h1", &other).unwrap());
        assert_eq!(fs::read_to_string(other.join("h1/outputs/dist/app.js")).unwrap(), "app");
        assert!(!remote.retrieve("h2", &other).unwrap());
    }

    #[test]
    fn test_read_only_never_stores() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("local");
        entry(&local, "h1");

        let remote = DirectoryRemoteCache::new(temp.path().join("remote")).read_only(true);
        assert!(!remote.store("h1", &local).unwrap());
        assert!(!temp.path().join("remote/h1").exists());
    }
}
