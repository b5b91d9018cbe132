//! Content-addressable task cache
//!
//! Every entry lives in a directory named after the task hash:
//!
//! ```text
//! {cache}/{hash}/terminalOutput
//! {cache}/{hash}/metadata.json
//! {cache}/{hash}/outputs/<workspace-relative output files>
//! ```
//!
//! Entries are staged in a `.tmp-{hash}-*` sibling and published with a
//! single directory rename, so readers only ever see complete entries.

mod outputs;
mod remote;

pub use outputs::{InMemoryOutputsTracker, NoopOutputsTracker, OutputsTracker};
pub use remote::{DirectoryRemoteCache, RemoteCache};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::task::Task;

const TERMINAL_OUTPUT_FILE: &str = "terminalOutput";
const METADATA_FILE: &str = "metadata.json";
const OUTPUTS_DIR: &str = "outputs";
const TEMP_PREFIX: &str = ".tmp-";

/// Attempts made by `put` before giving up
const WRITE_ATTEMPTS: u32 = 5;
const WRITE_BACKOFF: Duration = Duration::from_millis(50);

/// Staging directories older than this are considered abandoned
const STALE_TEMP_AGE: Duration = Duration::from_secs(60 * 60);

/// Metadata stored next to a cached terminal output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Task hash the entry belongs to
    pub hash: String,
    /// Exit code of the cached run
    pub code: i32,
    /// Task that produced the entry
    pub task_id: String,
    /// Files stored under `outputs/`, relative to the workspace root
    pub outputs: Vec<String>,
    /// When the entry was written
    pub created_at: DateTime<Utc>,
}

/// A complete cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResult {
    /// Captured terminal output of the original run
    pub terminal_output: String,
    /// Directory holding the cached output files
    pub outputs_path: PathBuf,
    /// Exit code of the original run
    pub code: i32,
    /// Whether the entry was pulled from the remote cache
    pub remote: bool,
}

/// Local task cache with an optional remote tier
#[derive(Clone)]
pub struct TaskCache {
    cache_dir: PathBuf,
    workspace_root: PathBuf,
    remote: Option<Arc<dyn RemoteCache>>,
    outputs_tracker: Arc<dyn OutputsTracker>,
}

impl TaskCache {
    /// Create a cache. A relative `cache_dir` is resolved against the
    /// workspace root.
    pub fn new(workspace_root: impl Into<PathBuf>, cache_dir: impl AsRef<Path>) -> Self {
        let workspace_root = workspace_root.into();
        let cache_dir = if cache_dir.as_ref().is_absolute() {
            cache_dir.as_ref().to_path_buf()
        } else {
            workspace_root.join(cache_dir)
        };
        Self {
            cache_dir,
            workspace_root,
            remote: None,
            outputs_tracker: Arc::new(NoopOutputsTracker),
        }
    }

    /// Consult a remote cache on local misses and publish new entries to it
    pub fn with_remote(mut self, remote: Arc<dyn RemoteCache>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Use an outputs tracker to skip restoring unchanged outputs
    pub fn with_outputs_tracker(mut self, tracker: Arc<dyn OutputsTracker>) -> Self {
        self.outputs_tracker = tracker;
        self
    }

    /// Get the cache directory
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Look up the entry for the task's hash.
    ///
    /// Incomplete entries count as misses. On a local miss the remote cache,
    /// if any, is asked to materialize the entry.
    #[instrument(skip_all, fields(task = %task.id))]
    pub fn get(&self, task: &Task) -> Result<Option<CachedResult>, CacheError> {
        let hash = task_hash(task)?;

        if let Some(result) = self.read_entry(hash)? {
            debug!(task = %task.id, hash, "local cache hit");
            return Ok(Some(result));
        }

        let Some(remote) = &self.remote else {
            debug!(task = %task.id, hash, "cache miss");
            return Ok(None);
        };

        match remote.retrieve(hash, &self.cache_dir) {
            Ok(true) => {
                let result = self.read_entry(hash)?.map(|r| CachedResult { remote: true, ..r });
                debug!(task = %task.id, hash, hit = result.is_some(), "remote cache lookup");
                Ok(result)
            }
            Ok(false) => {
                debug!(task = %task.id, hash, "cache miss");
                Ok(None)
            }
            Err(e) => {
                warn!(task = %task.id, error = %e, "remote cache retrieve failed");
                Ok(None)
            }
        }
    }

    /// Store a finished task under its hash.
    ///
    /// `outputs` are the task's declared output paths or globs relative to
    /// the workspace root. An existing entry for the hash is left untouched.
    #[instrument(skip_all, fields(task = %task.id))]
    pub fn put(
        &self,
        task: &Task,
        terminal_output: &str,
        outputs: &[String],
        code: i32,
    ) -> Result<(), CacheError> {
        let hash = task_hash(task)?;

        let mut attempt = 1;
        loop {
            match self.write_entry(task, hash, terminal_output, outputs, code) {
                Ok(()) => break,
                Err(e) if attempt < WRITE_ATTEMPTS => {
                    debug!(task = %task.id, attempt, error = %e, "cache write failed, retrying");
                    std::thread::sleep(WRITE_BACKOFF * attempt);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(remote) = &self.remote {
            if let Err(e) = remote.store(hash, &self.cache_dir) {
                warn!(task = %task.id, error = %e, "remote cache store failed");
            }
        }

        self.outputs_tracker.record_outputs_hash(outputs, hash);
        Ok(())
    }

    fn write_entry(
        &self,
        task: &Task,
        hash: &str,
        terminal_output: &str,
        outputs: &[String],
        code: i32,
    ) -> Result<(), CacheError> {
        let entry_dir = self.cache_dir.join(hash);
        if entry_dir.exists() {
            debug!(hash, "entry already cached");
            return Ok(());
        }

        fs::create_dir_all(&self.cache_dir)?;
        let staging = tempfile::Builder::new()
            .prefix(&format!("{}{}-", TEMP_PREFIX, hash))
            .tempdir_in(&self.cache_dir)?;

        fs::write(staging.path().join(TERMINAL_OUTPUT_FILE), terminal_output)?;

        let files = collect_output_files(&self.workspace_root, outputs)?;
        let outputs_dir = staging.path().join(OUTPUTS_DIR);
        fs::create_dir_all(&outputs_dir)?;
        for file in &files {
            let dest = outputs_dir.join(file);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(self.workspace_root.join(file), dest)?;
        }

        let metadata = CacheMetadata {
            hash: hash.to_string(),
            code,
            task_id: task.id.clone(),
            outputs: files,
            created_at: Utc::now(),
        };
        fs::write(
            staging.path().join(METADATA_FILE),
            serde_json::to_string_pretty(&metadata)?,
        )?;

        match fs::rename(staging.path(), &entry_dir) {
            Ok(()) => {
                debug!(hash, files = metadata.outputs.len(), "cache entry written");
                Ok(())
            }
            // another writer published the same hash first
            Err(_) if entry_dir.join(METADATA_FILE).exists() => {
                debug!(hash, "concurrent writer won");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_entry(&self, hash: &str) -> Result<Option<CachedResult>, CacheError> {
        let entry_dir = self.cache_dir.join(hash);
        let metadata_path = entry_dir.join(METADATA_FILE);
        let terminal_path = entry_dir.join(TERMINAL_OUTPUT_FILE);
        if !metadata_path.is_file() || !terminal_path.is_file() {
            return Ok(None);
        }

        let metadata: CacheMetadata = match serde_json::from_str(&fs::read_to_string(&metadata_path)?) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(hash, error = %e, "ignoring unreadable cache metadata");
                return Ok(None);
            }
        };

        let outputs_path = entry_dir.join(OUTPUTS_DIR);
        if let Some(missing) = metadata.outputs.iter().find(|f| !outputs_path.join(f).is_file()) {
            warn!(hash, file = %missing, "cache entry is missing an output file");
            return Ok(None);
        }

        Ok(Some(CachedResult {
            terminal_output: fs::read_to_string(&terminal_path)?,
            outputs_path,
            code: metadata.code,
            remote: false,
        }))
    }

    /// Restore cached outputs into the workspace, replacing whatever
    /// currently matches the declared outputs
    #[instrument(skip_all, fields(hash))]
    pub fn copy_files_from_cache(
        &self,
        hash: &str,
        cached: &CachedResult,
        outputs: &[String],
    ) -> Result<(), CacheError> {
        if outputs.is_empty() {
            return Ok(());
        }
        if self.outputs_tracker.outputs_hashes_match(outputs, hash) {
            debug!(hash, "outputs already match, not restoring");
            return Ok(());
        }

        remove_outputs(&self.workspace_root, outputs)?;

        let mut restored = 0;
        if cached.outputs_path.is_dir() {
            for entry in WalkDir::new(&cached.outputs_path) {
                let entry = entry.map_err(|e| CacheError::Io(e.into()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(&cached.outputs_path)
                    .unwrap_or(entry.path());
                let dest = self.workspace_root.join(relative);
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(entry.path(), &dest)?;
                restored += 1;
            }
        }

        self.outputs_tracker.record_outputs_hash(outputs, hash);
        debug!(hash, restored, "outputs restored from cache");
        Ok(())
    }

    /// Remove entries older than `max_age` and abandoned staging directories
    pub fn remove_old_cache_records(&self, max_age: Duration) -> Result<PruneStats, CacheError> {
        info!(max_age_secs = max_age.as_secs(), "pruning cache");
        let mut stats = PruneStats::default();

        if !self.cache_dir.exists() {
            return Ok(stats);
        }

        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();

        for entry in fs::read_dir(&self.cache_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(TEMP_PREFIX) {
                let age = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|m| SystemTime::now().duration_since(m).ok())
                    .unwrap_or_default();
                if age > STALE_TEMP_AGE && fs::remove_dir_all(&path).is_ok() {
                    debug!(dir = %name, "removed abandoned staging directory");
                }
                continue;
            }

            stats.total += 1;

            let created = fs::read_to_string(path.join(METADATA_FILE))
                .ok()
                .and_then(|c| serde_json::from_str::<CacheMetadata>(&c).ok())
                .map(|m| m.created_at);
            if let Some(created) = created {
                if created < cutoff {
                    if fs::remove_dir_all(&path).is_ok() {
                        stats.removed += 1;
                    }
                    continue;
                }
            }

            stats.kept += 1;
        }

        info!(total = stats.total, removed = stats.removed, kept = stats.kept, "cache prune complete");
        Ok(stats)
    }

    /// Get cache statistics
    pub fn status(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats::default();

        if !self.cache_dir.exists() {
            return Ok(stats);
        }

        for entry in fs::read_dir(&self.cache_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() || entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                continue;
            }

            stats.entries += 1;
            stats.total_size += WalkDir::new(&path)
                .into_iter()
                .flatten()
                .filter(|e| e.file_type().is_file())
                .filter_map(|e| e.metadata().ok())
                .map(|m| m.len())
                .sum::<u64>();
        }

        Ok(stats)
    }

    /// Delete every entry. Returns the number of entries removed.
    pub fn clear(&self) -> Result<usize, CacheError> {
        if !self.cache_dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
                removed += 1;
            } else {
                fs::remove_file(&path)?;
            }
        }

        info!(removed, dir = %self.cache_dir.display(), "cache cleared");
        Ok(removed)
    }
}

fn task_hash(task: &Task) -> Result<&str, CacheError> {
    task.hash
        .as_deref()
        .ok_or_else(|| CacheError::MissingHash(task.id.clone()))
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Split declared outputs into include and exclude lists
fn split_outputs(outputs: &[String]) -> (Vec<&str>, Vec<glob::Pattern>) {
    let mut includes = Vec::new();
    let mut excludes = Vec::new();
    for output in outputs {
        match output.strip_prefix('!') {
            Some(negated) => {
                if let Ok(pattern) = glob::Pattern::new(negated) {
                    excludes.push(pattern);
                }
            }
            None => includes.push(output.trim_end_matches('/')),
        }
    }
    (includes, excludes)
}

/// Files currently matching the declared outputs, relative to the workspace
fn collect_output_files(workspace_root: &Path, outputs: &[String]) -> Result<Vec<String>, CacheError> {
    let (includes, excludes) = split_outputs(outputs);
    let mut files = Vec::new();

    for output in includes {
        let paths: Vec<PathBuf> = if is_glob(output) {
            let pattern = workspace_root.join(output).to_string_lossy().to_string();
            glob::glob(&pattern)
                .map_err(|e| CacheError::InvalidOutput {
                    output: output.to_string(),
                    message: e.to_string(),
                })?
                .flatten()
                .collect()
        } else {
            vec![workspace_root.join(output)]
        };

        for path in paths {
            if path.is_file() {
                files.push(path);
            } else if path.is_dir() {
                files.extend(
                    WalkDir::new(&path)
                        .into_iter()
                        .flatten()
                        .filter(|e| e.file_type().is_file())
                        .map(|e| e.into_path()),
                );
            }
        }
    }

    let mut relative: Vec<String> = files
        .iter()
        .filter_map(|p| p.strip_prefix(workspace_root).ok())
        .map(|p| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/")
        })
        .filter(|p| !excludes.iter().any(|e| e.matches(p)))
        .collect();
    relative.sort();
    relative.dedup();
    Ok(relative)
}

/// Delete whatever currently sits at the declared outputs. Files matched
/// by a `!` exclusion are never cached, so they are left in place.
fn remove_outputs(workspace_root: &Path, outputs: &[String]) -> Result<(), CacheError> {
    let (includes, excludes) = split_outputs(outputs);
    if !excludes.is_empty() {
        for file in collect_output_files(workspace_root, outputs)? {
            fs::remove_file(workspace_root.join(file))?;
        }
        return Ok(());
    }

    for output in includes {
        let paths: Vec<PathBuf> = if is_glob(output) {
            let pattern = workspace_root.join(output).to_string_lossy().to_string();
            glob::glob(&pattern)
                .map(|paths| paths.flatten().collect())
                .unwrap_or_default()
        } else {
            vec![workspace_root.join(output)]
        };

        for path in paths {
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else if path.exists() {
                fs::remove_file(&path)?;
            }
        }
    }
    Ok(())
}

/// Statistics from a prune operation
#[derive(Debug, Default, Serialize)]
pub struct PruneStats {
    /// Total entries found
    pub total: usize,
    /// Entries removed
    pub removed: usize,
    /// Entries kept
    pub kept: usize,
}

/// Cache statistics
#[derive(Debug, Default, Serialize)]
pub struct CacheStats {
    /// Number of cache entries
    pub entries: usize,
    /// Total size in bytes
    pub total_size: u64,
}

impl CacheStats {
    /// Format total size in human-readable form
    pub fn formatted_size(&self) -> String {
        const KB: f64 = 1024.0;
        let size = self.total_size as f64;
        if size < KB {
            format!("{} B", self.total_size)
        } else if size < KB * KB {
            format!("{:.1} KB", size / KB)
        } else if size < KB * KB * KB {
            format!("{:.1} MB", size / (KB * KB))
        } else {
            format!("{:.1} GB", size / (KB * KB * KB))
        }
    }
}

/// Cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// IO error
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Cache serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The task has not been hashed yet
    #[error("Task '{0}' has no hash")]
    MissingHash(String),

    /// A declared output is not a valid glob
    #[error("Invalid output '{output}': {message}")]
    InvalidOutput { output: String, message: String },

    /// The remote cache failed
    #[error("Remote cache error: {0}")]
    Remote(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskTarget;
    use tempfile::TempDir;

    fn hashed_task(hash: &str) -> Task {
        let mut task = Task::new(TaskTarget::new("web", "build"), "apps/web")
            .with_cache(true)
            .with_outputs(vec!["apps/web/dist".to_string()]);
        task.assign_hash(hash.to_string(), Default::default());
        task
    }

    fn write(root: &Path, path: &str, contents: &str) {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn setup() -> (TempDir, TaskCache) {
        let temp = TempDir::new().unwrap();
        let cache = TaskCache::new(temp.path(), ".gantry/cache");
        (temp, cache)
    }

    #[test]
    fn test_put_then_get() {
        let (temp, cache) = setup();
        write(temp.path(), "apps/web/dist/main.js", "console.log(1)");
        let task = hashed_task("abc123");

        cache.put(&task, "built\n", &task.outputs, 0).unwrap();

        let cached = cache.get(&task).unwrap().unwrap();
        assert_eq!(cached.code, 0);
        assert_eq!(cached.terminal_output, "built\n");
        assert!(!cached.remote);
        assert_eq!(
            fs::read_to_string(cached.outputs_path.join("apps/web/dist/main.js")).unwrap(),
            "console.log(1)"
        );
    }

    #[test]
    fn test_cache_miss() {
        let (_temp, cache) = setup();
        assert!(cache.get(&hashed_task("missing")).unwrap().is_none());
    }

    #[test]
    fn test_unhashed_task_errors() {
        let (_temp, cache) = setup();
        let task = Task::new(TaskTarget::new("web", "build"), "apps/web");
        assert!(matches!(cache.get(&task), Err(CacheError::MissingHash(_))));
    }

    #[test]
    fn test_incomplete_entry_is_a_miss() {
        let (temp, cache) = setup();
        write(temp.path(), "apps/web/dist/main.js", "x");
        let task = hashed_task("partial");
        cache.put(&task, "out", &task.outputs, 0).unwrap();

        fs::remove_file(cache.cache_dir().join("partial").join(TERMINAL_OUTPUT_FILE)).unwrap();
        assert!(cache.get(&task).unwrap().is_none());

        let task = hashed_task("no-outputs");
        cache.put(&task, "out", &task.outputs, 0).unwrap();
        fs::remove_dir_all(cache.cache_dir().join("no-outputs").join(OUTPUTS_DIR)).unwrap();
        assert!(cache.get(&task).unwrap().is_none());
    }

    #[test]
    fn test_existing_entry_not_overwritten() {
        let (temp, cache) = setup();
        write(temp.path(), "apps/web/dist/main.js", "x");
        let task = hashed_task("same");

        cache.put(&task, "first", &task.outputs, 0).unwrap();
        cache.put(&task, "second", &task.outputs, 0).unwrap();
        assert_eq!(cache.get(&task).unwrap().unwrap().terminal_output, "first");
    }

    #[test]
    fn test_concurrent_writers_same_hash() {
        let (temp, cache) = setup();
        write(temp.path(), "apps/web/dist/main.js", "x");
        let task = hashed_task("racy");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                let task = task.clone();
                std::thread::spawn(move || cache.put(&task, &format!("writer {}", i), &task.outputs, 0))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let cached = cache.get(&task).unwrap().unwrap();
        assert!(cached.terminal_output.starts_with("writer "));
        let leftovers = fs::read_dir(cache.cache_dir())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_copy_files_from_cache_removes_stale_outputs() {
        let (temp, cache) = setup();
        write(temp.path(), "apps/web/dist/main.js", "fresh");
        let task = hashed_task("restore");
        cache.put(&task, "", &task.outputs, 0).unwrap();

        fs::remove_dir_all(temp.path().join("apps/web/dist")).unwrap();
        write(temp.path(), "apps/web/dist/stale.js", "old");

        let cached = cache.get(&task).unwrap().unwrap();
        cache.copy_files_from_cache("restore", &cached, &task.outputs).unwrap();

        assert_eq!(
            fs::read_to_string(temp.path().join("apps/web/dist/main.js")).unwrap(),
            "fresh"
        );
        assert!(!temp.path().join("apps/web/dist/stale.js").exists());
    }

    #[test]
    fn test_outputs_tracker_skips_restore() {
        let temp = TempDir::new().unwrap();
        let tracker = Arc::new(InMemoryOutputsTracker::default());
        let cache = TaskCache::new(temp.path(), "cache").with_outputs_tracker(tracker.clone());
        write(temp.path(), "apps/web/dist/main.js", "fresh");
        let task = hashed_task("tracked");
        cache.put(&task, "", &task.outputs, 0).unwrap();
        assert!(tracker.outputs_hashes_match(&task.outputs, "tracked"));

        write(temp.path(), "apps/web/dist/extra.js", "kept");
        let cached = cache.get(&task).unwrap().unwrap();
        cache.copy_files_from_cache("tracked", &cached, &task.outputs).unwrap();
        assert!(temp.path().join("apps/web/dist/extra.js").exists());
    }

    #[test]
    fn test_glob_outputs_with_exclusions() {
        let (temp, cache) = setup();
        write(temp.path(), "apps/web/dist/a.js", "a");
        write(temp.path(), "apps/web/dist/a.js.map", "map");
        let mut task = hashed_task("globbed");
        task.outputs = vec!["apps/web/dist/*".to_string(), "!apps/web/dist/*.map".to_string()];
        cache.put(&task, "", &task.outputs, 0).unwrap();

        let cached = cache.get(&task).unwrap().unwrap();
        assert!(cached.outputs_path.join("apps/web/dist/a.js").exists());
        assert!(!cached.outputs_path.join("apps/web/dist/a.js.map").exists());
    }

    #[test]
    fn test_restore_keeps_excluded_files() {
        let (temp, cache) = setup();
        write(temp.path(), "apps/web/dist/a.js", "a");
        write(temp.path(), "apps/web/dist/a.js.map", "map");
        let mut task = hashed_task("excluded");
        task.outputs = vec!["apps/web/dist".to_string(), "!apps/web/dist/*.map".to_string()];
        cache.put(&task, "", &task.outputs, 0).unwrap();

        write(temp.path(), "apps/web/dist/a.js", "edited");
        write(temp.path(), "apps/web/dist/stale.js", "old");

        let cached = cache.get(&task).unwrap().unwrap();
        cache.copy_files_from_cache("excluded", &cached, &task.outputs).unwrap();

        let dist = temp.path().join("apps/web/dist");
        assert_eq!(fs::read_to_string(dist.join("a.js")).unwrap(), "a");
        assert_eq!(fs::read_to_string(dist.join("a.js.map")).unwrap(), "map");
        assert!(!dist.join("stale.js").exists());
    }

    #[test]
    fn test_remove_old_cache_records() {
        let (temp, cache) = setup();
        write(temp.path(), "apps/web/dist/main.js", "x");
        let task = hashed_task("old");
        cache.put(&task, "", &task.outputs, 0).unwrap();

        let stats = cache.remove_old_cache_records(Duration::from_secs(3600)).unwrap();
        assert_eq!((stats.total, stats.removed, stats.kept), (1, 0, 1));

        std::thread::sleep(Duration::from_millis(20));
        let stats = cache.remove_old_cache_records(Duration::from_millis(1)).unwrap();
        assert_eq!((stats.total, stats.removed, stats.kept), (1, 1, 0));
        assert!(cache.get(&task).unwrap().is_none());
    }

    #[test]
    fn test_status_and_clear() {
        let (temp, cache) = setup();
        assert_eq!(cache.status().unwrap().entries, 0);

        write(temp.path(), "apps/web/dist/main.js", "x");
        cache.put(&hashed_task("one"), "out", &[], 0).unwrap();
        cache.put(&hashed_task("two"), "out", &[], 1).unwrap();

        let stats = cache.status().unwrap();
        assert_eq!(stats.entries, 2);
        assert!(stats.total_size > 0);

        assert_eq!(cache.clear().unwrap(), 2);
        assert_eq!(cache.status().unwrap().entries, 0);
    }

    #[test]
    fn test_remote_cache_fallback() {
        let temp = TempDir::new().unwrap();
        let shared = temp.path().join("shared");
        let remote: Arc<dyn RemoteCache> = Arc::new(DirectoryRemoteCache::new(&shared));
        write(temp.path(), "apps/web/dist/main.js", "x");
        let task = hashed_task("shared-hash");

        let writer = TaskCache::new(temp.path(), "cache-a").with_remote(remote.clone());
        writer.put(&task, "from a", &task.outputs, 0).unwrap();
        assert!(shared.join("shared-hash").join(METADATA_FILE).exists());

        let reader = TaskCache::new(temp.path(), "cache-b").with_remote(remote);
        let cached = reader.get(&task).unwrap().unwrap();
        assert!(cached.remote);
        assert_eq!(cached.terminal_output, "from a");

        // now local
        assert!(!reader.get(&task).unwrap().unwrap().remote);
    }

    #[test]
    fn test_formatted_size() {
        let stats = CacheStats {
            entries: 0,
            total_size: 1536,
        };
        assert_eq!(stats.formatted_size(), "1.5 KB");

        let stats = CacheStats {
            entries: 0,
            total_size: 500,
        };
        assert_eq!(stats.formatted_size(), "500 B");
    }
}
