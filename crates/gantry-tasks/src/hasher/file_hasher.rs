//! File content hashing for filesets

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use tracing::{debug, trace};
use walkdir::WalkDir;

use super::HashError;

/// Provides content hashes for the files matching a set of globs.
///
/// Patterns are relative to `root`; a leading `!` excludes matches.
pub trait FileHasher: Send + Sync {
    /// Map from root-relative path (with `/` separators) to content hash
    fn hash_files_matching_globs(
        &self,
        root: &Path,
        patterns: &[String],
    ) -> Result<BTreeMap<String, String>, HashError>;
}

/// Directories never descended into when looking for inputs
const IGNORED_DIRS: &[&str] = &[".git", "node_modules"];

#[derive(Debug, Clone)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
    hash: String,
}

/// Hashes files on disk with SHA-256, remembering results until a file's
/// modification time or length changes
#[derive(Debug)]
pub struct WorkspaceFileHasher {
    ignored: Vec<String>,
    stamps: Mutex<HashMap<PathBuf, FileStamp>>,
}

impl WorkspaceFileHasher {
    /// Create a hasher that skips `.git` and `node_modules`
    pub fn new() -> Self {
        Self {
            ignored: IGNORED_DIRS.iter().map(|d| d.to_string()).collect(),
            stamps: Mutex::new(HashMap::new()),
        }
    }

    /// Also skip a directory, given by name or by root-relative path
    pub fn ignoring(mut self, dir: impl Into<String>) -> Self {
        let dir = dir.into();
        let dir = dir.trim_start_matches("./").trim_end_matches('/').to_string();
        if !dir.is_empty() {
            self.ignored.push(dir);
        }
        self
    }

    fn is_ignored(&self, relative: &str, name: &str) -> bool {
        self.ignored.iter().any(|i| i == name || i == relative)
    }

    fn hash_file(&self, path: &Path) -> Result<String, HashError> {
        let meta = fs::metadata(path).map_err(|source| HashError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let modified = meta.modified().ok();

        {
            let stamps = self.stamps.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(stamp) = stamps.get(path) {
                if stamp.modified == modified && stamp.len == meta.len() && modified.is_some() {
                    return Ok(stamp.hash.clone());
                }
            }
        }

        let contents = fs::read(path).map_err(|source| HashError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let hash = format!("{:x}", Sha256::digest(&contents));

        self.stamps.lock().unwrap_or_else(|e| e.into_inner()).insert(
            path.to_path_buf(),
            FileStamp {
                modified,
                len: meta.len(),
                hash: hash.clone(),
            },
        );
        Ok(hash)
    }
}

impl Default for WorkspaceFileHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl FileHasher for WorkspaceFileHasher {
    fn hash_files_matching_globs(
        &self,
        root: &Path,
        patterns: &[String],
    ) -> Result<BTreeMap<String, String>, HashError> {
        let set = PatternSet::new(patterns)?;
        let mut hashes = BTreeMap::new();

        for base in set.bases() {
            let start = root.join(&base);
            if start.is_file() {
                if set.matches(&base) {
                    hashes.insert(base.clone(), self.hash_file(&start)?);
                }
                continue;
            }
            if !start.is_dir() {
                continue;
            }

            let walker = WalkDir::new(&start).follow_links(false).into_iter();
            let entries = walker.filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                !self.is_ignored(&relative_path(root, entry.path()), &name)
            });

            for entry in entries {
                let entry = entry.map_err(|e| HashError::Walk {
                    path: start.clone(),
                    message: e.to_string(),
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = relative_path(root, entry.path());
                if set.matches(&relative) && !hashes.contains_key(&relative) {
                    let hash = self.hash_file(entry.path())?;
                    hashes.insert(relative, hash);
                }
            }
        }

        trace!(patterns = ?patterns, files = hashes.len(), "hashed fileset");
        Ok(hashes)
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Include and exclude globs compiled from fileset patterns
pub(crate) struct PatternSet {
    includes: GlobSet,
    excludes: GlobSet,
    bases: BTreeSet<String>,
}

impl PatternSet {
    /// Compile patterns. A pattern without glob characters also matches
    /// everything beneath it, so directories can be named directly.
    pub(crate) fn new(patterns: &[String]) -> Result<Self, HashError> {
        let mut includes = GlobSetBuilder::new();
        let mut excludes = GlobSetBuilder::new();
        let mut bases = BTreeSet::new();

        for raw in patterns {
            let (negated, pattern) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, raw.as_str()),
            };
            let pattern = pattern.trim_start_matches("./").trim_end_matches('/');
            let pattern = if pattern.is_empty() || pattern == "." { "**" } else { pattern };

            let builder = if negated { &mut excludes } else { &mut includes };
            builder.add(compile(pattern)?);
            if !has_glob_chars(pattern) {
                builder.add(compile(&format!("{}/**", pattern))?);
            }
            if !negated {
                bases.insert(literal_base(pattern));
            }
        }

        let build = |builder: GlobSetBuilder| {
            builder.build().map_err(|e| HashError::Glob {
                pattern: patterns.join(", "),
                message: e.to_string(),
            })
        };

        Ok(Self {
            includes: build(includes)?,
            excludes: build(excludes)?,
            bases: collapse_bases(bases),
        })
    }

    pub(crate) fn matches(&self, relative: &str) -> bool {
        self.includes.is_match(relative) && !self.excludes.is_match(relative)
    }

    /// Directories (or files) where matching can start
    pub(crate) fn bases(&self) -> impl Iterator<Item = &String> {
        self.bases.iter()
    }
}

fn compile(pattern: &str) -> Result<globset::Glob, HashError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| HashError::Glob {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// Leading path components without glob characters
fn literal_base(pattern: &str) -> String {
    pattern
        .split('/')
        .take_while(|c| !has_glob_chars(c))
        .collect::<Vec<_>>()
        .join("/")
}

/// Drop bases nested under another base
fn collapse_bases(bases: BTreeSet<String>) -> BTreeSet<String> {
    let mut collapsed: BTreeSet<String> = BTreeSet::new();
    for base in bases {
        let nested = collapsed
            .iter()
            .any(|b| b.is_empty() || base == *b || base.starts_with(&format!("{}/", b)));
        if !nested {
            collapsed.insert(base);
        }
    }
    debug!(bases = ?collapsed, "fileset walk roots");
    collapsed
}

/// File hasher serving fixed hashes, for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct StaticFileHasher {
    pub(crate) files: BTreeMap<String, String>,
}

#[cfg(test)]
impl StaticFileHasher {
    pub(crate) fn with_files(files: &[(&str, &str)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(p, h)| (p.to_string(), h.to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
impl FileHasher for StaticFileHasher {
    fn hash_files_matching_globs(
        &self,
        _root: &Path,
        patterns: &[String],
    ) -> Result<BTreeMap<String, String>, HashError> {
        let set = PatternSet::new(patterns)?;
        Ok(self
            .files
            .iter()
            .filter(|(path, _)| set.matches(path))
            .map(|(p, h)| (p.clone(), h.clone()))
            .collect())
    }
}
