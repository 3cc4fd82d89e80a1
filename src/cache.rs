//! Diff-stat cache
//!
//! A JSON-file memo of per-commit diff statistics, keyed by the head SHA of
//! the `parent..head` diff. Loaded lazily on first access, rewritten after
//! every insert. Owned by the extraction scope that created it; there is no
//! process-global cache.
//!
//! Precondition: keying by head SHA alone assumes the commit's first parent
//! never changes across runs. That holds for append-only history; after a
//! history rewrite the cache goes stale and must be deleted by hand.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// File name of the cache inside the clone directory.
pub const CACHE_FILE: &str = ".mergeaudit-cache.json";

/// Diff statistics for one commit against its first parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub added: u64,
    pub removed: u64,
    pub file_count: u64,
    pub files: Vec<String>,
}

#[derive(Debug)]
pub enum CacheError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Io(e) => write!(f, "Cache file I/O error: {}", e),
            CacheError::Parse(e) => write!(f, "Corrupt cache file: {}", e),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::Io(e)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Parse(e)
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Lazily loaded, write-through cache of [`DiffStats`] keyed by head SHA.
#[derive(Debug)]
pub struct DiffStatCache {
    path: PathBuf,
    entries: Option<HashMap<String, DiffStats>>,
}

impl DiffStatCache {
    /// Cache backed by `CACHE_FILE` inside the given clone directory.
    pub fn in_dir<P: AsRef<Path>>(git_dir: P) -> DiffStatCache {
        DiffStatCache {
            path: git_dir.as_ref().join(CACHE_FILE),
            entries: None,
        }
    }

    fn load(&mut self) -> Result<&mut HashMap<String, DiffStats>> {
        if self.entries.is_none() {
            let entries = if self.path.exists() {
                let contents = std::fs::read_to_string(&self.path)?;
                serde_json::from_str(&contents)?
            } else {
                HashMap::new()
            };
            self.entries = Some(entries);
        }
        // Populated just above.
        Ok(self.entries.as_mut().unwrap())
    }

    pub fn get(&mut self, hexsha: &str) -> Result<Option<DiffStats>> {
        Ok(self.load()?.get(hexsha).cloned())
    }

    /// Insert and write the whole cache back to disk immediately.
    pub fn put(&mut self, hexsha: &str, stats: DiffStats) -> Result<()> {
        self.load()?.insert(hexsha.to_string(), stats);
        self.save()
    }

    fn save(&self) -> Result<()> {
        if let Some(entries) = &self.entries {
            let contents = serde_json::to_string(entries)?;
            std::fs::write(&self.path, contents)?;
        }
        Ok(())
    }
}
