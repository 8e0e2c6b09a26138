//! Build cache with content-addressed keys.
//!
//! Entries are stored at `{state_dir}/cache/{project}.json`. The key is a
//! SHA-256 over the project's tracked build inputs, so an entry stays valid
//! only while none of those files change.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};
use walkdir::{DirEntry, WalkDir};

use crate::core::types::RunStatus;
use crate::io::atomic::write_json_atomic;
use crate::io::config::CacheConfig;

/// Recorded outcome of a previous run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub hash: String,
    pub status: RunStatus,
    pub cycle_count: u32,
    pub started_at: String,
    pub ended_at: String,
}

/// Hash the tracked files under `root`.
///
/// Files are visited in sorted order. Each contributes its forward-slash
/// relative path, a NUL separator, its length and its bytes, so renames and
/// content edits both change the key.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn compute_key(root: &Path, cfg: &CacheConfig) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut files = 0usize;
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_skipped_dir(entry, cfg));
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if !entry.file_type().is_file() || !is_tracked(entry.path(), cfg) {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("relativize {}", entry.path().display()))?;
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let contents =
            fs::read(entry.path()).with_context(|| format!("read {}", entry.path().display()))?;
        hasher.update(rel.as_bytes());
        hasher.update([0u8]);
        hasher.update((contents.len() as u64).to_le_bytes());
        hasher.update(&contents);
        files += 1;
    }
    let key = hex::encode(hasher.finalize());
    debug!(files, key = %key, "computed cache key");
    Ok(key)
}

fn is_skipped_dir(entry: &DirEntry, cfg: &CacheConfig) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && cfg
            .skip_dirs
            .iter()
            .any(|name| entry.file_name().to_string_lossy() == name.as_str())
}

fn is_tracked(path: &Path, cfg: &CacheConfig) -> bool {
    let name_match = path
        .file_name()
        .map(|name| name.to_string_lossy())
        .is_some_and(|name| cfg.file_names.iter().any(|n| *n == name));
    let ext_match = path
        .extension()
        .map(|ext| ext.to_string_lossy())
        .is_some_and(|ext| cfg.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)));
    name_match || ext_match
}

/// One JSON file per project.
#[derive(Debug, Clone)]
pub struct BuildCache {
    dir: PathBuf,
}

impl BuildCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn cache_path(&self, project: &str) -> PathBuf {
        self.dir.join(format!("{project}.json"))
    }

    /// Return the stored entry only when its hash equals `key`.
    ///
    /// An unreadable entry is treated as a miss.
    pub fn lookup(&self, project: &str, key: &str) -> Result<Option<CacheEntry>> {
        let path = self.cache_path(project);
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read cache {}", path.display()))?;
        let entry: CacheEntry = match serde_json::from_str(&contents) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(path = %path.display(), err = %err, "ignoring corrupt cache entry");
                return Ok(None);
            }
        };
        if entry.hash != key {
            debug!(project, "cache entry is stale");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    pub fn store(&self, project: &str, entry: &CacheEntry) -> Result<()> {
        let path = self.cache_path(project);
        debug!(path = %path.display(), status = entry.status.as_str(), "saving cache entry");
        write_json_atomic(&path, entry)
    }

    /// All readable entries, sorted by project name.
    pub fn list(&self) -> Result<Vec<(String, CacheEntry)>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for item in fs::read_dir(&self.dir)
            .with_context(|| format!("read cache dir {}", self.dir.display()))?
        {
            let path = item?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Some(project) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read cache {}", path.display()))?;
            match serde_json::from_str::<CacheEntry>(&contents) {
                Ok(entry) => entries.push((project, entry)),
                Err(err) => warn!(path = %path.display(), err = %err, "skipping corrupt cache entry"),
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> tempfile::TempDir {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("app/src")).expect("mkdir");
        fs::write(root.join("settings.gradle"), "include ':app'\n").expect("write");
        fs::write(root.join("app/build.gradle"), "android {}\n").expect("write");
        fs::write(root.join("app/src/Main.kt"), "fun main() {}\n").expect("write");
        fs::write(root.join("gradlew"), "#!/bin/sh\n").expect("write");
        temp
    }

    fn entry(hash: &str, status: RunStatus) -> CacheEntry {
        CacheEntry {
            hash: hash.to_string(),
            status,
            cycle_count: 7,
            started_at: "2026-01-01T00:00:00+00:00".to_string(),
            ended_at: "2026-01-01T00:10:00+00:00".to_string(),
        }
    }

    #[test]
    fn key_is_stable_for_unchanged_tree() {
        let temp = project();
        let cfg = CacheConfig::default();
        let first = compute_key(temp.path(), &cfg).expect("key");
        let second = compute_key(temp.path(), &cfg).expect("key");
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn one_byte_change_in_tracked_file_changes_key() {
        let temp = project();
        let cfg = CacheConfig::default();
        let before = compute_key(temp.path(), &cfg).expect("key");
        fs::write(temp.path().join("app/build.gradle"), "android {}\r").expect("write");
        assert_ne!(compute_key(temp.path(), &cfg).expect("key"), before);
    }

    #[test]
    fn renaming_tracked_file_changes_key() {
        let temp = project();
        let cfg = CacheConfig::default();
        let before = compute_key(temp.path(), &cfg).expect("key");
        fs::rename(
            temp.path().join("app/src/Main.kt"),
            temp.path().join("app/src/App.kt"),
        )
        .expect("rename");
        assert_ne!(compute_key(temp.path(), &cfg).expect("key"), before);
    }

    #[test]
    fn untracked_and_skipped_files_do_not_change_key() {
        let temp = project();
        let cfg = CacheConfig::default();
        let before = compute_key(temp.path(), &cfg).expect("key");
        fs::write(temp.path().join("README.md"), "docs").expect("write");
        fs::create_dir_all(temp.path().join("app/build/tmp")).expect("mkdir");
        fs::write(temp.path().join("app/build/tmp/out.xml"), "<x/>").expect("write");
        fs::create_dir_all(temp.path().join(".git")).expect("mkdir");
        fs::write(temp.path().join(".git/config.json"), "{}").expect("write");
        assert_eq!(compute_key(temp.path(), &cfg).expect("key"), before);
    }

    #[test]
    fn lookup_requires_matching_hash() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = BuildCache::new(temp.path().join("cache"));
        assert_eq!(cache.lookup("demo", "abc").expect("lookup"), None);
        cache
            .store("demo", &entry("abc", RunStatus::Succeeded))
            .expect("store");
        assert_eq!(
            cache.lookup("demo", "abc").expect("lookup"),
            Some(entry("abc", RunStatus::Succeeded))
        );
        assert_eq!(cache.lookup("demo", "def").expect("lookup"), None);
    }

    #[test]
    fn store_overwrites_and_list_sorts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = BuildCache::new(temp.path());
        cache.store("zeta", &entry("1", RunStatus::Failed)).expect("store");
        cache.store("alpha", &entry("2", RunStatus::Failed)).expect("store");
        cache
            .store("alpha", &entry("3", RunStatus::Succeeded))
            .expect("store");
        fs::write(temp.path().join("broken.json"), "{").expect("write");
        let listed = cache.list().expect("list");
        let names: Vec<&str> = listed.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(listed[0].1.status, RunStatus::Succeeded);
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = BuildCache::new(temp.path());
        fs::write(cache.cache_path("demo"), "not json").expect("write");
        assert_eq!(cache.lookup("demo", "abc").expect("lookup"), None);
    }
}
