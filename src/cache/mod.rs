//! Content-addressed metadata cache.
//!
//! Maps an archive file name plus its content signature (size and
//! modification ticks) to the record parsed from it, so unchanged archives
//! are never re-opened. A hit requires all three key fields to match
//! exactly; any drift forces a re-parse.
//!
//! The cache is persisted to a single binary file (see [`codec`]). Loading is
//! forgiving: a missing, foreign or outdated file yields an empty cache.

pub mod codec;
mod saver;

use anyhow::{Context, Result};
use log::{debug, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::package::{PackageRecord, strip_archive_extension};
use crate::retry::with_retry;
use crate::runtime::Runtime;

pub use saver::CacheSaver;

/// One cached record with the signature it was parsed under.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub size: u64,
    pub mtime_ticks: i64,
    pub record: PackageRecord,
}

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Size and modification ticks of an archive.
type Signature = (u64, i64);

/// Thread-safe metadata cache keyed by archive file name and signature.
///
/// Copies of one archive in different folders share a file name but
/// usually not a signature, so each name holds any number of signatures.
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: RwLock<HashMap<String, HashMap<Signature, PackageRecord>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a record by archive name and content signature.
    ///
    /// Returns an owned copy; callers never share a record with the cache.
    pub fn try_get(&self, archive_name: &str, size: u64, mtime_ticks: i64) -> Option<PackageRecord> {
        let entries = self.entries.read();
        match entries
            .get(archive_name)
            .and_then(|signatures| signatures.get(&(size, mtime_ticks)))
        {
            Some(record) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(record.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a copy of a record under an archive name and signature.
    pub fn put(&self, archive_name: &str, record: &PackageRecord, size: u64, mtime_ticks: i64) {
        self.entries
            .write()
            .entry(archive_name.to_string())
            .or_default()
            .insert((size, mtime_ticks), record.clone());
    }

    /// Remove entries by exact archive name (`A.B.1.var`) or by stem
    /// (`A.B.1`), whatever their signature. Returns the number of entries
    /// removed.
    pub fn remove(&self, name_or_key: &str) -> usize {
        let stem = strip_archive_extension(name_or_key);
        let mut entries = self.entries.write();
        let mut removed = 0;
        entries.retain(|name, signatures| {
            let matches = name == name_or_key || strip_archive_extension(name) == stem;
            if matches {
                removed += signatures.len();
            }
            !matches
        });
        removed
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of (name, signature) entries.
    pub fn len(&self) -> usize {
        self.entries.read().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().values().all(HashMap::is_empty)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Load a persisted cache. Never fails: problems are logged and an empty
    /// cache is returned.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime>(runtime: &R, path: &Path) -> Self {
        let cache = Self::new();
        if !runtime.exists(path) {
            debug!("No metadata cache at {:?}", path);
            return cache;
        }

        let decoded = runtime
            .read(path)
            .and_then(|data| codec::decode(&data));
        match decoded {
            Ok(entries) => {
                debug!("Loaded {} cached record(s) from {:?}", entries.len(), path);
                let mut map = cache.entries.write();
                for (name, entry) in entries {
                    map.entry(name)
                        .or_default()
                        .insert((entry.size, entry.mtime_ticks), entry.record);
                }
            }
            Err(e) => {
                warn!("Ignoring unusable metadata cache {:?}: {:#}", path, e);
            }
        }
        cache
    }

    /// Persist the cache, replacing the file atomically.
    #[tracing::instrument(skip(self, runtime))]
    pub fn save<R: Runtime>(&self, runtime: &R, path: &Path) -> Result<()> {
        let entries: Vec<(String, CacheEntry)> = self
            .entries
            .read()
            .iter()
            .flat_map(|(name, signatures)| {
                signatures.iter().map(|(&(size, mtime_ticks), record)| {
                    (
                        name.clone(),
                        CacheEntry {
                            size,
                            mtime_ticks,
                            record: record.clone(),
                        },
                    )
                })
            })
            .collect();
        let data = codec::encode(&entries)?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !runtime.exists(parent)
        {
            runtime.create_dir_all(parent)?;
        }

        let tmp_path = path.with_extension("tmp");
        runtime
            .write(&tmp_path, &data)
            .with_context(|| format!("Failed to write metadata cache to {:?}", tmp_path))?;
        with_retry("replace metadata cache", || runtime.rename(&tmp_path, path))
            .with_context(|| format!("Failed to replace metadata cache at {:?}", path))?;

        debug!("Saved {} cached record(s) to {:?}", entries.len(), path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockRuntime, RealRuntime};
    use mockall::predicate::eq;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn record(name: &str) -> PackageRecord {
        PackageRecord::from_filename(name)
    }

    #[test]
    fn test_try_get_requires_exact_signature() {
        let cache = MetadataCache::new();
        cache.put("A.B.1.var", &record("A.B.1.var"), 100, 5000);

        assert!(cache.try_get("A.B.1.var", 100, 5000).is_some());
        assert!(cache.try_get("A.B.1.var", 101, 5000).is_none());
        assert!(cache.try_get("A.B.1.var", 100, 5001).is_none());
        assert!(cache.try_get("A.B.2.var", 100, 5000).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 3);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_returned_records_are_independent_copies() {
        let cache = MetadataCache::new();
        cache.put("A.B.1.var", &record("A.B.1.var"), 1, 1);

        let mut first = cache.try_get("A.B.1.var", 1, 1).unwrap();
        first.missing_dependencies.push("X.Y.latest".into());

        let second = cache.try_get("A.B.1.var", 1, 1).unwrap();
        assert!(second.missing_dependencies.is_empty());
    }

    #[test]
    fn test_remove_by_stem_or_exact_key() {
        let cache = MetadataCache::new();
        cache.put("A.B.1.var", &record("A.B.1.var"), 1, 1);
        cache.put("A.B.2.var", &record("A.B.2.var"), 1, 1);

        assert_eq!(cache.remove("A.B.1"), 1);
        assert_eq!(cache.remove("A.B.2.var"), 1);
        assert_eq!(cache.remove("A.B.3"), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_copies_with_one_name_keep_their_own_signatures() {
        let cache = MetadataCache::new();
        let mut archived = record("A.B.1.var");
        archived.description = Some("archived copy".into());
        cache.put("A.B.1.var", &record("A.B.1.var"), 100, 1);
        cache.put("A.B.1.var", &archived, 100, 2);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.try_get("A.B.1.var", 100, 1), Some(record("A.B.1.var")));
        assert_eq!(cache.try_get("A.B.1.var", 100, 2), Some(archived));

        assert_eq!(cache.remove("A.B.1"), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let cache = MetadataCache::new();
        cache.put("A.B.1.var", &record("A.B.1.var"), 1, 1);
        cache.clear();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_save_and_load_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested/metadata.cache");

        let cache = MetadataCache::new();
        cache.put("A.B.1.var", &record("A.B.1.var"), 10, 20);
        cache.put("C.D.2.var", &record("C.D.2.var"), 30, 40);
        cache.put("C.D.2.var", &record("C.D.2.var"), 30, 41);
        cache.save(&RealRuntime, &path)?;
        assert!(!path.with_extension("tmp").exists());

        let loaded = MetadataCache::load(&RealRuntime, &path);
        assert_eq!(loaded.len(), 3);
        assert!(loaded.try_get("C.D.2.var", 30, 41).is_some());
        assert_eq!(
            loaded.try_get("C.D.2.var", 30, 40),
            Some(record("C.D.2.var"))
        );
        Ok(())
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let mut runtime = MockRuntime::new();
        let path = PathBuf::from("/cache/metadata.cache");
        runtime
            .expect_exists()
            .with(eq(path.clone()))
            .returning(|_| false);

        let cache = MetadataCache::load(&runtime, &path);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_load_garbage_is_empty() {
        let mut runtime = MockRuntime::new();
        let path = PathBuf::from("/cache/metadata.cache");
        runtime.expect_exists().returning(|_| true);
        runtime
            .expect_read()
            .with(eq(path.clone()))
            .returning(|_| Ok(b"garbage that is not a cache".to_vec()));

        let cache = MetadataCache::load(&runtime, &path);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_load_read_error_is_empty() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| true);
        runtime
            .expect_read()
            .returning(|_| Err(anyhow::anyhow!("disk on fire")));

        let cache = MetadataCache::load(&runtime, Path::new("/cache/metadata.cache"));
        assert!(cache.is_empty());
    }
}
