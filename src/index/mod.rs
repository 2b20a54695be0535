//! Reconciliation engine.
//!
//! A [`PackageIndex`] turns the descriptors of one directory scan into a
//! materialized map of records:
//!
//! 1. Every archive stem seen in the scan starts a new generation of its
//!    [`VariantStore`](store::VariantStore); its previous output is retracted.
//! 2. Each descriptor reuses the previous copy at the same path when the size
//!    and modification time are unchanged. Otherwise the record comes from the
//!    metadata cache or, failing that, from the archive parser (on the worker
//!    pool).
//! 3. Stores are finalized and materialized: one canonical key per stem plus
//!    role-suffixed keys for the other copies.
//! 4. Stems absent from the scan are dropped.
//! 5. Old-version and missing-dependency analyses run, the dependency graph
//!    is rebuilt, and a new [`IndexSnapshot`] generation is published.
//!
//! Passes are mutually exclusive. Readers only ever see fully published
//! generations.

mod analysis;
mod store;
mod variant;

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::archive::ArchiveParser;
use crate::cache::{CacheSaver, MetadataCache};
use crate::graph::DependencyGraph;
use crate::package::{KnownPackages, PackageRecord};
use crate::retry::with_retry;
use crate::runtime::{FileStat, Runtime, path_key};
use crate::scan::FileDescriptor;

use store::VariantStore;
pub use variant::{SUFFIX_SEPARATOR, Variant, VariantKey};

/// Progress callback: `(processed, total)`.
pub type Progress<'a> = &'a (dyn Fn(usize, usize) + Sync);

/// Default number of items between progress callbacks.
pub const DEFAULT_PROGRESS_INTERVAL: usize = 100;

/// Worker pool size when none is configured: two per CPU.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(4)
}

/// Tuning knobs for a [`PackageIndex`].
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub workers: usize,
    pub progress_interval: usize,
    /// Where the metadata cache is persisted. `None` keeps it in memory.
    pub cache_path: Option<PathBuf>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            cache_path: None,
        }
    }
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassReport {
    pub generation: u64,
    pub descriptors: usize,
    pub packages: usize,
    pub records: usize,
    pub reused: usize,
    pub cache_hits: usize,
    pub parsed: usize,
    pub corrupted: usize,
    pub removed: usize,
    pub missing_dependencies: usize,
    #[serde(skip)]
    pub duration: Duration,
}

/// An immutable, published generation of the index.
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    pub generation: u64,
    pub records: BTreeMap<VariantKey, PackageRecord>,
    pub graph: Arc<DependencyGraph>,
    /// Preview image entries of each stem's preferred copy.
    pub previews: BTreeMap<String, Vec<String>>,
}

impl IndexSnapshot {
    pub fn get(&self, key: &VariantKey) -> Option<&PackageRecord> {
        self.records.get(key)
    }

    /// Look up a record by its display key (`A.B.1`, `A.B.1#archived`).
    pub fn find(&self, display_key: &str) -> Option<&PackageRecord> {
        let key: VariantKey = display_key.parse().ok()?;
        self.records.get(&key)
    }

    /// The preferred record of an archive stem.
    pub fn canonical(&self, stem: &str) -> Option<&PackageRecord> {
        self.records.get(&VariantKey::canonical(stem))
    }

    pub fn canonical_records(&self) -> impl Iterator<Item = &PackageRecord> {
        self.records
            .iter()
            .filter(|(k, _)| k.is_canonical())
            .map(|(_, r)| r)
    }

    /// The map keyed by display strings.
    pub fn display_map(&self) -> BTreeMap<String, &PackageRecord> {
        self.records
            .iter()
            .map(|(k, r)| (k.to_string(), r))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Default)]
struct PassState {
    stores: BTreeMap<String, VariantStore>,
    output: BTreeMap<VariantKey, PackageRecord>,
    previews: BTreeMap<String, Vec<String>>,
    generation: u64,
}

enum LoadOutcome {
    CacheHit,
    Parsed,
    Corrupted,
}

pub struct PackageIndex<R: Runtime + 'static, P: ArchiveParser> {
    runtime: Arc<R>,
    parser: P,
    cache: Arc<MetadataCache>,
    saver: Option<CacheSaver<R>>,
    pool: rayon::ThreadPool,
    progress_interval: usize,
    state: Mutex<PassState>,
    published: RwLock<Arc<IndexSnapshot>>,
}

impl<R: Runtime + 'static, P: ArchiveParser> PackageIndex<R, P> {
    pub fn new(
        runtime: Arc<R>,
        parser: P,
        cache: Arc<MetadataCache>,
        options: IndexOptions,
    ) -> Result<Self> {
        let workers = options.workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("varidx-parse-{}", i))
            .build()
            .context("Failed to build parser worker pool")?;
        debug!("Parser pool with {} worker(s)", workers);

        let saver = options
            .cache_path
            .map(|path| CacheSaver::new(Arc::clone(&cache), Arc::clone(&runtime), path));

        Ok(Self {
            runtime,
            parser,
            cache,
            saver,
            pool,
            progress_interval: options.progress_interval.max(1),
            state: Mutex::new(PassState::default()),
            published: RwLock::new(Arc::new(IndexSnapshot::default())),
        })
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    /// The latest published generation.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.published.read())
    }

    /// Wait for any queued cache save to finish.
    pub fn flush(&self) {
        if let Some(saver) = &self.saver {
            saver.flush();
        }
    }

    /// Run one reconciliation pass over a complete scan.
    ///
    /// Individual archive failures never abort the pass; they produce
    /// corrupted records.
    #[tracing::instrument(skip(self, descriptors, progress), fields(descriptors = descriptors.len()))]
    pub fn reconcile(
        &self,
        descriptors: &[FileDescriptor],
        progress: Option<Progress<'_>>,
    ) -> PassReport {
        let started = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let total = descriptors.len();
        let mut report = PassReport {
            descriptors: total,
            ..Default::default()
        };

        // Begin rebuilds and reuse unchanged copies.
        let mut touched = BTreeSet::new();
        let mut misses = Vec::new();
        for descriptor in descriptors {
            if touched.insert(descriptor.package.clone()) {
                state
                    .stores
                    .entry(descriptor.package.clone())
                    .or_default()
                    .begin_rebuild(&mut state.output);
            }
            let Some(store) = state.stores.get_mut(&descriptor.package) else {
                continue;
            };

            let key = path_key(&descriptor.path);
            let reused = store
                .previous(&key)
                .filter(|prev| prev.is_unchanged(descriptor.size, descriptor.mtime_ticks))
                .map(|prev| prev.record.clone());
            match reused {
                Some(record) => {
                    store.insert(variant_for(record, descriptor));
                    report.reused += 1;
                }
                None => misses.push(descriptor),
            }
        }

        let done = AtomicUsize::new(report.reused);
        if let Some(progress) = progress
            && report.reused > 0
        {
            progress(report.reused, total);
        }

        // Cache lookups and parses for everything else.
        let interval = self.progress_interval;
        let loaded: Vec<(PackageRecord, LoadOutcome)> = self.pool.install(|| {
            misses
                .par_iter()
                .map(|descriptor| {
                    let result = self.load_record(descriptor);
                    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(progress) = progress
                        && n % interval == 0
                    {
                        progress(n, total);
                    }
                    result
                })
                .collect()
        });

        for (descriptor, (record, outcome)) in misses.iter().zip(loaded) {
            match outcome {
                LoadOutcome::CacheHit => report.cache_hits += 1,
                LoadOutcome::Parsed => report.parsed += 1,
                LoadOutcome::Corrupted => {
                    report.parsed += 1;
                    report.corrupted += 1;
                }
            }
            if let Some(store) = state.stores.get_mut(&descriptor.package) {
                store.insert(variant_for(record, descriptor));
            }
        }

        // Finalize and materialize every touched store.
        for stem in &touched {
            if let Some(store) = state.stores.get_mut(stem) {
                store.finalize();
                store.materialize(stem, &mut state.output);
                update_preview_index(&mut state.previews, stem, store);
            }
        }

        // Drop stems that were not seen.
        let gone: Vec<String> = state
            .stores
            .keys()
            .filter(|stem| !touched.contains(*stem))
            .cloned()
            .collect();
        for stem in &gone {
            if let Some(mut store) = state.stores.remove(stem) {
                store.retract(&mut state.output);
            }
            state.previews.remove(stem);
            debug!("{} is gone", stem);
        }
        report.removed = gone.len();
        report.packages = touched.len();

        report.missing_dependencies = self.publish(state);
        report.generation = state.generation;
        report.records = state.output.len();
        report.duration = started.elapsed();

        if let Some(progress) = progress {
            progress(total, total);
        }
        if let Some(saver) = &self.saver {
            saver.request();
        }

        info!(
            "Pass {}: {} archive(s), {} package(s), {} reused, {} cache hit(s), {} parsed, {} corrupted, {} removed in {:?}",
            report.generation,
            report.descriptors,
            report.packages,
            report.reused,
            report.cache_hits,
            report.parsed,
            report.corrupted,
            report.removed,
            report.duration
        );
        report
    }

    /// Forget the cached metadata of an archive stem so its copies are
    /// re-parsed on the next pass. Returns the number of cache entries
    /// removed.
    pub fn invalidate_package(&self, stem: &str) -> usize {
        let removed = self.cache.remove(stem);
        if let Some(store) = self.state.lock().stores.get_mut(stem) {
            store.invalidate();
        }
        debug!("Invalidated {} ({} cache entr(ies))", stem, removed);
        removed
    }

    /// Replace the record of one copy after it was modified in place,
    /// without a full scan.
    #[tracing::instrument(skip(self, record))]
    pub fn update_package(&self, stem: &str, record: PackageRecord, path: &Path) -> Result<()> {
        let stat = with_retry("stat archive", || self.runtime.metadata(path))
            .with_context(|| format!("Failed to stat {:?}", path))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Archive path has no file name: {:?}", path))?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(store) = state.stores.get_mut(stem) else {
            bail!("{} is not indexed", stem);
        };
        let key = path_key(path);
        let Some(variant) = store.variant_mut(&key) else {
            bail!("{} has no copy at {:?}", stem, path);
        };

        if !record.is_corrupted {
            self.cache.put(filename, &record, stat.size, stat.mtime_ticks);
        }
        let role = variant.role;
        let status = variant.status.clone();
        *variant = Variant::new(record, role, &status, path.to_path_buf(), stat);

        store.finalize();
        store.materialize(stem, &mut state.output);
        update_preview_index(&mut state.previews, stem, store);
        self.publish(state);
        drop(guard);

        if let Some(saver) = &self.saver {
            saver.request();
        }
        Ok(())
    }

    /// Clear missing-dependency entries satisfied by newly added packages,
    /// without a full scan. Returns the number of entries cleared.
    pub fn apply_new_packages<S: AsRef<str>>(&self, full_names: &[S]) -> usize {
        let mut state = self.state.lock();
        let mut known = analysis::known_packages(&state.output);
        for name in full_names {
            known.insert(name.as_ref());
        }
        let cleared = analysis::clear_satisfied(&mut state.output, &known);
        if cleared > 0 {
            let graph = Arc::clone(&self.published.read().graph);
            publish_snapshot(&self.published, &mut state, graph);
        }
        debug!("{} missing dependenc(ies) now satisfied", cleared);
        cleared
    }

    fn load_record(&self, descriptor: &FileDescriptor) -> (PackageRecord, LoadOutcome) {
        let filename = descriptor
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}.var", descriptor.package));

        if let Some(record) =
            self.cache
                .try_get(&filename, descriptor.size, descriptor.mtime_ticks)
        {
            return (record, LoadOutcome::CacheHit);
        }

        match self.parser.parse(&descriptor.path) {
            Ok(record) if record.is_corrupted => (record, LoadOutcome::Corrupted),
            Ok(record) => {
                self.cache
                    .put(&filename, &record, descriptor.size, descriptor.mtime_ticks);
                (record, LoadOutcome::Parsed)
            }
            Err(e) => {
                warn!("Unreadable archive {:?}: {:#}", descriptor.path, e);
                (
                    PackageRecord::corrupted(&filename, format!("{:#}", e)),
                    LoadOutcome::Corrupted,
                )
            }
        }
    }

    /// Run the analyses, rebuild the graph and publish a new generation.
    /// Returns the number of missing dependency entries.
    fn publish(&self, state: &mut PassState) -> usize {
        analysis::flag_old_versions(&mut state.output);
        let known: KnownPackages = analysis::known_packages(&state.output);
        let missing = analysis::find_missing_dependencies(&mut state.output, &known);

        let graph = DependencyGraph::build(
            state
                .output
                .iter()
                .filter(|(k, _)| k.is_canonical())
                .map(|(_, r)| r),
        );
        analysis::apply_graph_counts(&mut state.output, &graph);

        publish_snapshot(&self.published, state, Arc::new(graph));
        missing
    }
}

fn publish_snapshot(
    published: &RwLock<Arc<IndexSnapshot>>,
    state: &mut PassState,
    graph: Arc<DependencyGraph>,
) {
    state.generation += 1;
    let snapshot = Arc::new(IndexSnapshot {
        generation: state.generation,
        records: state.output.clone(),
        graph,
        previews: state.previews.clone(),
    });
    *published.write() = snapshot;
}

fn variant_for(record: PackageRecord, descriptor: &FileDescriptor) -> Variant {
    Variant::new(
        record,
        descriptor.role,
        &descriptor.status,
        descriptor.path.clone(),
        FileStat {
            size: descriptor.size,
            mtime_ticks: descriptor.mtime_ticks,
        },
    )
}

fn update_preview_index(
    previews: &mut BTreeMap<String, Vec<String>>,
    stem: &str,
    store: &VariantStore,
) {
    match store.preferred() {
        Some(variant) if !variant.record.preview_images.is_empty() => {
            previews.insert(stem.to_string(), variant.record.preview_images.clone());
        }
        _ => {
            previews.remove(stem);
        }
    }
}
