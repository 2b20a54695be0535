use anyhow::{Context, Result, bail};
use log::{debug, info};
use std::sync::Arc;

use crate::{
    archive::VarArchiveParser,
    cache::MetadataCache,
    config::{IndexConfig, Overrides, config_file_path},
    index::{IndexSnapshot, PackageIndex, PassReport},
    package::{DependencyRef, KnownPackages, strip_archive_extension},
    runtime::Runtime,
    scan::discover,
};

mod cache;
mod query;
mod scan;

pub use cache::cache_clear;
pub use query::{critical, dependents, deps, impact, missing, old, orphans, show, stats};
pub use scan::scan;

/// A loaded configuration plus an index backed by the persisted cache.
pub struct Session<R: Runtime + 'static> {
    pub runtime: Arc<R>,
    pub config: IndexConfig,
    pub index: PackageIndex<R, VarArchiveParser<R>>,
}

impl<R: Runtime + 'static> Session<R> {
    #[tracing::instrument(skip(runtime, overrides))]
    pub fn open(runtime: Arc<R>, overrides: Overrides) -> Result<Self> {
        let config = IndexConfig::load(runtime.as_ref())?.with_overrides(overrides);
        if config.roots.is_empty() {
            bail!(
                "No package folders configured. Pass --vam-dir or add roots to {}",
                config_file_path(runtime.as_ref())?.display()
            );
        }

        let options = config.index_options(runtime.as_ref())?;
        let cache = match &options.cache_path {
            Some(path) => MetadataCache::load(runtime.as_ref(), path),
            None => MetadataCache::new(),
        };
        debug!("Metadata cache holds {} record(s)", cache.len());

        let parser = VarArchiveParser::new(Arc::clone(&runtime));
        let index = PackageIndex::new(Arc::clone(&runtime), parser, Arc::new(cache), options)?;
        Ok(Self {
            runtime,
            config,
            index,
        })
    }

    /// Discover every archive and run one pass.
    pub async fn refresh(&self) -> Result<(PassReport, Arc<IndexSnapshot>)> {
        let descriptors = discover(
            Arc::clone(&self.runtime),
            &self.config.roots,
            &self.config.exclude,
        )
        .await?;
        info!("Discovered {} archive(s)", descriptors.len());

        let progress = |done: usize, total: usize| debug!("Indexed {}/{}", done, total);
        let report = self.index.reconcile(&descriptors, Some(&progress));
        Ok((report, self.index.snapshot()))
    }

    /// Wait for the cache save requested by the last pass.
    pub fn close(self) {
        self.index.flush();
    }
}

/// Open a session and run one pass.
pub(crate) async fn load<R: Runtime + 'static>(
    runtime: Arc<R>,
    overrides: Overrides,
) -> Result<(Session<R>, PassReport, Arc<IndexSnapshot>)> {
    let session = Session::open(runtime, overrides)?;
    let (report, snapshot) = session.refresh().await?;
    Ok((session, report, snapshot))
}

/// Resolve a user-supplied name to a graph node.
///
/// Accepts a full name with or without `.var`, or a dependency reference
/// such as `Creator.Package.latest`.
pub(crate) fn resolve_name(snapshot: &IndexSnapshot, name: &str) -> Result<String> {
    let stem = strip_archive_extension(name.trim());
    if snapshot.graph.contains(stem) {
        return Ok(stem.to_string());
    }

    let known: KnownPackages = snapshot.canonical_records().map(|r| r.full_name()).collect();
    known
        .resolve(&DependencyRef::parse(stem))
        .filter(|resolved| snapshot.graph.contains(resolved))
        .with_context(|| format!("Package not found: {}", name))
}
