use anyhow::{Context, Result};
use log::info;
use std::sync::Arc;

use crate::{
    config::{IndexConfig, Overrides},
    runtime::Runtime,
};

/// Delete the persisted metadata cache.
#[tracing::instrument(skip(runtime, overrides))]
pub fn cache_clear<R: Runtime>(runtime: Arc<R>, overrides: Overrides) -> Result<()> {
    let config = IndexConfig::load(runtime.as_ref())?.with_overrides(overrides);
    let path = config.resolved_cache_path(runtime.as_ref())?;

    if !runtime.exists(&path) {
        println!("No metadata cache at {}", path.display());
        return Ok(());
    }

    runtime
        .remove_file(&path)
        .with_context(|| format!("Failed to remove metadata cache {}", path.display()))?;
    info!("Removed {:?}", path);
    println!("Removed metadata cache at {}", path.display());
    Ok(())
}
