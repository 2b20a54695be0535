use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use zip::ZipArchive;
use zip::result::ZipError;

use super::ArchiveParser;
use crate::package::{ContentCategory, PackageRecord};
use crate::runtime::Runtime;

/// Name of the manifest embedded at the root of every archive.
const MANIFEST_NAME: &str = "meta.json";

/// Manifests larger than this are rejected rather than buffered.
const MAX_MANIFEST_BYTES: u64 = 8 * 1024 * 1024;

/// The subset of the embedded manifest the index cares about.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    creator_name: Option<String>,
    #[serde(default)]
    package_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    license_type: Option<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, serde_json::Value>,
    /// Set by optimizers that repack an archive.
    #[serde(default)]
    optimized: bool,
    /// Modification ticks of the archive before it was repacked.
    #[serde(default)]
    original_modified_ticks: Option<i64>,
}

/// Parser for `.var` archives (zip containers with a `meta.json` manifest).
pub struct VarArchiveParser<R: Runtime> {
    runtime: Arc<R>,
}

impl<R: Runtime> VarArchiveParser<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        Self { runtime }
    }
}

impl<R: Runtime> ArchiveParser for VarArchiveParser<R> {
    #[tracing::instrument(skip(self))]
    fn parse(&self, path: &Path) -> Result<PackageRecord> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Archive path has no file name: {:?}", path))?;

        let reader = self
            .runtime
            .open(path)
            .with_context(|| format!("Failed to open archive at {:?}", path))?;
        let mut archive = ZipArchive::new(reader).context("Failed to parse ZIP archive")?;

        let mut record = PackageRecord::from_filename(filename);
        record.path = path.to_path_buf();

        for i in 0..archive.len() {
            let entry = archive
                .by_index_raw(i)
                .with_context(|| format!("Failed to read ZIP entry {}", i))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().replace('\\', "/");
            if let Some(category) = classify_entry(&name) {
                record.categories.insert(category);
                *record.content_counts.entry(category).or_insert(0) += 1;
            } else if is_preview_image(&name) {
                record.preview_images.push(name.clone());
            }
            record.content_list.push(name);
        }

        match read_manifest(&mut archive)? {
            Some(manifest) => {
                // Blank names keep what the file name says.
                if let Some(creator) = manifest.creator_name.filter(|c| !c.trim().is_empty()) {
                    record.creator = creator;
                }
                if let Some(package) = manifest.package_name.filter(|p| !p.trim().is_empty()) {
                    record.package_name = package;
                }
                record.description = manifest.description.filter(|d| !d.is_empty());
                record.license_type = manifest.license_type.filter(|l| !l.is_empty());
                record.dependencies = manifest.dependencies.into_keys().collect();
                record.is_optimized = manifest.optimized;
                if manifest.optimized {
                    record.modified_date = manifest.original_modified_ticks;
                }
            }
            None => debug!("{} has no {}", filename, MANIFEST_NAME),
        }

        Ok(record)
    }
}

fn read_manifest<T: Read + std::io::Seek>(archive: &mut ZipArchive<T>) -> Result<Option<Manifest>> {
    let entry = match archive.by_name(MANIFEST_NAME) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e).context("Failed to read manifest entry"),
    };

    let mut content = String::new();
    entry
        .take(MAX_MANIFEST_BYTES)
        .read_to_string(&mut content)
        .context("Failed to read manifest")?;

    let content = content.trim_start_matches('\u{feff}');
    let manifest = serde_json::from_str(content).context("Invalid meta.json")?;
    Ok(Some(manifest))
}

/// Classify an archive entry by the content folder it lives in.
///
/// Only primary content files are counted; previews and companion files
/// return `None`.
pub fn classify_entry(entry: &str) -> Option<ContentCategory> {
    let lower = entry.to_ascii_lowercase();
    let ext = lower.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    let under = |prefix: &str| lower.starts_with(prefix);

    let category = if under("saves/scene/") && ext == "json" {
        ContentCategory::Scenes
    } else if (under("custom/atom/person/appearance/") && ext == "vap")
        || (under("saves/person/appearance/") && ext == "json")
    {
        ContentCategory::Looks
    } else if under("custom/clothing/") && ext == "vam" {
        ContentCategory::Clothing
    } else if under("custom/hair/") && ext == "vam" {
        ContentCategory::Hair
    } else if under("custom/atom/person/morphs/") && ext == "vmi" {
        ContentCategory::Morphs
    } else if (under("custom/atom/person/pose/") && ext == "vap")
        || (under("saves/person/pose/") && ext == "json")
    {
        ContentCategory::Poses
    } else if under("custom/atom/person/skin/") && ext == "vap" {
        ContentCategory::Skins
    } else if (under("custom/atom/person/textures/") || under("textures/"))
        && matches!(ext, "jpg" | "jpeg" | "png" | "tif" | "tiff")
    {
        ContentCategory::Textures
    } else if matches!(ext, "mp3" | "wav" | "ogg") {
        ContentCategory::Sounds
    } else if ext == "assetbundle" || ext == "scene" {
        ContentCategory::Assets
    } else if under("custom/scripts/") && matches!(ext, "cs" | "cslist" | "dll") {
        ContentCategory::Plugins
    } else {
        return None;
    };
    Some(category)
}

fn is_preview_image(entry: &str) -> bool {
    let lower = entry.to_ascii_lowercase();
    (lower.starts_with("saves/") || lower.starts_with("custom/"))
        && (lower.ends_with(".jpg") || lower.ends_with(".png"))
}
