use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use super::name::{PackageName, strip_archive_extension};
use super::role::VariantRole;
use crate::runtime::FileStat;

/// Kind of content an archive ships.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ContentCategory {
    Scenes,
    Looks,
    Clothing,
    Hair,
    Morphs,
    Poses,
    Skins,
    Textures,
    Sounds,
    Assets,
    Plugins,
}

impl fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Public metadata for one copy of a package archive.
///
/// Records are plain values: every map entry and every variant owns its own
/// copy, so annotating one key never changes another.
///
/// The field order is part of the on-disk cache format.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PackageRecord {
    pub filename: String,
    pub creator: String,
    pub package_name: String,
    pub version: u32,
    pub path: PathBuf,
    pub file_size: u64,
    /// Filesystem modification time in 100 ns ticks since the Unix epoch.
    pub mtime_ticks: i64,
    /// Date shown to users. Optimized archives keep their original date.
    pub modified_date: Option<i64>,
    pub description: Option<String>,
    pub license_type: Option<String>,
    pub dependencies: Vec<String>,
    pub content_list: Vec<String>,
    pub preview_images: Vec<String>,
    pub categories: BTreeSet<ContentCategory>,
    pub content_counts: BTreeMap<ContentCategory, u32>,
    pub is_corrupted: bool,
    pub corruption_reason: Option<String>,
    pub is_optimized: bool,
    pub is_duplicate: bool,
    pub variant_role: VariantRole,
    pub status: String,
    pub duplicate_location_count: u32,
    pub missing_dependencies: Vec<String>,
    pub dependency_count: u32,
    pub dependents_count: u32,
    pub is_old_version: bool,
    pub latest_version: u32,
}

impl PackageRecord {
    /// Record with the identity fields derived from the archive's file name.
    pub fn from_filename(filename: &str) -> Self {
        let name = PackageName::parse_lenient(filename);
        Self {
            filename: filename.to_string(),
            creator: name.creator,
            package_name: name.package,
            version: name.version,
            duplicate_location_count: 1,
            ..Default::default()
        }
    }

    /// Fallback record for an archive that could not be read.
    pub fn corrupted(filename: &str, reason: impl Into<String>) -> Self {
        Self {
            is_corrupted: true,
            corruption_reason: Some(reason.into()),
            ..Self::from_filename(filename)
        }
    }

    /// Full name (archive stem), e.g. `Creator.Package.3`.
    pub fn full_name(&self) -> &str {
        strip_archive_extension(&self.filename)
    }

    /// Version-independent identity, e.g. `Creator.Package`.
    pub fn base_name(&self) -> String {
        if self.creator.is_empty() {
            self.package_name.clone()
        } else {
            format!("{}.{}", self.creator, self.package_name)
        }
    }

    /// Overlay the location of one discovered copy onto the record.
    ///
    /// The display date follows the filesystem unless the archive was
    /// optimized, in which case its original date is kept.
    pub fn apply_location(&mut self, role: VariantRole, status: &str, path: &Path, stat: FileStat) {
        self.variant_role = role;
        self.status = status.to_string();
        self.path = path.to_path_buf();
        self.file_size = stat.size;
        self.mtime_ticks = stat.mtime_ticks;
        if let Some(file_name) = path.file_name().and_then(|n| n.to_str()) {
            self.filename = file_name.to_string();
        }
        if !self.is_optimized || self.modified_date.is_none() {
            self.modified_date = Some(stat.mtime_ticks);
        }
    }

    /// Hash of the content that defines this record, never zero.
    ///
    /// Location and pass annotations are excluded; two copies of the same
    /// archive hash alike.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.full_name().as_bytes());
        hasher.update(&self.version.to_le_bytes());
        hasher.update(&[u8::from(self.is_corrupted), u8::from(self.is_optimized)]);
        for dependency in &self.dependencies {
            hasher.update(dependency.as_bytes());
            hasher.update(&[0]);
        }
        for entry in &self.content_list {
            hasher.update(entry.as_bytes());
            hasher.update(&[0]);
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(bytes).max(1)
    }
}
