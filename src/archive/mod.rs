//! Archive parsing collaborator.
//!
//! The index never opens archives itself; it asks an [`ArchiveParser`] for a
//! draft record and treats any error as a corrupted archive.

mod var;

use anyhow::Result;
use std::path::Path;

use crate::package::PackageRecord;

pub use var::{VarArchiveParser, classify_entry};

/// Produces a draft metadata record for one archive on disk.
///
/// Identity fields come from the file name; the parser fills in content
/// categories, counts, dependencies and manifest details. Location fields
/// are overlaid by the caller.
#[cfg_attr(test, mockall::automock)]
pub trait ArchiveParser: Send + Sync {
    fn parse(&self, path: &Path) -> Result<PackageRecord>;
}
