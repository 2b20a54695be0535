//! Package domain types.
//!
//! This module provides archive naming, the public metadata record, variant
//! roles, dependency reference parsing and the known-package index used to
//! decide whether dependencies are satisfied.

mod known;
mod name;
mod record;
mod reference;
mod role;

pub use known::KnownPackages;
pub use name::{
    ARCHIVE_EXTENSION, PackageName, archive_stem, is_archive_path, strip_archive_extension,
};
pub use record::{ContentCategory, PackageRecord};
pub use reference::{DependencyRef, RefKind};
pub use role::VariantRole;
