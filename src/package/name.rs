//! Archive file naming: `Creator.Package.Version.var`.

use std::fmt;
use std::path::Path;

/// File extension of package archives, without the dot.
pub const ARCHIVE_EXTENSION: &str = "var";

/// Identity of one archive derived from its file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageName {
    pub creator: String,
    pub package: String,
    /// Version number; 0 when the name carries no numeric version.
    pub version: u32,
}

impl PackageName {
    /// Parse a strict `Creator.Package.Version[.var]` name.
    ///
    /// Returns `None` unless there are at least three segments and the last
    /// one is an integer.
    pub fn parse(name: &str) -> Option<Self> {
        let stem = strip_archive_extension(name);
        let (rest, version) = stem.rsplit_once('.')?;
        let version = version.parse::<u32>().ok()?;
        let (creator, package) = rest.split_once('.')?;
        if creator.is_empty() || package.is_empty() {
            return None;
        }
        Some(Self {
            creator: creator.to_string(),
            package: package.to_string(),
            version,
        })
    }

    /// Best-effort parse used when the archive itself cannot be read.
    pub fn parse_lenient(name: &str) -> Self {
        if let Some(parsed) = Self::parse(name) {
            return parsed;
        }

        let stem = strip_archive_extension(name);
        let (rest, version) = match stem.rsplit_once('.') {
            Some((rest, v)) => match v.parse::<u32>() {
                Ok(version) => (rest, version),
                Err(_) => (stem, 0),
            },
            None => (stem, 0),
        };
        match rest.split_once('.') {
            Some((creator, package)) => Self {
                creator: creator.to_string(),
                package: package.to_string(),
                version,
            },
            None => Self {
                creator: String::new(),
                package: rest.to_string(),
                version,
            },
        }
    }

    /// Version-independent identity, e.g. `Creator.Package`.
    pub fn base_name(&self) -> String {
        if self.creator.is_empty() {
            self.package.clone()
        } else {
            format!("{}.{}", self.creator, self.package)
        }
    }

    /// Full name including the version, e.g. `Creator.Package.3`.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.base_name(), self.version)
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

/// Strip a trailing `.var` (any case).
pub fn strip_archive_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext)) if ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION) => stem,
        _ => name,
    }
}

/// Whether a path names a package archive.
pub fn is_archive_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
}

/// Archive stem of a path: the file name without the `.var` extension.
pub fn archive_stem(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    Some(strip_archive_extension(file_name).to_string())
}
