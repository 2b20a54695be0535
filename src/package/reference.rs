//! Dependency reference parsing.
//!
//! A dependency string names a package base plus a version selector in its
//! trailing segment:
//!
//! - `Creator.Package.7` - exactly version 7
//! - `Creator.Package.latest` - any version
//! - `Creator.Package.min32` - version 32 or newer

use std::fmt;
use std::str::FromStr;

use super::name::strip_archive_extension;

const LATEST_SUFFIX: &str = ".latest";
const MIN_PREFIX: &str = ".min";

/// How a dependency selects among the versions of its base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    Exact,
    Latest,
    Minimum,
}

/// A parsed dependency string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyRef {
    /// Version-independent package base, e.g. `Creator.Package`.
    pub base: String,
    pub kind: RefKind,
    /// Exact or minimum version. `None` for `Latest`, and for exact
    /// references whose trailing segment is not a number.
    pub version: Option<u32>,
    /// The dependency string as written, minus any `.var` extension.
    pub raw: String,
}

impl DependencyRef {
    /// Parse a dependency string. Parsing never fails: unrecognized forms
    /// become an exact reference without a version, which only a literal
    /// name match can satisfy.
    pub fn parse(dependency: &str) -> Self {
        let raw = strip_archive_extension(dependency.trim());

        if raw.len() > LATEST_SUFFIX.len()
            && raw.is_char_boundary(raw.len() - LATEST_SUFFIX.len())
        {
            let (base, suffix) = raw.split_at(raw.len() - LATEST_SUFFIX.len());
            if suffix.eq_ignore_ascii_case(LATEST_SUFFIX) {
                return Self {
                    base: base.to_string(),
                    kind: RefKind::Latest,
                    version: None,
                    raw: raw.to_string(),
                };
            }
        }

        if let Some((base, last)) = raw.rsplit_once('.') {
            if let Some(digits) = strip_min_prefix(last)
                && !digits.is_empty()
                && digits.bytes().all(|b| b.is_ascii_digit())
                && let Ok(min) = digits.parse::<u32>()
            {
                return Self {
                    base: base.to_string(),
                    kind: RefKind::Minimum,
                    version: Some(min),
                    raw: raw.to_string(),
                };
            }

            if let Ok(version) = last.parse::<u32>() {
                return Self {
                    base: base.to_string(),
                    kind: RefKind::Exact,
                    version: Some(version),
                    raw: raw.to_string(),
                };
            }
        }

        Self {
            base: raw.to_string(),
            kind: RefKind::Exact,
            version: None,
            raw: raw.to_string(),
        }
    }

    /// Full package name for exact references with a version.
    pub fn exact_name(&self) -> Option<String> {
        match (self.kind, self.version) {
            (RefKind::Exact, Some(v)) => Some(format!("{}.{}", self.base, v)),
            _ => None,
        }
    }
}

/// Accepts `min` in any case at the start of the trailing segment.
fn strip_min_prefix(segment: &str) -> Option<&str> {
    let prefix_len = MIN_PREFIX.len() - 1;
    if segment.len() >= prefix_len
        && segment.is_char_boundary(prefix_len)
        && segment[..prefix_len].eq_ignore_ascii_case(&MIN_PREFIX[1..])
    {
        Some(&segment[prefix_len..])
    } else {
        None
    }
}

impl FromStr for DependencyRef {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
