use anyhow::{Result, bail};
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::package::{PackageRecord, VariantRole};
use crate::runtime::{FileStat, path_key};

/// Separator between an archive stem and a variant suffix in display keys.
pub const SUFFIX_SEPARATOR: char = '#';

/// One on-disk copy of an archive.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub role: VariantRole,
    pub status: String,
    pub path: PathBuf,
    pub path_key: String,
    pub size: u64,
    pub mtime_ticks: i64,
    pub record: PackageRecord,
    /// Hash of the record's defining content. Zero forces a re-parse on the
    /// next pass; corrupted records always start at zero.
    pub content_hash: u64,
}

impl Variant {
    /// Wrap a record for a copy at `path`, overlaying the location fields.
    pub fn new(
        mut record: PackageRecord,
        role: VariantRole,
        status: &str,
        path: PathBuf,
        stat: FileStat,
    ) -> Self {
        record.apply_location(role, status, &path, stat);
        let content_hash = if record.is_corrupted {
            0
        } else {
            record.content_hash()
        };
        Self {
            role,
            status: status.to_string(),
            path_key: path_key(&path),
            path,
            size: stat.size,
            mtime_ticks: stat.mtime_ticks,
            record,
            content_hash,
        }
    }

    /// Whether this copy can be reused for a file with the given signature.
    pub fn is_unchanged(&self, size: u64, mtime_ticks: i64) -> bool {
        self.size == size && self.mtime_ticks == mtime_ticks && self.content_hash != 0
    }

    pub(crate) fn set_status(&mut self, status: &str) {
        self.status = status.to_string();
        self.record.status = status.to_string();
    }
}

/// Key of one materialized record.
///
/// The preferred copy of an archive is stored under its bare stem; every
/// other copy carries its role and a per-role ordinal. Ordinal 1 renders
/// without a number (`#available`), higher ordinals append it
/// (`#available2`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantKey {
    pub stem: String,
    pub suffix: Option<(VariantRole, u32)>,
}

impl VariantKey {
    pub fn canonical(stem: impl Into<String>) -> Self {
        Self {
            stem: stem.into(),
            suffix: None,
        }
    }

    pub fn suffixed(stem: impl Into<String>, role: VariantRole, ordinal: u32) -> Self {
        Self {
            stem: stem.into(),
            suffix: Some((role, ordinal)),
        }
    }

    pub fn is_canonical(&self) -> bool {
        self.suffix.is_none()
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stem)?;
        match self.suffix {
            None => Ok(()),
            Some((role, 1)) => write!(f, "{}{}", SUFFIX_SEPARATOR, role),
            Some((role, ordinal)) => write!(f, "{}{}{}", SUFFIX_SEPARATOR, role, ordinal),
        }
    }
}

impl FromStr for VariantKey {
    type Err = anyhow::Error;

    /// Parse a display key. A `#` that is not followed by a role name and an
    /// optional ordinal is treated as part of the stem.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            bail!("Empty package key");
        }

        if let Some((stem, suffix)) = s.rsplit_once(SUFFIX_SEPARATOR)
            && !stem.is_empty()
            && let Some(parsed) = parse_suffix(suffix)
        {
            return Ok(Self {
                stem: stem.to_string(),
                suffix: Some(parsed),
            });
        }

        Ok(Self::canonical(s))
    }
}

fn parse_suffix(suffix: &str) -> Option<(VariantRole, u32)> {
    let lower = suffix.to_ascii_lowercase();
    VariantRole::ALL.into_iter().find_map(|role| {
        let rest = lower.strip_prefix(role.as_str())?;
        if rest.is_empty() {
            return Some((role, 1));
        }
        match rest.parse::<u32>() {
            Ok(n) if n >= 2 && rest.bytes().all(|b| b.is_ascii_digit()) => Some((role, n)),
            _ => None,
        }
    })
}

impl Serialize for VariantKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(VariantKey::canonical("A.B.1").to_string(), "A.B.1");
        assert_eq!(
            VariantKey::suffixed("A.B.1", VariantRole::Available, 1).to_string(),
            "A.B.1#available"
        );
        assert_eq!(
            VariantKey::suffixed("A.B.1", VariantRole::Archived, 2).to_string(),
            "A.B.1#archived2"
        );
    }

    #[test]
    fn test_parse() {
        let key: VariantKey = "A.B.1#loaded2".parse().unwrap();
        assert_eq!(key, VariantKey::suffixed("A.B.1", VariantRole::Loaded, 2));

        let key: VariantKey = "A.B.1#Archived".parse().unwrap();
        assert_eq!(key, VariantKey::suffixed("A.B.1", VariantRole::Archived, 1));

        let key: VariantKey = "A.B.1".parse().unwrap();
        assert!(key.is_canonical());
    }

    #[test]
    fn test_literal_hash_stays_in_stem() {
        let key: VariantKey = "A.Best#1.2".parse().unwrap();
        assert_eq!(key, VariantKey::canonical("A.Best#1.2"));

        // ordinal 1 is never written out, so "#available1" is not a suffix
        let key: VariantKey = "A.B.1#available1".parse().unwrap();
        assert!(key.is_canonical());

        assert!("".parse::<VariantKey>().is_err());
    }

    #[test]
    fn test_canonical_sorts_before_suffixed() {
        let mut keys = vec![
            VariantKey::suffixed("A.B.1", VariantRole::Archived, 1),
            VariantKey::canonical("A.B.1"),
            VariantKey::suffixed("A.B.1", VariantRole::Available, 1),
        ];
        keys.sort();
        assert!(keys[0].is_canonical());
        assert_eq!(keys[1].suffix, Some((VariantRole::Available, 1)));
    }

    #[test]
    fn test_unchanged_requires_nonzero_hash() {
        let mut variant = Variant::new(
            PackageRecord::from_filename("A.B.1.var"),
            VariantRole::Loaded,
            "Loaded",
            PathBuf::from("/vam/AddonPackages/A.B.1.var"),
            FileStat {
                size: 5,
                mtime_ticks: 9,
            },
        );
        assert!(variant.is_unchanged(5, 9));
        assert!(!variant.is_unchanged(5, 10));

        variant.content_hash = 0;
        assert!(!variant.is_unchanged(5, 9));
    }
}
