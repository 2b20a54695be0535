//! Index of known packages used to decide whether dependencies are satisfied.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::name::PackageName;
use super::reference::{DependencyRef, RefKind};

/// Known full names plus the versions present for every package base.
#[derive(Debug, Clone, Default)]
pub struct KnownPackages {
    full_names: HashSet<String>,
    versions: HashMap<String, BTreeSet<u32>>,
}

impl KnownPackages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a package by full name (`Creator.Package.Version`).
    ///
    /// Names without a numeric version are only matchable literally.
    pub fn insert(&mut self, full_name: &str) {
        self.full_names.insert(full_name.to_string());
        if let Some(name) = PackageName::parse(full_name) {
            self.versions
                .entry(name.base_name())
                .or_default()
                .insert(name.version);
        }
    }

    /// Register a package by base name and version.
    pub fn insert_version(&mut self, base: &str, version: u32) {
        self.full_names.insert(format!("{}.{}", base, version));
        self.versions
            .entry(base.to_string())
            .or_default()
            .insert(version);
    }

    pub fn contains(&self, full_name: &str) -> bool {
        self.full_names.contains(full_name)
    }

    pub fn len(&self) -> usize {
        self.full_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.full_names.is_empty()
    }

    /// Highest known version of a base.
    pub fn max_version(&self, base: &str) -> Option<u32> {
        self.versions.get(base).and_then(|v| v.last().copied())
    }

    /// Whether a dependency reference is satisfied.
    ///
    /// - `Latest`: any version of the base exists.
    /// - `Minimum(n)`: the highest known version is at least `n`.
    /// - `Exact(v)`: the literal package exists, or else any version of the
    ///   base exists. This fallback is lenient and can hide a genuinely
    ///   missing exact version; it mirrors how the package loader behaves.
    /// - Exact without a version: only a literal name match.
    pub fn satisfies(&self, dependency: &DependencyRef) -> bool {
        self.resolve(dependency).is_some()
    }

    /// The concrete package a dependency resolves to, if any.
    ///
    /// Selector references resolve to the highest known version; a missing
    /// exact version falls back to the highest version of the base.
    pub fn resolve(&self, dependency: &DependencyRef) -> Option<String> {
        match (dependency.kind, dependency.version) {
            (RefKind::Latest, _) => self.highest(&dependency.base),
            (RefKind::Minimum, Some(min)) => {
                let max = self.max_version(&dependency.base)?;
                (max >= min).then(|| format!("{}.{}", dependency.base, max))
            }
            (RefKind::Minimum, None) => self.highest(&dependency.base),
            (RefKind::Exact, Some(_)) => match dependency.exact_name() {
                Some(name) if self.contains(&name) => Some(name),
                _ => self.highest(&dependency.base),
            },
            (RefKind::Exact, None) => self
                .contains(&dependency.raw)
                .then(|| dependency.raw.clone()),
        }
    }

    /// Every known package that satisfies a dependency on its own.
    ///
    /// A missing exact version is satisfied by any version of the base, so
    /// exact references list every version too.
    pub fn candidates(&self, dependency: &DependencyRef) -> Vec<String> {
        match (dependency.kind, dependency.version) {
            (RefKind::Latest, _) | (RefKind::Minimum, None) | (RefKind::Exact, Some(_)) => {
                self.versions_from(&dependency.base, 0)
            }
            (RefKind::Minimum, Some(min)) => self.versions_from(&dependency.base, min),
            (RefKind::Exact, None) => self
                .contains(&dependency.raw)
                .then(|| dependency.raw.clone())
                .into_iter()
                .collect(),
        }
    }

    /// The packages a dependency points at: the literal package for an exact
    /// reference that exists, otherwise every candidate.
    pub fn targets(&self, dependency: &DependencyRef) -> Vec<String> {
        if dependency.kind == RefKind::Exact
            && let Some(name) = dependency.exact_name()
            && self.contains(&name)
        {
            return vec![name];
        }
        self.candidates(dependency)
    }

    fn versions_from(&self, base: &str, min: u32) -> Vec<String> {
        self.versions.get(base).map_or_else(Vec::new, |versions| {
            versions
                .range(min..)
                .map(|v| format!("{}.{}", base, v))
                .collect()
        })
    }

    fn highest(&self, base: &str) -> Option<String> {
        self.max_version(base).map(|v| format!("{}.{}", base, v))
    }
}

impl<S: AsRef<str>> FromIterator<S> for KnownPackages {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut known = Self::new();
        for name in iter {
            known.insert(name.as_ref());
        }
        known
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known_cp() -> KnownPackages {
        ["C.P.1", "C.P.2", "C.P.5"].into_iter().collect()
    }

    fn satisfied(known: &KnownPackages, dep: &str) -> bool {
        known.satisfies(&DependencyRef::parse(dep))
    }

    #[test]
    fn test_latest_satisfied_by_any_version() {
        assert!(satisfied(&known_cp(), "C.P.latest"));
        assert!(!satisfied(&known_cp(), "C.Q.latest"));
    }

    #[test]
    fn test_minimum_uses_max_version() {
        let known = known_cp();
        assert!(satisfied(&known, "C.P.min3"));
        assert!(satisfied(&known, "C.P.min5"));
        assert!(!satisfied(&known, "C.P.min6"));
    }

    #[test]
    fn test_exact_with_lenient_fallback() {
        let known = known_cp();
        assert!(satisfied(&known, "C.P.2"));
        // version 3 is absent, other versions of C.P exist
        assert!(satisfied(&known, "C.P.3"));
        assert!(!satisfied(&known, "X.Y.99"));
    }

    #[test]
    fn test_versionless_exact_needs_literal_match() {
        let mut known = known_cp();
        assert!(!satisfied(&known, "C.P.beta"));
        known.insert("C.P.beta");
        assert!(satisfied(&known, "C.P.beta"));
    }

    #[test]
    fn test_resolve_targets() {
        let known = known_cp();
        let resolve = |d: &str| known.resolve(&DependencyRef::parse(d));
        assert_eq!(resolve("C.P.latest").as_deref(), Some("C.P.5"));
        assert_eq!(resolve("C.P.min2").as_deref(), Some("C.P.5"));
        assert_eq!(resolve("C.P.2").as_deref(), Some("C.P.2"));
        assert_eq!(resolve("C.P.3").as_deref(), Some("C.P.5"));
        assert_eq!(resolve("C.P.min9"), None);
    }

    #[test]
    fn test_candidates_and_targets() {
        let known = known_cp();
        let candidates = |d: &str| known.candidates(&DependencyRef::parse(d));
        let targets = |d: &str| known.targets(&DependencyRef::parse(d));
        let all = vec!["C.P.1".to_string(), "C.P.2".to_string(), "C.P.5".to_string()];

        assert_eq!(candidates("C.P.latest"), all);
        assert_eq!(candidates("C.P.min2"), vec!["C.P.2".to_string(), "C.P.5".to_string()]);
        assert!(candidates("C.P.min9").is_empty());
        assert_eq!(candidates("C.P.3"), all);
        assert_eq!(targets("C.P.2"), vec!["C.P.2".to_string()]);
        assert_eq!(targets("C.P.3"), all);
        assert!(candidates("C.Q.1").is_empty());
        assert!(candidates("C.P.beta").is_empty());
    }

    #[test]
    fn test_insert_version() {
        let mut known = KnownPackages::new();
        assert!(known.is_empty());
        known.insert_version("A.B", 4);
        assert!(known.contains("A.B.4"));
        assert_eq!(known.max_version("A.B"), Some(4));
        assert_eq!(known.len(), 1);
    }
}
