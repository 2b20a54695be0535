//! Post-pass annotations: old versions, missing dependencies and graph
//! counts.

use std::collections::{BTreeMap, HashMap};

use super::variant::VariantKey;
use crate::graph::DependencyGraph;
use crate::package::{DependencyRef, KnownPackages, PackageRecord};

/// Known packages built from the canonical keys of the output map.
pub(crate) fn known_packages(output: &BTreeMap<VariantKey, PackageRecord>) -> KnownPackages {
    output
        .keys()
        .filter(|k| k.is_canonical())
        .map(|k| k.stem.as_str())
        .collect()
}

/// Flag records whose (creator, package) group has a newer version.
pub(crate) fn flag_old_versions(output: &mut BTreeMap<VariantKey, PackageRecord>) {
    let mut groups: HashMap<(String, String), (u32, usize)> = HashMap::new();
    for (key, record) in output.iter() {
        let group = groups
            .entry((record.creator.clone(), record.package_name.clone()))
            .or_insert((0, 0));
        group.0 = group.0.max(record.version);
        if key.is_canonical() {
            group.1 += 1;
        }
    }

    for record in output.values_mut() {
        record.latest_version = record.version;
        record.is_old_version = false;
        let Some(&(latest, versions)) =
            groups.get(&(record.creator.clone(), record.package_name.clone()))
        else {
            continue;
        };
        if versions > 1 {
            record.latest_version = latest;
            record.is_old_version = record.version < latest;
        }
    }
}

/// Recompute every record's missing dependencies.
pub(crate) fn find_missing_dependencies(
    output: &mut BTreeMap<VariantKey, PackageRecord>,
    known: &KnownPackages,
) -> usize {
    let mut total = 0;
    for record in output.values_mut() {
        record.missing_dependencies = record
            .dependencies
            .iter()
            .filter(|d| !known.satisfies(&DependencyRef::parse(d)))
            .cloned()
            .collect();
        total += record.missing_dependencies.len();
    }
    total
}

/// Drop missing entries that `known` now satisfies. Returns how many
/// entries were cleared.
pub(crate) fn clear_satisfied(
    output: &mut BTreeMap<VariantKey, PackageRecord>,
    known: &KnownPackages,
) -> usize {
    let mut cleared = 0;
    for record in output.values_mut() {
        let before = record.missing_dependencies.len();
        record
            .missing_dependencies
            .retain(|d| !known.satisfies(&DependencyRef::parse(d)));
        cleared += before - record.missing_dependencies.len();
    }
    cleared
}

/// Stamp direct dependency and dependent counts onto every record.
pub(crate) fn apply_graph_counts(
    output: &mut BTreeMap<VariantKey, PackageRecord>,
    graph: &DependencyGraph,
) {
    for (key, record) in output.iter_mut() {
        record.dependency_count = record.dependencies.len() as u32;
        record.dependents_count = graph.dependent_count(&key.stem) as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::VariantRole;

    fn output(entries: &[(VariantKey, &[&str])]) -> BTreeMap<VariantKey, PackageRecord> {
        entries
            .iter()
            .map(|(key, deps)| {
                let mut record = PackageRecord::from_filename(&format!("{}.var", key.stem));
                record.dependencies = deps.iter().map(|d| d.to_string()).collect();
                (key.clone(), record)
            })
            .collect()
    }

    #[test]
    fn test_flag_old_versions() {
        let mut map = output(&[
            (VariantKey::canonical("Creator.Pack.1"), &[]),
            (VariantKey::canonical("Creator.Pack.3"), &[]),
            (VariantKey::canonical("Creator.Solo.2"), &[]),
        ]);
        flag_old_versions(&mut map);

        let old = &map[&VariantKey::canonical("Creator.Pack.1")];
        assert!(old.is_old_version);
        assert_eq!(old.latest_version, 3);
        let new = &map[&VariantKey::canonical("Creator.Pack.3")];
        assert!(!new.is_old_version);
        assert_eq!(new.latest_version, 3);
        let solo = &map[&VariantKey::canonical("Creator.Solo.2")];
        assert!(!solo.is_old_version);
        assert_eq!(solo.latest_version, 2);
    }

    #[test]
    fn test_copies_of_one_version_are_not_old() {
        let mut map = output(&[
            (VariantKey::canonical("Creator.Pack.2"), &[]),
            (VariantKey::suffixed("Creator.Pack.2", VariantRole::Archived, 1), &[]),
        ]);
        flag_old_versions(&mut map);
        assert!(map.values().all(|r| !r.is_old_version && r.latest_version == 2));
    }

    #[test]
    fn test_find_missing_dependencies() {
        let mut map = output(&[
            (
                VariantKey::canonical("Me.Scene.1"),
                &["C.P.latest", "C.P.min3", "C.P.min6", "C.P.3", "Z.Z.99", "weird"],
            ),
            (VariantKey::canonical("C.P.1"), &[]),
            (VariantKey::canonical("C.P.2"), &[]),
            (VariantKey::canonical("C.P.5"), &[]),
        ]);
        let known = known_packages(&map);
        let total = find_missing_dependencies(&mut map, &known);

        assert_eq!(total, 3);
        assert_eq!(
            map[&VariantKey::canonical("Me.Scene.1")].missing_dependencies,
            vec!["C.P.min6".to_string(), "Z.Z.99".to_string(), "weird".to_string()]
        );
    }

    #[test]
    fn test_clear_satisfied() {
        let mut map = output(&[(VariantKey::canonical("Me.Scene.1"), &["New.Pack.latest", "Z.Z.2"])]);
        let known = known_packages(&map);
        find_missing_dependencies(&mut map, &known);

        let downloaded: KnownPackages = ["New.Pack.4"].into_iter().collect();
        let cleared = clear_satisfied(&mut map, &downloaded);
        assert_eq!(cleared, 1);
        assert_eq!(
            map[&VariantKey::canonical("Me.Scene.1")].missing_dependencies,
            vec!["Z.Z.2".to_string()]
        );
    }
}
