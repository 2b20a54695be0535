use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::variant::{Variant, VariantKey};
use crate::package::{PackageRecord, VariantRole};

/// Every known copy of one archive, across the current and the previous
/// pass.
#[derive(Debug, Default)]
pub(crate) struct VariantStore {
    /// Copies confirmed this pass, keyed by path key.
    current: BTreeMap<String, Variant>,
    /// Copies from the pass before, kept for reuse lookups.
    previous: BTreeMap<String, Variant>,
    /// Path keys in preference order; the first is the preferred copy.
    order: Vec<String>,
    /// Keys this store wrote into the output map.
    materialized: Vec<VariantKey>,
}

impl VariantStore {
    /// Start a new generation: retract this store's output and move the
    /// current copies aside for reuse.
    pub fn begin_rebuild(&mut self, output: &mut BTreeMap<VariantKey, PackageRecord>) {
        self.retract(output);
        self.previous = std::mem::take(&mut self.current);
        self.order.clear();
    }

    /// Remove every key this store materialized.
    pub fn retract(&mut self, output: &mut BTreeMap<VariantKey, PackageRecord>) {
        for key in self.materialized.drain(..) {
            output.remove(&key);
        }
    }

    pub fn previous(&self, path_key: &str) -> Option<&Variant> {
        self.previous.get(path_key)
    }

    pub fn insert(&mut self, variant: Variant) {
        self.current.insert(variant.path_key.clone(), variant);
    }

    pub fn variant_mut(&mut self, path_key: &str) -> Option<&mut Variant> {
        self.current.get_mut(path_key)
    }

    /// Force every copy to be re-parsed on the next pass.
    pub fn invalidate(&mut self) {
        for variant in self.current.values_mut().chain(self.previous.values_mut()) {
            variant.content_hash = 0;
        }
    }

    pub fn preferred(&self) -> Option<&Variant> {
        self.order.first().and_then(|key| self.current.get(key))
    }

    /// Rank the copies, pick the preferred one and stamp duplicate
    /// accounting onto every record.
    ///
    /// Active copies always rank before archived ones. Among equals an
    /// optimized copy wins, then the lower role priority, then path and
    /// modification time.
    pub fn finalize(&mut self) {
        let mut ranked: Vec<&Variant> = self.current.values().collect();
        ranked.sort_by(|a, b| compare_variants(a, b));
        self.order = ranked.iter().map(|v| v.path_key.clone()).collect();

        let active = self.current.values().filter(|v| v.role.is_active()).count() as u32;
        for variant in self.current.values_mut() {
            variant.record.is_duplicate = active > 1;
            if variant.role.is_active() {
                variant.record.duplicate_location_count = active;
            } else {
                variant.record.duplicate_location_count = active.max(1);
                variant.set_status(VariantRole::Archived.status_label());
            }
        }
    }

    /// Write the preferred copy under the canonical key and every other copy
    /// under a role-suffixed key.
    pub fn materialize(&mut self, stem: &str, output: &mut BTreeMap<VariantKey, PackageRecord>) {
        self.retract(output);

        let mut counters: BTreeMap<VariantRole, u32> = BTreeMap::new();
        for (rank, path_key) in self.order.iter().enumerate() {
            let Some(variant) = self.current.get(path_key) else {
                continue;
            };
            let counter = counters.entry(variant.role).or_insert(0);
            *counter += 1;

            let key = if rank == 0 {
                VariantKey::canonical(stem)
            } else {
                VariantKey::suffixed(stem, variant.role, *counter)
            };
            output.insert(key.clone(), variant.record.clone());
            self.materialized.push(key);
        }
    }
}

fn compare_variants(a: &Variant, b: &Variant) -> Ordering {
    let rank = |v: &Variant| {
        (
            !v.role.is_active(),
            if v.record.is_optimized { 0u8 } else { 1u8 },
            v.role.priority(),
        )
    };
    rank(a)
        .cmp(&rank(b))
        .then_with(|| a.path_key.cmp(&b.path_key))
        .then(a.mtime_ticks.cmp(&b.mtime_ticks))
}
