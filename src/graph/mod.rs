//! Dependency graph over canonical packages.
//!
//! Nodes are package full names (`Creator.Package.Version`). An edge `A -> B`
//! means `A` declares a dependency that `B` satisfies; a selector such as
//! `B.latest` links to every version present. The graph is built from scratch
//! on every pass and never edited afterwards; readers share a finished graph
//! freely.

use log::debug;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::package::{DependencyRef, KnownPackages, PackageRecord};

/// Per-package counts for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageStats {
    pub name: String,
    pub dependencies: usize,
    pub dependents: usize,
    pub transitive_dependencies: usize,
    pub transitive_dependents: usize,
}

/// Whole-graph counts for display.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct GraphStatistics {
    pub packages: usize,
    pub edges: usize,
    pub orphans: usize,
    pub with_dependencies: usize,
    pub most_depended_on: Option<(String, usize)>,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
    /// Per package, one entry per declared dependency: the packages that can
    /// each satisfy it. The package breaks once every entry of a group is gone.
    requirements: HashMap<NodeIndex, Vec<Vec<NodeIndex>>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from canonical records.
    ///
    /// Every declared dependency is matched against the set of records passed
    /// in. An exact reference that exists links to that package alone; every
    /// other reference links to all versions that satisfy it. Unresolvable
    /// references and self-references add no edge.
    #[tracing::instrument(skip(records))]
    pub fn build<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a PackageRecord>,
    {
        let records: Vec<&PackageRecord> = records.into_iter().collect();
        let known: KnownPackages = records.iter().map(|r| r.full_name()).collect();

        let mut graph = DiGraph::with_capacity(records.len(), records.len());
        let mut nodes = HashMap::with_capacity(records.len());
        for record in &records {
            let name = record.full_name().to_string();
            nodes
                .entry(name.clone())
                .or_insert_with(|| graph.add_node(name));
        }

        let lookup = |names: Vec<String>| -> Vec<NodeIndex> {
            names.iter().filter_map(|n| nodes.get(n).copied()).collect()
        };

        let mut requirements: HashMap<NodeIndex, Vec<Vec<NodeIndex>>> = HashMap::new();
        for record in &records {
            let from = nodes[record.full_name()];
            for dependency in &record.dependencies {
                let dependency = DependencyRef::parse(dependency);
                for to in lookup(known.targets(&dependency)) {
                    if to != from {
                        graph.update_edge(from, to, ());
                    }
                }
                // A package that satisfies its own dependency never loses it.
                let alternatives = lookup(known.candidates(&dependency));
                if !alternatives.is_empty() && !alternatives.contains(&from) {
                    requirements.entry(from).or_default().push(alternatives);
                }
            }
        }

        debug!(
            "Built dependency graph: {} node(s), {} edge(s)",
            graph.node_count(),
            graph.edge_count()
        );
        Self {
            graph,
            nodes,
            requirements,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Packages that depend directly on `name`.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Packages `name` depends on directly.
    pub fn dependencies(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Number of packages that depend directly on `name`.
    pub fn dependent_count(&self, name: &str) -> usize {
        self.nodes.get(name).map_or(0, |&idx| {
            self.graph.neighbors_directed(idx, Direction::Incoming).count()
        })
    }

    /// Packages nothing depends on.
    pub fn orphans(&self) -> Vec<String> {
        let mut orphans: Vec<String> = self
            .graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|idx| self.graph[idx].clone())
            .collect();
        orphans.sort();
        orphans
    }

    /// Packages with at least `min_dependents` direct dependents, most
    /// depended-on first.
    pub fn critical(&self, min_dependents: usize) -> Vec<(String, usize)> {
        let mut critical: Vec<(String, usize)> = self
            .graph
            .node_indices()
            .map(|idx| {
                let count = self
                    .graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count();
                (self.graph[idx].clone(), count)
            })
            .filter(|(_, count)| *count >= min_dependents)
            .collect();
        critical.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        critical
    }

    /// Everything `name` needs, directly or transitively.
    pub fn full_dependency_chain(&self, name: &str) -> BTreeSet<String> {
        let Some(&start) = self.nodes.get(name) else {
            return BTreeSet::new();
        };
        let mut chain = BTreeSet::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(idx) = dfs.next(&self.graph) {
            if idx != start {
                chain.insert(self.graph[idx].clone());
            }
        }
        chain
    }

    /// Everything that stops working if `name` is removed: packages left
    /// with a dependency no remaining package satisfies, and, transitively,
    /// the packages those leave unsatisfied in turn.
    pub fn packages_that_would_break(&self, name: &str) -> Vec<String> {
        let Some(&start) = self.nodes.get(name) else {
            return Vec::new();
        };
        let mut removed = HashSet::from([start]);
        loop {
            let newly: Vec<NodeIndex> = self
                .requirements
                .iter()
                .filter(|(node, _)| !removed.contains(*node))
                .filter(|(_, groups)| {
                    groups
                        .iter()
                        .any(|group| group.iter().all(|n| removed.contains(n)))
                })
                .map(|(&node, _)| node)
                .collect();
            if newly.is_empty() {
                break;
            }
            removed.extend(newly);
        }

        let mut broken: Vec<String> = removed
            .into_iter()
            .filter(|&idx| idx != start)
            .map(|idx| self.graph[idx].clone())
            .collect();
        broken.sort();
        broken
    }

    pub fn package_stats(&self, name: &str) -> Option<PackageStats> {
        if !self.contains(name) {
            return None;
        }
        Some(PackageStats {
            name: name.to_string(),
            dependencies: self.dependencies(name).len(),
            dependents: self.dependent_count(name),
            transitive_dependencies: self.full_dependency_chain(name).len(),
            transitive_dependents: self.packages_that_would_break(name).len(),
        })
    }

    pub fn graph_statistics(&self) -> GraphStatistics {
        let with_dependencies = self
            .graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .next()
                    .is_some()
            })
            .count();
        GraphStatistics {
            packages: self.node_count(),
            edges: self.edge_count(),
            orphans: self.orphans().len(),
            with_dependencies,
            most_depended_on: self.critical(1).into_iter().next(),
        }
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<String> {
        let Some(&idx) = self.nodes.get(name) else {
            return Vec::new();
        };
        let mut names: Vec<String> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        names.sort();
        names
    }
}
