//! Dependency graph over units: reverse edges, cycle detection and depth.

use crate::error::CycleError;
use crate::types::{normalize_name, SqlUnit};
use std::collections::{BTreeSet, HashMap};
#[cfg(feature = "tracing")]
use tracing::debug;

/// Forward and reverse edges among a unit collection.
///
/// Built from each unit's `dependencies`; names that are not units and self
/// references are ignored. Nodes are kept in normalized-name order so every
/// traversal is deterministic.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    names: Vec<String>,
    keys: Vec<String>,
    index: HashMap<String, usize>,
    dependencies: Vec<BTreeSet<usize>>,
    used_by: Vec<BTreeSet<usize>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

impl DependencyGraph {
    pub fn build(units: &[SqlUnit]) -> Self {
        let mut sorted: Vec<(String, &SqlUnit)> =
            units.iter().map(|unit| (unit.key(), unit)).collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        sorted.dedup_by(|a, b| a.0 == b.0);

        let mut graph = Self::default();
        for (position, (key, unit)) in sorted.iter().enumerate() {
            graph.names.push(unit.name.clone());
            graph.keys.push(key.clone());
            graph.index.insert(key.clone(), position);
        }

        let count = graph.names.len();
        graph.dependencies = vec![BTreeSet::new(); count];
        graph.used_by = vec![BTreeSet::new(); count];

        for (from, (_, unit)) in sorted.iter().enumerate() {
            for dependency in &unit.dependencies {
                let Some(&to) = graph.index.get(&normalize_name(dependency)) else {
                    continue;
                };
                if to == from {
                    continue;
                }
                graph.dependencies[from].insert(to);
                graph.used_by[to].insert(from);
            }
        }

        graph
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&normalize_name(name))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.index.get(&normalize_name(name)).copied()
    }

    fn names_of<'a>(&'a self, nodes: impl IntoIterator<Item = &'a usize>) -> Vec<&'a str> {
        nodes.into_iter().map(|&n| self.names[n].as_str()).collect()
    }

    /// Direct dependencies of `name`, in name order.
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.position(name)
            .map(|n| self.names_of(&self.dependencies[n]))
            .unwrap_or_default()
    }

    /// Units that depend directly on `name`, in name order.
    pub fn used_by(&self, name: &str) -> Vec<&str> {
        self.position(name)
            .map(|n| self.names_of(&self.used_by[n]))
            .unwrap_or_default()
    }

    /// Checks for cycles and computes depths.
    pub fn resolve(self) -> Result<ResolvedGraph, CycleError> {
        let finish_order = self.finish_order()?;

        let mut depths = vec![0usize; self.len()];
        for &node in &finish_order {
            depths[node] = self.dependencies[node]
                .iter()
                .map(|&dep| depths[dep] + 1)
                .max()
                .unwrap_or(0);
        }

        #[cfg(feature = "tracing")]
        debug!(
            units = self.len(),
            max_depth = depths.iter().max().copied().unwrap_or(0),
            "dependency graph resolved"
        );

        Ok(ResolvedGraph {
            graph: self,
            depths,
        })
    }

    /// Depth-first post order, dependencies before dependents.
    ///
    /// A dependency reached while still on the traversal stack closes a cycle,
    /// reported from that node back to itself.
    fn finish_order(&self) -> Result<Vec<usize>, CycleError> {
        let mut marks = vec![Mark::Unvisited; self.len()];
        let mut order = Vec::with_capacity(self.len());

        for start in 0..self.len() {
            if marks[start] != Mark::Unvisited {
                continue;
            }
            marks[start] = Mark::OnStack;
            let mut stack = vec![(start, self.dependencies[start].iter())];

            while let Some(top) = stack.last_mut() {
                let node = top.0;
                let next = top.1.next().copied();
                match next {
                    Some(dep) => match marks[dep] {
                        Mark::Unvisited => {
                            marks[dep] = Mark::OnStack;
                            stack.push((dep, self.dependencies[dep].iter()));
                        }
                        Mark::OnStack => {
                            let from = stack.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                            let path = stack[from..]
                                .iter()
                                .map(|(n, _)| self.names[*n].clone())
                                .chain(std::iter::once(self.names[dep].clone()))
                                .collect();
                            return Err(CycleError { path });
                        }
                        Mark::Done => {}
                    },
                    None => {
                        marks[node] = Mark::Done;
                        order.push(node);
                        stack.pop();
                    }
                }
            }
        }

        Ok(order)
    }
}

/// An acyclic dependency graph with per-unit depth.
#[derive(Debug, Clone)]
pub struct ResolvedGraph {
    graph: DependencyGraph,
    depths: Vec<usize>,
}

impl ResolvedGraph {
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn contains(&self, name: &str) -> bool {
        self.graph.contains(name)
    }

    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.graph.dependencies(name)
    }

    pub fn used_by(&self, name: &str) -> Vec<&str> {
        self.graph.used_by(name)
    }

    /// 0 without dependencies, otherwise one more than the deepest dependency.
    pub fn depth(&self, name: &str) -> Option<usize> {
        self.graph.position(name).map(|n| self.depths[n])
    }

    /// Every unit, by ascending depth then normalized name.
    ///
    /// A dependency is always strictly shallower than its dependents, so this
    /// is a topological order.
    pub fn ordered(&self) -> Vec<&str> {
        let nodes: Vec<usize> = (0..self.graph.len()).collect();
        self.sorted_names(nodes)
    }

    /// Everything `name` needs, directly or not, in dependency order.
    pub fn transitive_dependencies(&self, name: &str) -> Vec<&str> {
        self.reachable(name, |n| &self.graph.dependencies[n])
    }

    /// Everything that needs `name`, directly or not, in dependency order.
    pub fn transitive_dependents(&self, name: &str) -> Vec<&str> {
        self.reachable(name, |n| &self.graph.used_by[n])
    }

    fn reachable<'a, F>(&'a self, name: &str, edges: F) -> Vec<&'a str>
    where
        F: Fn(usize) -> &'a BTreeSet<usize>,
    {
        let Some(start) = self.graph.position(name) else {
            return Vec::new();
        };

        let mut seen = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for &next in edges(node) {
                if seen.insert(next) {
                    stack.push(next);
                }
            }
        }
        seen.remove(&start);
        self.sorted_names(seen)
    }

    fn sorted_names(&self, nodes: impl IntoIterator<Item = usize>) -> Vec<&str> {
        let mut nodes: Vec<usize> = nodes.into_iter().collect();
        nodes.sort_by(|&a, &b| {
            self.depths[a]
                .cmp(&self.depths[b])
                .then_with(|| self.graph.keys[a].cmp(&self.graph.keys[b]))
        });
        nodes
            .into_iter()
            .map(|n| self.graph.names[n].as_str())
            .collect()
    }
}

/// Builds and resolves the graph of `units`.
pub fn resolve(units: &[SqlUnit]) -> Result<ResolvedGraph, CycleError> {
    DependencyGraph::build(units).resolve()
}
