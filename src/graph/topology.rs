//! Derived topology: layers, circular groups and the critical path.
//!
//! The topology is a pure function of the graph. [`TopologyAnalyzer::analyze`]
//! never mutates its input and yields identical output for identical graphs.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DependencyGraph, ServiceDependency};

/// Highest cumulative-weight dependency chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CriticalPath {
    /// Services from the most upstream to the most downstream.
    pub services: Vec<String>,
    /// Sum of `criticality_weight × health_correlation` over the chain's edges.
    pub weight: f64,
}

/// Derived view of the dependency graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    /// Every node's upstream dependencies sit in strictly earlier layers.
    pub layers: Vec<Vec<String>>,
    /// Groups of services that depend on each other in a cycle.
    pub circular_groups: Vec<Vec<String>>,
    /// Services that are not on a cycle but sit downstream of one, so cannot be layered.
    pub cycle_dependents: Vec<String>,
    /// Computed over layered services only.
    pub critical_path: CriticalPath,
}

impl Topology {
    /// Layer index of a service, if it could be layered.
    pub fn layer_of(&self, id: &str) -> Option<usize> {
        self.layers
            .iter()
            .position(|layer| layer.iter().any(|s| s == id))
    }

    /// Whether a service belongs to a circular group.
    pub fn is_circular(&self, id: &str) -> bool {
        self.circular_groups
            .iter()
            .any(|group| group.iter().any(|s| s == id))
    }

    /// The circular group containing a service.
    pub fn circular_group_of(&self, id: &str) -> Option<&[String]> {
        self.circular_groups
            .iter()
            .find(|group| group.iter().any(|s| s == id))
            .map(Vec::as_slice)
    }

    /// Whether a service lies on the critical path.
    pub fn on_critical_path(&self, id: &str) -> bool {
        self.critical_path.services.iter().any(|s| s == id)
    }
}

/// Computes [`Topology`] from a [`DependencyGraph`].
pub struct TopologyAnalyzer;

impl TopologyAnalyzer {
    /// Derive layering, circular groups and the critical path.
    pub fn analyze(graph: &DependencyGraph) -> Topology {
        let upstream = upstream_map(graph);
        let (layers, remainder) = Self::layer(graph, &upstream);

        let circular_groups = if remainder.is_empty() {
            Vec::new()
        } else {
            Self::circular_groups(graph, &remainder)
        };

        let in_cycle: HashSet<&str> = circular_groups
            .iter()
            .flat_map(|g| g.iter().map(String::as_str))
            .collect();
        let cycle_dependents: Vec<String> = remainder
            .iter()
            .filter(|id| !in_cycle.contains(*id))
            .map(|id| id.to_string())
            .collect();

        let critical_path = Self::critical_path(graph, &layers);

        debug!(
            layers = layers.len(),
            circular_groups = circular_groups.len(),
            cycle_dependents = cycle_dependents.len(),
            critical_path_len = critical_path.services.len(),
            "Topology computed"
        );

        Topology {
            layers,
            circular_groups,
            cycle_dependents,
            critical_path,
        }
    }

    /// Kahn-style layering. Returns the layers and the services that could not be layered.
    fn layer<'a>(
        graph: &'a DependencyGraph,
        upstream: &BTreeMap<&'a str, Vec<&'a ServiceDependency>>,
    ) -> (Vec<Vec<String>>, BTreeSet<&'a str>) {
        let mut remaining: BTreeSet<&str> = graph.nodes.keys().map(String::as_str).collect();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut layers = Vec::new();

        while !remaining.is_empty() {
            let layer: Vec<&str> = remaining
                .iter()
                .copied()
                .filter(|id| {
                    upstream
                        .get(id)
                        .map(|deps| deps.iter().all(|e| visited.contains(e.from.as_str())))
                        .unwrap_or(true)
                })
                .collect();

            if layer.is_empty() {
                break;
            }

            for &id in &layer {
                visited.insert(id);
                remaining.remove(id);
            }
            layers.push(layer.into_iter().map(str::to_string).collect());
        }

        (layers, remaining)
    }

    /// Strongly connected components of the unlayered remainder that form real cycles.
    fn circular_groups(graph: &DependencyGraph, remainder: &BTreeSet<&str>) -> Vec<Vec<String>> {
        let mut cyclic: DiGraphMap<&str, ()> = DiGraphMap::new();
        for &id in remainder {
            cyclic.add_node(id);
        }
        for edge in graph.edges.values() {
            let (from, to) = (edge.from.as_str(), edge.to.as_str());
            if remainder.contains(from) && remainder.contains(to) {
                cyclic.add_edge(from, to, ());
            }
        }

        let mut groups: Vec<Vec<String>> = tarjan_scc(&cyclic)
            .into_iter()
            .filter(|component| {
                component.len() > 1 || cyclic.contains_edge(component[0], component[0])
            })
            .map(|component| {
                let mut group: Vec<String> = component.into_iter().map(str::to_string).collect();
                group.sort();
                group
            })
            .collect();
        groups.sort();
        groups
    }

    /// Longest weighted path through the layered part of the graph.
    fn critical_path(graph: &DependencyGraph, layers: &[Vec<String>]) -> CriticalPath {
        let layered: HashSet<&str> = layers.iter().flatten().map(String::as_str).collect();
        let upstream = upstream_map(graph);

        // service -> (best cumulative weight ending here, predecessor)
        let mut best: HashMap<&str, (f64, Option<&str>)> = HashMap::new();
        let mut end: Option<(&str, f64)> = None;

        for id in layers.iter().flatten().map(String::as_str) {
            let mut entry = (0.0_f64, None);
            for edge in upstream.get(id).into_iter().flatten() {
                let from = edge.from.as_str();
                if !layered.contains(from) {
                    continue;
                }
                let base = best.get(from).map(|(w, _)| *w).unwrap_or(0.0);
                let candidate = base + edge.criticality_weight();
                if candidate > entry.0 {
                    entry = (candidate, Some(from));
                }
            }
            if entry.0 > end.map(|(_, w)| w).unwrap_or(0.0) {
                end = Some((id, entry.0));
            }
            best.insert(id, entry);
        }

        let Some((tail, weight)) = end else {
            return CriticalPath::default();
        };

        let mut services = vec![tail.to_string()];
        let mut cursor = tail;
        while let Some((_, Some(prev))) = best.get(cursor) {
            services.push(prev.to_string());
            cursor = *prev;
        }
        services.reverse();

        CriticalPath { services, weight }
    }
}

fn upstream_map(graph: &DependencyGraph) -> BTreeMap<&str, Vec<&ServiceDependency>> {
    let mut upstream: BTreeMap<&str, Vec<&ServiceDependency>> = BTreeMap::new();
    for edge in graph.edges.values() {
        upstream.entry(edge.to.as_str()).or_default().push(edge);
    }
    upstream
}
