//! The live dependency graph.
//!
//! Readers take an immutable [`GraphSnapshot`] at the start of an analysis and
//! never observe a half-applied mutation. Writers are serialized through one
//! mutex: each mutation is applied to a private copy, written through the
//! repository, and only then published. Publishing marks the topology stale;
//! the next [`GraphStore::snapshot`] recomputes it once.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{
    validate_id, DependencyGraph, EdgeKey, ServiceDependency, ServiceHealth, ServiceNode,
    Topology, TopologyAnalyzer,
};
use crate::error::{AppError, AppResult};
use crate::storage::{GraphRepository, MemoryRepository, WriteOp};

/// Samples of health score kept per service.
pub const HEALTH_HISTORY_LIMIT: usize = 64;

/// Immutable view of the graph and its topology at one version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Incremented on every published mutation.
    pub version: u64,
    pub taken_at: DateTime<Utc>,
    pub graph: DependencyGraph,
    pub topology: Topology,
}

impl GraphSnapshot {
    /// Look up a node.
    pub fn node(&self, id: &str) -> Option<&ServiceNode> {
        self.graph.node(id)
    }

    /// Whether a node exists.
    pub fn contains(&self, id: &str) -> bool {
        self.graph.contains(id)
    }
}

/// Result of an edge upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeUpsert {
    /// No edge existed for the key.
    Inserted,
    /// The new edge had confidence at least as high as the stored one.
    Replaced,
    /// The stored edge had higher confidence; nothing changed.
    Ignored,
}

/// Result of a node upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeUpsert {
    Inserted,
    Updated,
}

/// What a service removal took with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovedService {
    pub node: ServiceNode,
    pub edges_removed: usize,
}

/// Health-history change published together with a mutation.
enum HistoryChange {
    Record(String, f64),
    Forget(String),
}

/// Outcome of a mutation closure: the caller's result, the writes to persist
/// and an optional history change.
struct Mutation<T> {
    result: T,
    ops: Vec<WriteOp>,
    history: Option<HistoryChange>,
}

impl<T> Mutation<T> {
    fn new(result: T, ops: Vec<WriteOp>) -> Self {
        Self {
            result,
            ops,
            history: None,
        }
    }

    fn with_history(mut self, change: HistoryChange) -> Self {
        self.history = Some(change);
        self
    }
}

struct StoreState {
    graph: DependencyGraph,
    version: u64,
    /// `None` while the topology is stale.
    snapshot: Option<Arc<GraphSnapshot>>,
}

/// Single source of truth for service nodes and dependency edges.
pub struct GraphStore {
    state: RwLock<StoreState>,
    writer: Mutex<()>,
    repository: Arc<dyn GraphRepository>,
    history: RwLock<HashMap<String, VecDeque<f64>>>,
}

impl GraphStore {
    /// Create an empty store backed by a [`MemoryRepository`].
    pub fn new() -> Self {
        Self::with_graph(DependencyGraph::new(), Arc::new(MemoryRepository::new()))
    }

    /// Open a store over a repository, loading whatever it already holds.
    ///
    /// Dangling edge endpoints in persisted data get placeholder nodes, and
    /// edges that no longer validate are skipped.
    pub async fn open(repository: Arc<dyn GraphRepository>) -> AppResult<Self> {
        let loaded = repository.load().await?;
        let mut graph = DependencyGraph {
            nodes: loaded.nodes,
            edges: Default::default(),
        };

        for (key, edge) in loaded.edges {
            if let Err(e) = edge.validate() {
                warn!(edge = %key, error = %e, "Skipping invalid persisted edge");
                continue;
            }
            for endpoint in [&edge.from, &edge.to] {
                graph
                    .nodes
                    .entry(endpoint.clone())
                    .or_insert_with(|| ServiceNode::placeholder(endpoint.clone()));
            }
            graph.edges.insert(key, edge);
        }

        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Graph store opened"
        );

        Ok(Self::with_graph(graph, repository))
    }

    fn with_graph(graph: DependencyGraph, repository: Arc<dyn GraphRepository>) -> Self {
        Self {
            state: RwLock::new(StoreState {
                graph,
                version: 0,
                snapshot: None,
            }),
            writer: Mutex::new(()),
            repository,
            history: RwLock::new(HashMap::new()),
        }
    }

    /// Immutable copy of the current graph with an up-to-date topology.
    pub async fn snapshot(&self) -> Arc<GraphSnapshot> {
        {
            let state = self.state.read().await;
            if let Some(snapshot) = &state.snapshot {
                return snapshot.clone();
            }
        }

        let mut state = self.state.write().await;
        if let Some(snapshot) = &state.snapshot {
            return snapshot.clone();
        }

        let snapshot = Arc::new(GraphSnapshot {
            version: state.version,
            taken_at: Utc::now(),
            topology: TopologyAnalyzer::analyze(&state.graph),
            graph: state.graph.clone(),
        });
        debug!(version = state.version, "Topology recomputed");
        state.snapshot = Some(snapshot.clone());
        snapshot
    }

    /// Current graph version.
    pub async fn version(&self) -> u64 {
        self.state.read().await.version
    }

    /// Register a service or replace its metadata.
    ///
    /// A new service, or a changed health score, adds a history sample.
    pub async fn upsert_node(&self, node: ServiceNode) -> AppResult<NodeUpsert> {
        node.validate()?;

        self.mutate(|graph| {
            let previous_score = graph.node(&node.id).map(|n| n.health.score);
            let outcome = match previous_score {
                Some(_) => NodeUpsert::Updated,
                None => NodeUpsert::Inserted,
            };
            let record = previous_score != Some(node.health.score);
            let sample = HistoryChange::Record(node.id.clone(), node.health.score);

            graph.nodes.insert(node.id.clone(), node.clone());
            let mutation = Mutation::new(outcome, vec![WriteOp::SaveNode(node)]);
            Ok(if record {
                mutation.with_history(sample)
            } else {
                mutation
            })
        })
        .await
    }

    /// Remove a service and every edge touching it.
    pub async fn remove_node(&self, id: &str) -> AppResult<RemovedService> {
        validate_id("service_id", id)?;

        self.mutate(|graph| {
            let node = graph
                .nodes
                .remove(id)
                .ok_or_else(|| AppError::not_found(id))?;
            let mut ops = drain_edges_for(graph, id);
            let edges_removed = ops.len();
            ops.push(WriteOp::DeleteNode(id.to_string()));
            Ok(Mutation::new(
                RemovedService {
                    node,
                    edges_removed,
                },
                ops,
            )
            .with_history(HistoryChange::Forget(id.to_string())))
        })
        .await
    }

    /// Insert an edge, keeping whichever of old and new has higher confidence.
    pub async fn upsert_edge(&self, edge: ServiceDependency) -> AppResult<EdgeUpsert> {
        let mut outcomes = self.upsert_edges(vec![edge]).await?;
        Ok(outcomes.pop().unwrap_or(EdgeUpsert::Ignored))
    }

    /// Apply several edge upserts as one mutation.
    ///
    /// The whole batch is rejected if any edge fails validation.
    pub async fn upsert_edges(&self, edges: Vec<ServiceDependency>) -> AppResult<Vec<EdgeUpsert>> {
        for edge in &edges {
            edge.validate()?;
        }

        self.mutate(|graph| {
            let mut ops = Vec::new();
            let mut outcomes = Vec::with_capacity(edges.len());

            for mut edge in edges {
                let key = edge.key();
                let outcome = match graph.edges.get(&key) {
                    Some(existing) if edge.confidence() < existing.confidence() => {
                        debug!(
                            edge = %key,
                            existing = existing.confidence(),
                            candidate = edge.confidence(),
                            "Keeping higher-confidence edge"
                        );
                        outcomes.push(EdgeUpsert::Ignored);
                        continue;
                    }
                    Some(existing) => {
                        edge.provenance.discovered_at = existing.provenance.discovered_at;
                        EdgeUpsert::Replaced
                    }
                    None => EdgeUpsert::Inserted,
                };

                for endpoint in [&edge.from, &edge.to] {
                    if !graph.contains(endpoint) {
                        info!(service_id = %endpoint, "Creating placeholder for unknown endpoint");
                        let placeholder = ServiceNode::placeholder(endpoint.clone());
                        graph.nodes.insert(endpoint.clone(), placeholder.clone());
                        ops.push(WriteOp::SaveNode(placeholder));
                    }
                }

                graph.edges.insert(key, edge.clone());
                ops.push(WriteOp::SaveEdge(edge));
                outcomes.push(outcome);
            }

            Ok(Mutation::new(outcomes, ops))
        })
        .await
    }

    /// Remove every edge touching a service, leaving the node in place.
    pub async fn remove_edges_for(&self, id: &str) -> AppResult<usize> {
        validate_id("service_id", id)?;
        self.mutate(|graph| {
            let ops = drain_edges_for(graph, id);
            Ok(Mutation::new(ops.len(), ops))
        })
        .await
    }

    /// Record a new health reading for a known service.
    pub async fn update_health(&self, id: &str, health: ServiceHealth) -> AppResult<()> {
        validate_id("service_id", id)?;
        health.validate()?;
        let score = health.score;

        self.mutate(|graph| {
            let node = graph
                .nodes
                .get_mut(id)
                .ok_or_else(|| AppError::not_found(id))?;
            node.health = health;
            Ok(Mutation::new((), vec![WriteOp::SaveNode(node.clone())])
                .with_history(HistoryChange::Record(id.to_string(), score)))
        })
        .await
    }

    /// Recorded health scores of a service, oldest first.
    pub async fn health_history(&self, id: &str) -> Vec<f64> {
        self.history
            .read()
            .await
            .get(id)
            .map(|samples| samples.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Apply `apply` to a copy of the graph, persist its writes as one batch,
    /// then publish.
    ///
    /// A mutation that produces no writes publishes nothing and keeps the
    /// current topology. History changes land before the writer lock is
    /// released, so they are ordered with the graph mutations.
    async fn mutate<T, F>(&self, apply: F) -> AppResult<T>
    where
        F: FnOnce(&mut DependencyGraph) -> AppResult<Mutation<T>>,
    {
        let _writer = self.writer.lock().await;

        let mut next = self.state.read().await.graph.clone();
        let Mutation {
            result,
            ops,
            history,
        } = apply(&mut next)?;
        if ops.is_empty() {
            return Ok(result);
        }

        self.repository.apply(&ops).await?;

        {
            let mut state = self.state.write().await;
            state.graph = next;
            state.version += 1;
            state.snapshot = None;
            debug!(version = state.version, writes = ops.len(), "Graph mutation published");
        }

        match history {
            Some(HistoryChange::Record(id, score)) => {
                let mut history = self.history.write().await;
                let samples = history.entry(id).or_default();
                if samples.len() == HEALTH_HISTORY_LIMIT {
                    samples.pop_front();
                }
                samples.push_back(score);
            }
            Some(HistoryChange::Forget(id)) => {
                self.history.write().await.remove(&id);
            }
            None => {}
        }

        Ok(result)
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

fn drain_edges_for(graph: &mut DependencyGraph, id: &str) -> Vec<WriteOp> {
    let keys: Vec<EdgeKey> = graph
        .edges
        .keys()
        .filter(|k| k.from == id || k.to == id)
        .cloned()
        .collect();
    keys.into_iter()
        .map(|key| {
            graph.edges.remove(&key);
            WriteOp::DeleteEdge(key)
        })
        .collect()
}
