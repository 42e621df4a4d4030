//! Persistence layer behind the graph store.
//!
//! The [`GraphStore`](crate::graph::GraphStore) keeps the live graph in memory
//! and writes every mutation through a [`GraphRepository`] before publishing
//! it. Two backings are provided: [`MemoryRepository`] and [`SqliteRepository`].

mod sqlite;

pub use sqlite::SqliteRepository;

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StorageResult;
use crate::graph::{DependencyGraph, EdgeKey, ServiceDependency, ServiceNode};

/// One repository write produced by a graph mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert or replace a node.
    SaveNode(ServiceNode),
    /// Delete a node. Its edges arrive as separate `DeleteEdge` ops.
    DeleteNode(String),
    /// Insert or replace the edge with the same `(from, to)` key.
    SaveEdge(ServiceDependency),
    DeleteEdge(EdgeKey),
}

/// Storage interface for service nodes and dependency edges.
#[async_trait]
pub trait GraphRepository: Send + Sync {
    /// Load every persisted node and edge.
    async fn load(&self) -> StorageResult<DependencyGraph>;

    /// Apply a batch of writes atomically.
    ///
    /// Either every op is persisted or, on error, none is.
    async fn apply(&self, ops: &[WriteOp]) -> StorageResult<()>;
}

/// Process-local repository.
#[derive(Default)]
pub struct MemoryRepository {
    nodes: RwLock<BTreeMap<String, ServiceNode>>,
    edges: RwLock<BTreeMap<EdgeKey, ServiceDependency>>,
}

impl MemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository pre-populated with a graph.
    pub fn with_graph(graph: DependencyGraph) -> Self {
        Self {
            nodes: RwLock::new(graph.nodes),
            edges: RwLock::new(graph.edges),
        }
    }
}

#[async_trait]
impl GraphRepository for MemoryRepository {
    async fn load(&self) -> StorageResult<DependencyGraph> {
        let nodes = self.nodes.read().await;
        let edges = self.edges.read().await;
        Ok(DependencyGraph {
            nodes: nodes.clone(),
            edges: edges.clone(),
        })
    }

    async fn apply(&self, ops: &[WriteOp]) -> StorageResult<()> {
        // Same lock order as `load`, held for the whole batch.
        let mut nodes = self.nodes.write().await;
        let mut edges = self.edges.write().await;

        for op in ops {
            match op {
                WriteOp::SaveNode(node) => {
                    nodes.insert(node.id.clone(), node.clone());
                }
                WriteOp::DeleteNode(id) => {
                    nodes.remove(id);
                }
                WriteOp::SaveEdge(edge) => {
                    edges.insert(edge.key(), edge.clone());
                }
                WriteOp::DeleteEdge(key) => {
                    edges.remove(key);
                }
            }
        }
        Ok(())
    }
}
