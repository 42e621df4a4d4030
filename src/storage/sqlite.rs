use async_trait::async_trait;
use chrono::Utc;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::{GraphRepository, WriteOp};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::graph::{DependencyGraph, ServiceDependency, ServiceNode};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed graph repository.
///
/// Nodes and edges are stored as JSON payloads keyed by id and `(from, to)`.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Open (or create) the database described by `config`
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let repository = Self { pool };
        repository.run_migrations().await?;

        Ok(repository)
    }

    /// Open a private in-memory database, mostly for tests
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        // Every connection to :memory: is a separate database, so pin the pool to one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let repository = Self { pool };
        repository.run_migrations().await?;

        Ok(repository)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_payload<T: serde::Serialize>(value: &T) -> StorageResult<String> {
    serde_json::to_string(value).map_err(|e| StorageError::Serialization {
        message: e.to_string(),
    })
}

#[async_trait]
impl GraphRepository for SqliteRepository {
    async fn load(&self) -> StorageResult<DependencyGraph> {
        let mut graph = DependencyGraph::new();

        let node_rows = sqlx::query("SELECT id, payload FROM service_nodes ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        for row in node_rows {
            let id: String = row.try_get("id")?;
            let payload: String = row.try_get("payload")?;
            match serde_json::from_str::<ServiceNode>(&payload) {
                Ok(node) => {
                    graph.nodes.insert(node.id.clone(), node);
                }
                Err(e) => warn!(id = %id, error = %e, "Skipping unreadable service node row"),
            }
        }

        let edge_rows = sqlx::query(
            "SELECT from_id, to_id, payload FROM service_dependencies ORDER BY from_id, to_id",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in edge_rows {
            let from: String = row.try_get("from_id")?;
            let to: String = row.try_get("to_id")?;
            let payload: String = row.try_get("payload")?;
            match serde_json::from_str::<ServiceDependency>(&payload) {
                Ok(edge) => {
                    graph.edges.insert(edge.key(), edge);
                }
                Err(e) => warn!(
                    from = %from,
                    to = %to,
                    error = %e,
                    "Skipping unreadable dependency row"
                ),
            }
        }

        Ok(graph)
    }

    async fn apply(&self, ops: &[WriteOp]) -> StorageResult<()> {
        if ops.is_empty() {
            return Ok(());
        }

        // Rolled back on drop if any statement fails before commit.
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        for op in ops {
            match op {
                WriteOp::SaveNode(node) => save_node(&mut *tx, node, &now).await?,
                WriteOp::DeleteNode(id) => {
                    sqlx::query("DELETE FROM service_nodes WHERE id = ?")
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                }
                WriteOp::SaveEdge(edge) => save_edge(&mut *tx, edge, &now).await?,
                WriteOp::DeleteEdge(key) => {
                    sqlx::query("DELETE FROM service_dependencies WHERE from_id = ? AND to_id = ?")
                        .bind(&key.from)
                        .bind(&key.to)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        tx.commit().await?;
        debug!(writes = ops.len(), "Graph batch committed");
        Ok(())
    }
}

async fn save_node(
    conn: &mut SqliteConnection,
    node: &ServiceNode,
    now: &str,
) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO service_nodes (id, payload, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at
        "#,
    )
    .bind(&node.id)
    .bind(to_payload(node)?)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(())
}

async fn save_edge(
    conn: &mut SqliteConnection,
    edge: &ServiceDependency,
    now: &str,
) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO service_dependencies (from_id, to_id, confidence, payload, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(from_id, to_id) DO UPDATE SET
            confidence = excluded.confidence,
            payload = excluded.payload,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&edge.from)
    .bind(&edge.to)
    .bind(edge.confidence())
    .bind(to_payload(edge)?)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(())
}
