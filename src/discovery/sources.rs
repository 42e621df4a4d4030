use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{CandidateEdge, EvidenceSource};
use crate::config::RequestConfig;
use crate::error::{EvidenceError, EvidenceResult};
use crate::graph::{
    BusinessProfile, Criticality, DeploymentInfo, ServiceKind, ServiceNode, SlaTargets,
};

// ============================================================================
// Manifest
// ============================================================================

/// A service declared in a dependency manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestService {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: ServiceKind,
    #[serde(default)]
    pub criticality: Criticality,
    #[serde(default)]
    pub sla: SlaTargets,
    #[serde(default)]
    pub deployment: DeploymentInfo,
    #[serde(default)]
    pub business: BusinessProfile,
}

impl From<ManifestService> for ServiceNode {
    fn from(service: ManifestService) -> Self {
        let name = service.name.unwrap_or_else(|| service.id.clone());
        let mut node = ServiceNode::new(service.id, service.kind)
            .with_name(name)
            .with_criticality(service.criticality)
            .with_business(service.business);
        node.sla = service.sla;
        node.deployment = service.deployment;
        node
    }
}

/// Declarative description of services and their dependencies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub services: Vec<ManifestService>,
    #[serde(default)]
    pub dependencies: Vec<CandidateEdge>,
}

impl Manifest {
    /// Read and parse a manifest file.
    pub async fn load(path: &Path) -> EvidenceResult<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let manifest: Manifest =
            serde_json::from_str(&raw).map_err(|e| EvidenceError::InvalidResponse {
                message: format!("Failed to parse manifest {}: {}", path.display(), e),
            })?;
        info!(
            path = %path.display(),
            services = manifest.services.len(),
            dependencies = manifest.dependencies.len(),
            "Dependency manifest loaded"
        );
        Ok(manifest)
    }
}

/// Configuration-inspection source backed by a manifest.
///
/// The manifest is re-read on every query so edits are picked up by the next
/// discovery run.
pub struct ManifestSource {
    path: PathBuf,
}

impl ManifestSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EvidenceSource for ManifestSource {
    fn method(&self) -> &str {
        "configuration"
    }

    async fn discover(&self, service_id: &str) -> EvidenceResult<Vec<CandidateEdge>> {
        let manifest = Manifest::load(&self.path).await?;
        let source = format!("manifest:{}", self.path.display());
        Ok(manifest
            .dependencies
            .into_iter()
            .filter(|c| c.from == service_id || c.to == service_id)
            .map(|c| c.with_evidence(source.clone()))
            .collect())
    }
}

// ============================================================================
// HTTP evidence feed
// ============================================================================

#[derive(Debug, Deserialize)]
struct EvidenceResponse {
    #[serde(default)]
    dependencies: Vec<CandidateEdge>,
}

/// Remote evidence feed exposing `GET {base_url}/v1/dependencies/{service}`.
#[derive(Clone)]
pub struct HttpEvidenceSource {
    method: String,
    client: Client,
    base_url: String,
    endpoint: Url,
    timeout_ms: u64,
}

impl HttpEvidenceSource {
    /// Create a source reporting itself as `method`
    pub fn new(
        method: impl Into<String>,
        base_url: &str,
        request_config: &RequestConfig,
    ) -> EvidenceResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(EvidenceError::Http)?;

        let base_url = base_url.trim_end_matches('/').to_string();
        let endpoint = Url::parse(&base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| EvidenceError::Unavailable {
                message: format!("Invalid evidence feed URL: {}", base_url),
            })?;

        Ok(Self {
            method: method.into(),
            client,
            base_url,
            endpoint,
            timeout_ms: request_config.timeout_ms,
        })
    }

    /// `{base_url}/v1/dependencies/{service_id}` with the id as one encoded segment.
    pub fn dependencies_url(&self, service_id: &str) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["v1", "dependencies"])
                .push(service_id);
        }
        url
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl EvidenceSource for HttpEvidenceSource {
    fn method(&self) -> &str {
        &self.method
    }

    async fn discover(&self, service_id: &str) -> EvidenceResult<Vec<CandidateEdge>> {
        let url = self.dependencies_url(service_id);
        debug!(method = %self.method, url = %url, "Querying evidence feed");

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                EvidenceError::Timeout {
                    timeout_ms: self.timeout_ms,
                }
            } else {
                EvidenceError::Http(e)
            }
        })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(EvidenceError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let body: EvidenceResponse =
            response
                .json()
                .await
                .map_err(|e| EvidenceError::InvalidResponse {
                    message: format!("Failed to parse response: {}", e),
                })?;

        Ok(body.dependencies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MANIFEST: &str = r#"{
        "services": [
            {"id": "auth", "kind": "auth", "criticality": "critical"},
            {"id": "api", "name": "Public API", "kind": "api"}
        ],
        "dependencies": [
            {"from": "auth", "to": "api", "kind": "synchronous", "confidence": 0.95},
            {"from": "db", "to": "api", "kind": "data"},
            {"from": "cache", "to": "web"}
        ]
    }"#;

    #[tokio::test]
    async fn test_manifest_source_filters_by_service() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MANIFEST.as_bytes()).unwrap();

        let source = ManifestSource::new(file.path());
        let found = source.discover("api").await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].confidence, 0.9);
        assert!(found[0].evidence[0].starts_with("manifest:"));
    }

    #[tokio::test]
    async fn test_manifest_services_become_nodes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MANIFEST.as_bytes()).unwrap();

        let manifest = Manifest::load(file.path()).await.unwrap();
        let nodes: Vec<ServiceNode> = manifest.services.into_iter().map(Into::into).collect();
        assert_eq!(nodes[0].name, "auth");
        assert_eq!(nodes[0].criticality, Criticality::Critical);
        assert_eq!(nodes[1].name, "Public API");
        assert!(!nodes[1].placeholder);
    }

    fn request_config() -> RequestConfig {
        RequestConfig {
            timeout_ms: 1000,
            max_retries: 0,
            retry_delay_ms: 10,
        }
    }

    #[test]
    fn test_dependencies_url_encodes_service_id() {
        let source =
            HttpEvidenceSource::new("traces", "http://feeds:8080/", &request_config()).unwrap();
        assert_eq!(
            source.dependencies_url("checkout").as_str(),
            "http://feeds:8080/v1/dependencies/checkout"
        );
        assert_eq!(
            source.dependencies_url("team/api?v=2#x").as_str(),
            "http://feeds:8080/v1/dependencies/team%2Fapi%3Fv=2%23x"
        );

        let prefixed =
            HttpEvidenceSource::new("traces", "http://feeds/mesh", &request_config()).unwrap();
        assert_eq!(
            prefixed.dependencies_url("db").as_str(),
            "http://feeds/mesh/v1/dependencies/db"
        );
    }

    #[test]
    fn test_invalid_feed_url_rejected() {
        let err = HttpEvidenceSource::new("traces", "not a url", &request_config())
            .err()
            .unwrap();
        assert!(matches!(err, EvidenceError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_missing_manifest_is_io_error() {
        let source = ManifestSource::new("/nonexistent/manifest.json");
        let err = source.discover("api").await.unwrap_err();
        assert!(matches!(err, EvidenceError::Io(_)));
    }
}
