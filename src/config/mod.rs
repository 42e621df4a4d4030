use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub forecasting: ForecastingConfig,
    pub discovery: DiscoveryConfig,
    pub cascade: CascadeConfig,
    pub blast_radius: BlastRadiusConfig,
    pub impact: ImpactConfig,
    pub cache: CacheConfig,
}

/// Which graph repository backs the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub backend: StorageBackend,
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration shared by the outbound clients
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// External forecasting service configuration
#[derive(Debug, Clone)]
pub struct ForecastingConfig {
    /// Base URL of the forecasting service. `None` disables forecasting.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Hard time box around a single `predict` call
    pub timeout_ms: u64,
    pub horizon_minutes: u32,
    pub confidence_level: f64,
}

/// Dependency discovery configuration
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Run the periodic background re-discovery task
    pub enabled: bool,
    pub interval_secs: u64,
    pub source_timeout_ms: u64,
    /// Candidates at or below this confidence are dropped
    pub min_confidence: f64,
    pub manifest_path: Option<PathBuf>,
    /// `method=url` pairs for remote evidence feeds
    pub evidence_endpoints: Vec<(String, String)>,
}

/// Cascade probability scoring, tunable rather than fixed
#[derive(Debug, Clone)]
pub struct CascadeConfig {
    pub probability_cap: f64,
    /// How strongly the forecast confidence scales path probability (0 = ignore)
    pub forecast_weight: f64,
    /// Ranked paths returned to callers
    pub max_paths: usize,
    pub max_depth: usize,
    /// Upper bound on simple paths explored per analysis
    pub max_enumerated_paths: usize,
}

/// Blast radius tier thresholds in seconds
#[derive(Debug, Clone)]
pub struct BlastRadiusConfig {
    pub tier1_secs: f64,
    pub tier2_secs: f64,
    pub tier3_secs: f64,
}

/// Business impact estimation defaults
#[derive(Debug, Clone)]
pub struct ImpactConfig {
    pub revenue_per_minute: f64,
    pub users_per_service: u64,
    pub operational_cost_per_minute: f64,
}

/// Analysis result cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub max_entries: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database = DatabaseConfig {
            backend: match env::var("STORAGE_BACKEND")
                .unwrap_or_else(|_| "memory".to_string())
                .to_lowercase()
                .as_str()
            {
                "memory" => StorageBackend::Memory,
                "sqlite" => StorageBackend::Sqlite,
                other => {
                    return Err(AppError::Config {
                        message: format!("Unknown STORAGE_BACKEND: {}", other),
                    })
                }
            },
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/cascade.db".to_string()),
            ),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: env_or("REQUEST_TIMEOUT_MS", 10000),
            max_retries: env_or("MAX_RETRIES", 2),
            retry_delay_ms: env_or("RETRY_DELAY_MS", 500),
        };

        let forecasting = ForecastingConfig {
            base_url: env::var("FORECAST_BASE_URL").ok().filter(|s| !s.is_empty()),
            api_key: env::var("FORECAST_API_KEY").ok().filter(|s| !s.is_empty()),
            timeout_ms: env_or("FORECAST_TIMEOUT_MS", 2000),
            horizon_minutes: env_or("FORECAST_HORIZON_MINUTES", 30),
            confidence_level: env_or("FORECAST_CONFIDENCE_LEVEL", 0.95),
        };

        let discovery = DiscoveryConfig {
            enabled: env::var("DISCOVERY_ENABLED")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(true),
            interval_secs: env_or("DISCOVERY_INTERVAL_SECS", 300),
            source_timeout_ms: env_or("DISCOVERY_SOURCE_TIMEOUT_MS", 5000),
            min_confidence: env_or("DISCOVERY_MIN_CONFIDENCE", 0.5),
            manifest_path: env::var("DEPENDENCY_MANIFEST_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            evidence_endpoints: parse_endpoints(
                &env::var("EVIDENCE_ENDPOINTS").unwrap_or_default(),
            )?,
        };

        let cascade = CascadeConfig {
            probability_cap: env_or("CASCADE_PROBABILITY_CAP", 0.95),
            forecast_weight: env_or("CASCADE_FORECAST_WEIGHT", 1.0),
            max_paths: env_or("CASCADE_MAX_PATHS", 10),
            max_depth: env_or("CASCADE_MAX_DEPTH", 10),
            max_enumerated_paths: env_or("CASCADE_MAX_ENUMERATED_PATHS", 5000),
        };

        let blast_radius = BlastRadiusConfig {
            tier1_secs: env_or("BLAST_TIER1_SECS", 120.0),
            tier2_secs: env_or("BLAST_TIER2_SECS", 600.0),
            tier3_secs: env_or("BLAST_TIER3_SECS", 1800.0),
        };

        let impact = ImpactConfig {
            revenue_per_minute: env_or("IMPACT_REVENUE_PER_MINUTE", 100.0),
            users_per_service: env_or("IMPACT_USERS_PER_SERVICE", 1000),
            operational_cost_per_minute: env_or("IMPACT_COST_PER_MINUTE", 25.0),
        };

        let cache = CacheConfig {
            ttl_secs: env_or("ANALYSIS_CACHE_TTL_SECS", 60),
            max_entries: env_or("ANALYSIS_CACHE_MAX_ENTRIES", 1000),
        };

        let config = Config {
            database,
            logging,
            request,
            forecasting,
            discovery,
            cascade,
            blast_radius,
            impact,
            cache,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject tunables that would make the scoring functions meaningless
    pub fn validate(&self) -> Result<(), AppError> {
        let cap = self.cascade.probability_cap;
        if !(cap > 0.0 && cap <= 1.0) {
            return Err(AppError::Config {
                message: format!("CASCADE_PROBABILITY_CAP must be in (0, 1], got {}", cap),
            });
        }
        if !(0.0..=1.0).contains(&self.cascade.forecast_weight) {
            return Err(AppError::Config {
                message: format!(
                    "CASCADE_FORECAST_WEIGHT must be in [0, 1], got {}",
                    self.cascade.forecast_weight
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.discovery.min_confidence) {
            return Err(AppError::Config {
                message: format!(
                    "DISCOVERY_MIN_CONFIDENCE must be in [0, 1], got {}",
                    self.discovery.min_confidence
                ),
            });
        }
        let tiers = &self.blast_radius;
        if !(tiers.tier1_secs > 0.0
            && tiers.tier1_secs < tiers.tier2_secs
            && tiers.tier2_secs < tiers.tier3_secs)
        {
            return Err(AppError::Config {
                message: format!(
                    "Blast radius tiers must be positive and increasing, got {}/{}/{}",
                    tiers.tier1_secs, tiers.tier2_secs, tiers.tier3_secs
                ),
            });
        }
        if self.discovery.enabled && self.discovery.interval_secs == 0 {
            return Err(AppError::Config {
                message: "DISCOVERY_INTERVAL_SECS must be at least 1 while discovery is enabled"
                    .to_string(),
            });
        }
        if self.cascade.max_paths == 0 || self.cascade.max_depth == 0 {
            return Err(AppError::Config {
                message: "CASCADE_MAX_PATHS and CASCADE_MAX_DEPTH must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Parse `method=url,method=url` into pairs.
fn parse_endpoints(raw: &str) -> Result<Vec<(String, String)>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            pair.split_once('=')
                .map(|(method, url)| (method.trim().to_string(), url.trim().to_string()))
                .filter(|(method, url)| !method.is_empty() && !url.is_empty())
                .ok_or_else(|| AppError::Config {
                    message: format!("Invalid EVIDENCE_ENDPOINTS entry: {}", pair),
                })
        })
        .collect()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: PathBuf::from("./data/cascade.db"),
            max_connections: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10000,
            max_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

impl Default for ForecastingConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_ms: 2000,
            horizon_minutes: 30,
            confidence_level: 0.95,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300, // 5 minutes
            source_timeout_ms: 5000,
            min_confidence: 0.5,
            manifest_path: None,
            evidence_endpoints: Vec::new(),
        }
    }
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            probability_cap: 0.95,
            forecast_weight: 1.0,
            max_paths: 10,
            max_depth: 10,
            max_enumerated_paths: 5000,
        }
    }
}

impl Default for BlastRadiusConfig {
    fn default() -> Self {
        Self {
            tier1_secs: 120.0,
            tier2_secs: 600.0,
            tier3_secs: 1800.0,
        }
    }
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            revenue_per_minute: 100.0,
            users_per_service: 1000,
            operational_cost_per_minute: 25.0,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            max_entries: 1000,
        }
    }
}
