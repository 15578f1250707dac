use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// Re-export component config types
pub use crate::enrichment::EnrichmentConfig;
pub use crate::seed::SeedConfig;
pub use crate::store::{RemoteBackend, RemoteConfig};

use crate::sync::SyncConfig;

/// Complete service configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub seed: SeedConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl ServiceConfig {
    /// Orchestrator settings derived from the refresh and enrichment sections
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            refresh_interval: Duration::from_secs(
                self.refresh.interval_hours.saturating_mul(60 * 60),
            ),
            enable_enrichment: self.enrichment.enabled,
            enrichment_timeout: Duration::from_secs(self.enrichment.timeout_secs),
            max_concurrent_enrichments: self.enrichment.max_concurrent,
        }
    }
}

/// Staleness configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// States older than this are re-enriched on the next read
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,
    /// Re-enrich every state once at startup
    #[serde(default)]
    pub force_on_start: bool,
}

fn default_interval_hours() -> u64 {
    48
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_interval_hours(),
            force_on_start: false,
        }
    }
}

/// Local cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Snapshot file, relative to the working directory unless absolute
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

fn default_cache_path() -> PathBuf {
    PathBuf::from(".tmp").join("state-data-cache.json")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
        }
    }
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &Path) -> Result<ServiceConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: ServiceConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Load the file named by STATECRAFT_CONFIG, or defaults when it is unset
/// or points at a missing file.
pub fn load_from_env() -> Result<ServiceConfig> {
    match std::env::var("STATECRAFT_CONFIG") {
        Ok(path) if Path::new(&path).exists() => load_config(Path::new(&path)),
        _ => Ok(ServiceConfig::default()),
    }
}
