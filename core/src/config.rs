//! Harvester configuration loading
//!
//! Loads configuration from `~/.config/oxomo/oxomo.toml` (or `OXOMO_CONFIG` env).
//!
//! ```toml
//! database = "dspace"
//! store_path = "~/.local/share/oxomo/oxomo.db"
//! workers = 8
//!
//! [[endpoints]]
//! url = "https://repository.example.edu/oai/request"
//! collection = "example"
//!
//! [retry]
//! max_retries = 2
//!
//! [http]
//! timeout_secs = 60
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{HarvestError, Result};
use crate::harvest::{HarvestOptions, default_workers};
use crate::namespace::{Namespace, validate_prefix};
use crate::retry::RetryConfig;

/// One remote repository and the collection prefix its data is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
    pub collection: String,
}

/// HTTP client settings for the OAI-PMH adapter
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_user_agent() -> String {
    format!("oxomo/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

/// Root configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HarvestConfig {
    /// Logical database every collection is created in
    #[serde(default = "default_database")]
    pub database: String,

    /// SQLite file backing the document store
    #[serde(default = "default_store_path")]
    pub store_path: String,

    /// Worker-pool size; host parallelism when unset
    #[serde(default)]
    pub workers: Option<usize>,

    #[serde(default = "default_metadata_prefix")]
    pub metadata_prefix: String,

    /// Log progress every N completed items
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,

    /// Harvested in this order
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

fn default_database() -> String {
    "oxomo".to_string()
}

fn default_store_path() -> String {
    dirs::home_dir()
        .map(|h| {
            h.join(".local")
                .join("share")
                .join("oxomo")
                .join("oxomo.db")
                .to_string_lossy()
                .into_owned()
        })
        .unwrap_or_else(|| "oxomo.db".to_string())
}

fn default_metadata_prefix() -> String {
    "oai_dc".to_string()
}

fn default_progress_every() -> usize {
    100
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            store_path: default_store_path(),
            workers: None,
            metadata_prefix: default_metadata_prefix(),
            progress_every: default_progress_every(),
            endpoints: Vec::new(),
            retry: RetryConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl HarvestConfig {
    /// Environment variable for config path override
    pub const ENV_CONFIG_PATH: &'static str = "OXOMO_CONFIG";

    /// Default config filename
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "oxomo.toml";

    /// Load configuration.
    ///
    /// Resolution order:
    /// 1. `explicit` (the CLI `--config` flag)
    /// 2. `OXOMO_CONFIG` environment variable
    /// 3. `~/.config/oxomo/oxomo.toml`
    ///
    /// A missing file is an error: without endpoints there is nothing to do.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::resolve_config_path);

        if !path.exists() {
            return Err(HarvestError::config(format!(
                "config not found at {}",
                path.display()
            )));
        }

        Self::load_from_path(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            HarvestError::config_with_source(
                format!("failed to read config at {}", path.display()),
                e,
            )
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from TOML string
    pub fn parse(contents: &str) -> Result<Self> {
        let cfg: HarvestConfig = toml::from_str(contents)
            .map_err(|e| HarvestError::config_with_source("failed to parse config", e))?;

        cfg.validate()?;
        Ok(cfg)
    }

    fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .map(|h| {
                h.join(".config")
                    .join("oxomo")
                    .join(Self::DEFAULT_CONFIG_FILENAME)
            })
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    fn validate(&self) -> Result<()> {
        if self.database.trim().is_empty() {
            return Err(HarvestError::config("database must not be empty"));
        }
        if self.metadata_prefix.trim().is_empty() {
            return Err(HarvestError::config("metadata_prefix must not be empty"));
        }
        if self.workers == Some(0) {
            return Err(HarvestError::config("workers must be at least 1"));
        }

        let mut prefixes = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.url.trim().is_empty() {
                return Err(HarvestError::config(format!(
                    "endpoint for collection {:?} has an empty url",
                    endpoint.collection
                )));
            }
            validate_prefix(&endpoint.collection).map_err(HarvestError::config)?;
            if !prefixes.insert(endpoint.collection.as_str()) {
                return Err(HarvestError::config(format!(
                    "collection {:?} is mapped to more than one endpoint",
                    endpoint.collection
                )));
            }
        }

        if self.endpoints.is_empty() {
            tracing::warn!("no endpoints configured");
        }
        Ok(())
    }

    /// Get the resolved store path (expanding ~ if needed)
    pub fn resolved_store_path(&self) -> PathBuf {
        let path = &self.store_path;
        if let Some(stripped) = path.strip_prefix("~/")
            && let Some(home) = dirs::home_dir()
        {
            return home.join(stripped);
        }
        PathBuf::from(path)
    }

    pub fn namespace(&self, endpoint: &EndpointConfig) -> Namespace {
        Namespace::new(&self.database, &endpoint.collection)
    }

    /// Endpoints to operate on: all of them, or only the one mapped to
    /// `collection`.
    pub fn select_endpoints(&self, collection: Option<&str>) -> Result<Vec<EndpointConfig>> {
        match collection {
            None => Ok(self.endpoints.clone()),
            Some(name) => self
                .endpoints
                .iter()
                .find(|e| e.collection == name)
                .cloned()
                .map(|e| vec![e])
                .ok_or_else(|| {
                    HarvestError::config(format!("no endpoint configured for collection {name:?}"))
                }),
        }
    }

    /// Orchestrator options; `workers_override` (CLI flag) wins over config.
    pub fn harvest_options(&self, workers_override: Option<usize>) -> HarvestOptions {
        HarvestOptions {
            workers: workers_override
                .or(self.workers)
                .unwrap_or_else(default_workers),
            metadata_prefix: self.metadata_prefix.clone(),
            retry: self.retry.clone(),
            progress_every: self.progress_every,
        }
    }
}
