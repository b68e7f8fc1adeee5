//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use orderfeed_core::{HttpConfig, RetryPolicy};
use orderfeed_shopify::{
    GenderRule, GenderRules, MatchMode, OutputLayout, PipelineConfig, StorageTarget,
    default_rules,
};
use orderfeed_store::TokenSource;

/// Global configuration for orderfeed
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub shopify: ShopifyConfig,
    pub storage: StorageConfig,
    pub output: OutputConfig,
    pub http: HttpSettings,
    pub gender: GenderConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShopifyConfig {
    /// Shop handle or `*.myshopify.com` domain
    pub store: String,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub access_token: Option<String>,
    pub api_version: String,
    pub page_size: u32,
    /// Pause between order pages
    pub page_delay_ms: u64,
    /// Without a checkpoint, only fetch orders from the last N days
    pub initial_lookback_days: Option<u32>,
    /// Keep only orders with these fulfillment statuses (empty: all)
    pub fulfillment_statuses: Vec<String>,
}

impl Default for ShopifyConfig {
    fn default() -> Self {
        Self {
            store: std::env::var("SHOPIFY_STORE").unwrap_or_default(),
            access_token: std::env::var("SHOPIFY_ACCESS_TOKEN").ok(),
            api_version: "2025-04".to_string(),
            page_size: 25,
            page_delay_ms: 500,
            initial_lookback_days: None,
            fulfillment_statuses: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Gcs,
    Local,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,
    pub bucket: String,
    /// Root directory of the `local` backend
    pub local_dir: PathBuf,
    /// Static OAuth token; the metadata server is used when unset
    #[serde(deserialize_with = "deserialize_env_var")]
    pub access_token: Option<String>,
    /// Send no credentials (storage emulators)
    pub anonymous: bool,
    /// Storage API endpoint override
    pub api_base: Option<String>,
    pub checkpoint_prefix: String,
    pub output_prefix: String,
    pub raw_prefix: String,
    pub file_prefix: String,
    pub publish_raw: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let layout = OutputLayout::default();
        Self {
            backend: Backend::Gcs,
            bucket: String::new(),
            local_dir: PathBuf::from("./bucket"),
            access_token: std::env::var("GCS_ACCESS_TOKEN").ok(),
            anonymous: false,
            api_base: None,
            checkpoint_prefix: "LatestOrder".to_string(),
            output_prefix: layout.output_prefix,
            raw_prefix: layout.raw_prefix,
            file_prefix: layout.file_prefix,
            publish_raw: false,
        }
    }
}

impl StorageConfig {
    pub fn target(&self) -> StorageTarget {
        match self.backend {
            Backend::Local => StorageTarget::Local(self.local_dir.clone()),
            Backend::Gcs => StorageTarget::Gcs {
                bucket: self.bucket.clone(),
                token: self.token_source(),
                api_base: self.api_base.clone(),
            },
        }
    }

    fn token_source(&self) -> TokenSource {
        match (&self.access_token, self.anonymous) {
            (_, true) => TokenSource::Anonymous,
            (Some(token), false) => TokenSource::Static(token.clone()),
            (None, false) => TokenSource::Metadata,
        }
    }

    /// Where the blobs go, for display
    pub fn describe(&self) -> String {
        match self.backend {
            Backend::Gcs => format!("gs://{}", self.bucket),
            Backend::Local => self.local_dir.display().to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub staging_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("./staging"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Seconds
    pub connect_timeout: u64,
    /// Seconds
    pub request_timeout: u64,
    pub max_retries: u32,
    /// Base backoff between retries
    pub backoff_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        let defaults = HttpConfig::default();
        Self {
            connect_timeout: defaults.connect_timeout.as_secs(),
            request_timeout: defaults.request_timeout.as_secs(),
            max_retries: defaults.max_retries,
            backoff_ms: u64::try_from(defaults.backoff_base.as_millis()).unwrap_or(2000),
        }
    }
}

impl HttpSettings {
    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            request_timeout: Duration::from_secs(self.request_timeout),
            max_retries: self.max_retries,
            backoff_base: Duration::from_millis(self.backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenderConfig {
    pub match_mode: MatchMode,
    /// Ordered; first matching rule wins
    pub rules: Vec<GenderRule>,
}

impl Default for GenderConfig {
    fn default() -> Self {
        Self {
            match_mode: MatchMode::default(),
            rules: default_rules(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./orderfeed.toml (current directory)
    /// 2. ~/.config/orderfeed/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("orderfeed.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "orderfeed") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn gender_rules(&self) -> GenderRules {
        GenderRules::new(self.gender.match_mode, self.gender.rules.clone())
    }

    /// Runtime pipeline configuration
    pub fn pipeline_config(&self) -> PipelineConfig {
        let http = self.http.http_config();
        PipelineConfig {
            store: self.shopify.store.clone(),
            access_token: self.shopify.access_token.clone().unwrap_or_default(),
            api_version: self.shopify.api_version.clone(),
            page_size: self.shopify.page_size,
            storage: self.storage.target(),
            checkpoint_prefix: self.storage.checkpoint_prefix.clone(),
            layout: OutputLayout {
                output_prefix: self.storage.output_prefix.clone(),
                raw_prefix: self.storage.raw_prefix.clone(),
                file_prefix: self.storage.file_prefix.clone(),
            },
            staging_dir: self.output.staging_dir.clone(),
            gender: self.gender_rules(),
            fulfillment_statuses: self.shopify.fulfillment_statuses.clone(),
            initial_lookback_days: self.shopify.initial_lookback_days,
            publish_raw: self.storage.publish_raw,
            page_delay: Duration::from_millis(self.shopify.page_delay_ms),
            retry: RetryPolicy::new(http.max_retries, http.backoff_base),
        }
    }
}
