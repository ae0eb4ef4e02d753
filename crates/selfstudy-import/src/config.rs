//! Configuration for the import service

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main import service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Database location
    pub storage: StorageConfig,
    /// Background worker configuration
    pub processing: ProcessingConfig,
    /// Thresholds and taxonomy
    pub mapping: MappingConfig,
    /// External classifier hand-off
    pub classifier: ClassifierConfig,
}

impl ImportConfig {
    /// Load from a TOML file. Missing sections and keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| {
            Error::Config(format!("Invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("mapping.local_threshold", self.mapping.local_threshold),
            ("mapping.external_threshold", self.mapping.external_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{} must be within 0.0-1.0, got {}", name, value)));
            }
        }
        if self.processing.queue_capacity == 0 {
            return Err(Error::Config("processing.queue_capacity must be at least 1".into()));
        }
        if self.classifier.confidence_threshold > 100 {
            return Err(Error::Config(format!(
                "classifier.confidence_threshold must be within 0-100, got {}",
                self.classifier.confidence_threshold
            )));
        }
        if self.classifier.enabled {
            if self.classifier.endpoint.trim().is_empty() {
                return Err(Error::Config("classifier.endpoint is required when the classifier is enabled".into()));
            }
            if self.classifier.callback_url.trim().is_empty() {
                return Err(Error::Config("classifier.callback_url is required when the classifier is enabled".into()));
            }
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum upload size in bytes (default: 50MB)
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
            max_upload_size: 50 * 1024 * 1024,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use absolute path to avoid depending on the working directory
        let database_path = dirs::data_local_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")))
            .join("selfstudy-import")
            .join("imports.db");

        Self { database_path }
    }
}

/// Processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Imports processed concurrently (default: CPU count, max 4)
    pub workers: Option<usize>,
    /// Bounded queue between upload handlers and the worker
    pub queue_capacity: usize,
    /// Upper bound on parsing a single document
    pub parse_timeout_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            workers: None,
            queue_capacity: 100,
            parse_timeout_secs: 300,
        }
    }
}

impl ProcessingConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| num_cpus::get().min(4)).max(1)
    }

    pub fn parse_timeout(&self) -> Duration {
        Duration::from_secs(self.parse_timeout_secs)
    }
}

/// Mapping configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Acceptance threshold for local pattern suggestions
    pub local_threshold: f32,
    /// Acceptance threshold for external results, after scaling to 0.0-1.0
    pub external_threshold: f32,
    /// TOML taxonomy; the built-in default is used when unset
    pub taxonomy_path: Option<PathBuf>,
    /// Characters of section content in list views
    pub preview_chars: usize,
    /// Mapping writes shown in the status view
    pub recent_activity: usize,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            local_threshold: 0.6,
            external_threshold: 0.5,
            taxonomy_path: None,
            preview_chars: 200,
            recent_activity: 10,
        }
    }
}

/// How outbound chunk requests authenticate
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum ClassifierAuth {
    #[default]
    None,
    /// Secret sent in a named header
    SharedSecret { header: String, secret: String },
    /// `Authorization: Bearer <token>`
    Bearer { token: String },
}

/// External classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Hand documents to the external classifier instead of the local mapper
    pub enabled: bool,
    /// URL chunk requests are POSTed to
    pub endpoint: String,
    /// Where the classifier sends its results
    pub callback_url: String,
    /// Taxonomy name sent with every chunk
    pub taxonomy_name: String,
    pub auth: ClassifierAuth,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Pause between consecutive chunk sends
    pub chunk_delay_ms: u64,
    /// Minimum confidence (0-100) requested from the classifier
    pub confidence_threshold: u32,
    /// Inbound callbacks must carry this in `X-Callback-Secret` when set
    pub callback_secret: Option<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            callback_url: String::new(),
            taxonomy_name: "default".to_string(),
            auth: ClassifierAuth::None,
            timeout_secs: 30,
            chunk_delay_ms: 250,
            confidence_threshold: 50,
            callback_secret: None,
        }
    }
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}
