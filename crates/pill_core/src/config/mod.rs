//! Layered configuration: built-in defaults, then an optional TOML file, then environment.
//!
//! Environment variables use the `PILLPAL_` prefix with `__` separating nested keys
//! (`PILLPAL_RETRIEVAL__TOP_K=5`). `GEMINI_API_KEY` is also honoured for the provider key.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::NotificationPriority;
use crate::error::{AppError, CONFIGURATION_INVALID};

pub const ENV_PREFIX: &str = "PILLPAL_";
pub const DEFAULT_CONFIG_FILENAME: &str = "pillpal.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexConfig {
    pub root: PathBuf,
    pub collection: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./medicines"),
            collection: "meds".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeminiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub embedding_model: String,
    pub generation_model: String,
    pub embed_timeout_secs: u64,
    pub generate_timeout_secs: u64,
    pub max_batch_size: usize,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: None,
            embedding_model: "text-embedding-004".to_string(),
            generation_model: "gemini-2.5-flash".to_string(),
            embed_timeout_secs: 10,
            generate_timeout_secs: 30,
            max_batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotifyConfig {
    pub base_url: String,
    pub topic: String,
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub tags: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            base_url: "https://ntfy.sh".to_string(),
            topic: "PillPal".to_string(),
            title: "Pill Pal - リマインダー".to_string(),
            message: "お薬を飲んでください! 💊".to_string(),
            priority: NotificationPriority::High,
            tags: vec!["alarm_clock".to_string()],
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HistoryConfig {
    pub db_path: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./pillpal-history.sqlite"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PillPalConfig {
    pub index: IndexConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub gemini: GeminiConfig,
    pub retry: RetryConfig,
    pub notify: NotifyConfig,
    pub history: HistoryConfig,
    pub logging: LoggingConfig,
}

impl PillPalConfig {
    /// Load configuration. An explicit `path` must exist; without one, `pillpal.toml` in the
    /// working directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut figment = Figment::new().merge(Serialized::defaults(PillPalConfig::default()));

        match path {
            Some(p) => {
                if !p.exists() {
                    return Err(AppError::new("CONFIG_LOAD_FAILED", "Config file not found")
                        .with_details(format!("path={}", p.display())));
                }
                info!(path = %p.display(), "loading configuration file");
                figment = figment.merge(Toml::file(p));
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILENAME);
                if default_path.exists() {
                    info!(path = %default_path.display(), "loading configuration file");
                    figment = figment.merge(Toml::file(default_path));
                }
            }
        }

        figment = figment
            .merge(
                Env::raw()
                    .only(&["GEMINI_API_KEY"])
                    .map(|_| "gemini.api_key".into()),
            )
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::from_figment(figment)
    }

    /// Parse a TOML document layered over the defaults. Environment is not consulted.
    pub fn from_toml_str(toml: &str) -> Result<Self, AppError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(PillPalConfig::default()))
            .merge(Toml::string(toml));
        Self::from_figment(figment)
    }

    fn from_figment(figment: Figment) -> Result<Self, AppError> {
        let cfg: PillPalConfig = figment.extract().map_err(|e| {
            AppError::new("CONFIG_LOAD_FAILED", "Failed to extract configuration")
                .with_details(e.to_string())
        })?;
        cfg.validate()?;
        if cfg.gemini.api_key.is_none() {
            warn!("no Gemini API key configured; provider calls will be rejected");
        }
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        validate_chunking(self.chunking.chunk_size, self.chunking.overlap)?;
        if self.retrieval.top_k == 0 {
            return Err(AppError::new(
                CONFIGURATION_INVALID,
                "retrieval.top_k must be at least 1",
            ));
        }
        if self.index.collection.trim().is_empty() {
            return Err(AppError::new(
                CONFIGURATION_INVALID,
                "index.collection must not be empty",
            ));
        }
        if self.gemini.max_batch_size == 0 {
            return Err(AppError::new(
                CONFIGURATION_INVALID,
                "gemini.max_batch_size must be at least 1",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::new(
                CONFIGURATION_INVALID,
                "retry.max_attempts must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Shared precondition for every chunking entry point.
pub fn validate_chunking(chunk_size: usize, overlap: usize) -> Result<(), AppError> {
    if chunk_size == 0 {
        return Err(AppError::new(
            CONFIGURATION_INVALID,
            "chunk_size must be a positive integer",
        ));
    }
    if overlap >= chunk_size {
        return Err(AppError::new(
            CONFIGURATION_INVALID,
            "overlap must be smaller than chunk_size",
        )
        .with_details(format!("chunk_size={chunk_size}; overlap={overlap}")));
    }
    Ok(())
}
