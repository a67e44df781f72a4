//! Configuration management for marketrag
//!
//! Loads the TOML configuration file, applies `MARKETRAG_SECTION__KEY`
//! environment overrides and named profiles, and validates the result.

use crate::chunking::ChunkingConfig;
use crate::embedding::{cached_tokenizer_file, EmbeddingConfig, IndexKind, ProviderKind};
use crate::error::{MarketragError, Result};
use crate::storage::{VectorStoreConfig, DEFAULT_OVERFETCH};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";
const ENV_PREFIX: &str = "MARKETRAG_";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub vector_store: VectorStoreSettings,
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Database file name, relative to `data_dir`
    pub database_file: String,
}

/// Vector store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreSettings {
    pub index_type: IndexKind,
    /// Candidates fetched per requested result
    pub overfetch: usize,
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Default number of results
    pub top_k: usize,
    /// Re-rank by default
    pub rerank: bool,
    /// Candidates requested per result when re-ranking
    pub rerank_multiplier: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            rerank: true,
            rerank_multiplier: 3,
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<ProviderKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_dimension: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_type: Option<IndexKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::read(path)?;
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MarketragError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| MarketragError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| MarketragError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| MarketragError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::read(path)?;
        config.apply_profile(profile)?;
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self.profiles.get(profile).cloned().ok_or_else(|| {
            MarketragError::Config(format!("Unknown profile: {}", profile))
        })?;

        if let Some(provider) = overrides.embedding_provider {
            self.embedding.provider = provider;
        }
        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        if let Some(dimension) = overrides.embedding_dimension {
            self.embedding.dimension = dimension;
        }
        if let Some(index_type) = overrides.index_type {
            self.vector_store.index_type = index_type;
        }
        if let Some(data_dir) = overrides.data_dir {
            self.storage.data_dir = data_dir;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: MARKETRAG_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    fn apply_overrides(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix(ENV_PREFIX) {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            "STORAGE__DATABASE_FILE" => self.storage.database_file = value.to_string(),
            "CHUNKING__CHUNK_SIZE" => self.chunking.chunk_size = parse_env(path, value)?,
            "CHUNKING__CHUNK_OVERLAP" => self.chunking.chunk_overlap = parse_env(path, value)?,
            "CHUNKING__TOKENIZER_FILE" => {
                self.chunking.tokenizer_file = Some(PathBuf::from(value))
            }
            "EMBEDDING__PROVIDER" => {
                self.embedding.provider = match value.to_ascii_lowercase().as_str() {
                    "fastembed" => ProviderKind::Fastembed,
                    "hash" => ProviderKind::Hash,
                    _ => {
                        return Err(MarketragError::InvalidConfigValue {
                            path: path.to_string(),
                            message: format!("Unknown provider '{}'", value),
                        })
                    }
                }
            }
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__DIMENSION" => self.embedding.dimension = parse_env(path, value)?,
            "EMBEDDING__BATCH_SIZE" => self.embedding.batch_size = parse_env(path, value)?,
            "EMBEDDING__CACHE_DIR" => self.embedding.cache_dir = Some(PathBuf::from(value)),
            "VECTOR_STORE__INDEX_TYPE" => {
                self.vector_store.index_type =
                    value
                        .parse()
                        .map_err(|e: crate::embedding::VectorIndexError| {
                            MarketragError::InvalidConfigValue {
                                path: path.to_string(),
                                message: e.to_string(),
                            }
                        })?
            }
            "VECTOR_STORE__OVERFETCH" => self.vector_store.overfetch = parse_env(path, value)?,
            "RETRIEVAL__TOP_K" => self.retrieval.top_k = parse_env(path, value)?,
            "RETRIEVAL__RERANK" => self.retrieval.rerank = parse_env(path, value)?,
            "RETRIEVAL__RERANK_MULTIPLIER" => {
                self.retrieval.rerank_multiplier = parse_env(path, value)?
            }
            _ => {
                tracing::warn!("Unknown env config key: {}{}", ENV_PREFIX, path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            MarketragError::Config("Cannot determine config directory".to_string())
        })?;

        Ok(config_dir.join("marketrag").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| MarketragError::Config("Cannot determine data directory".to_string()))?;

        Ok(data_dir.join("marketrag"))
    }

    /// Database path, with a leading `~` expanded
    pub fn database_path(&self) -> PathBuf {
        expand_path(&self.storage.data_dir).join(&self.storage.database_file)
    }

    pub fn vector_store_config(&self) -> VectorStoreConfig {
        VectorStoreConfig {
            db_path: self.database_path(),
            dimension: self.embedding.dimension,
            index_type: self.vector_store.index_type,
            overfetch: self.vector_store.overfetch,
        }
    }

    /// Chunking settings with the tokenizer resolved.
    ///
    /// An explicit `tokenizer_file` wins. Otherwise the fastembed model's
    /// cached `tokenizer.json` is used when it has already been downloaded,
    /// so chunk budgets match the embedding model's tokens.
    pub fn chunking_config(&self) -> ChunkingConfig {
        let tokenizer_file = match &self.chunking.tokenizer_file {
            Some(path) => Some(expand_path(path)),
            None if self.embedding.provider == ProviderKind::Fastembed => {
                let cache_dir = self.embedding.cache_dir.as_deref().map(expand_path);
                cached_tokenizer_file(&self.embedding.model, cache_dir.as_deref())
            }
            None => None,
        };

        ChunkingConfig {
            tokenizer_file,
            ..self.chunking.clone()
        }
    }

    pub fn embedding_config(&self) -> EmbeddingConfig {
        EmbeddingConfig {
            cache_dir: self.embedding.cache_dir.as_deref().map(expand_path),
            ..self.embedding.clone()
        }
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| MarketragError::InvalidConfigValue {
            path: path.to_string(),
            message: format!("Cannot parse '{}'", value),
        })
}

/// Expand a leading `~` to the home directory
pub fn expand_path(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.marketrag"),
                database_file: "vectors.db".to_string(),
            },
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            vector_store: VectorStoreSettings {
                index_type: IndexKind::Flat,
                overfetch: DEFAULT_OVERFETCH,
            },
            retrieval: RetrievalConfig::default(),
            profiles: HashMap::new(),
        }
    }
}
