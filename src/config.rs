//! Configuration structures and loading logic

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::store::{AdapterType, QuantizationType, SourceRepository};

/// Top-level configuration shared by `serve` and `load`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub api_port: u16,
    pub database_url: String,
    pub object_store: ObjectStoreConfig,
    pub loader: LoaderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            database_url: default_database_url(),
            object_store: ObjectStoreConfig::default(),
            loader: LoaderConfig::default(),
        }
    }
}

/// Destination object store for loaded models
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    pub root: PathBuf,
    pub path_prefix: String,
    pub base_model_path_prefix: String,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            root: default_object_store_root(),
            path_prefix: default_path_prefix(),
            base_model_path_prefix: default_base_model_path_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub tenant_id: String,
    pub poll_interval_secs: u64,
    pub status_interval_secs: u64,
    pub run_once: bool,
    pub work_dir: PathBuf,

    /// Base models registered as REQUESTED at startup
    pub base_models: Vec<String>,
    pub base_model_source: SourceRepository,

    /// Fine-tuned models registered at startup
    pub models: Vec<ModelConfig>,
    pub downloader: DownloaderConfig,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            tenant_id: default_tenant_id(),
            poll_interval_secs: default_poll_interval(),
            status_interval_secs: default_status_interval(),
            run_once: false,
            work_dir: PathBuf::from("."),
            base_models: Vec::new(),
            base_model_source: SourceRepository::HuggingFace,
            models: Vec::new(),
            downloader: DownloaderConfig::default(),
        }
    }
}

impl LoaderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }
}

/// A fine-tuned model to register at startup
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub model: String,
    pub base_model: String,
    pub adapter_type: String,
    pub quantization_type: String,
}

impl ModelConfig {
    pub fn adapter(&self) -> Result<AdapterType> {
        match self.adapter_type.as_str() {
            "lora" => Ok(AdapterType::Lora),
            "qlora" => Ok(AdapterType::Qlora),
            other => anyhow::bail!("unsupported adapter type {other:?} for {}", self.model),
        }
    }

    pub fn quantization(&self) -> Result<QuantizationType> {
        match self.quantization_type.as_str() {
            "" => Ok(QuantizationType::Unspecified),
            "awq" => Ok(QuantizationType::Awq),
            "gguf" => Ok(QuantizationType::Gguf),
            other => anyhow::bail!(
                "unsupported quantization type {other:?} for {}",
                self.model
            ),
        }
    }
}

/// Source downloaders; a source without a section cannot be loaded
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DownloaderConfig {
    pub hugging_face: Option<HuggingFaceConfig>,
    pub object_store: Option<SourceObjectStoreConfig>,
    pub ollama: Option<OllamaConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HuggingFaceConfig {
    pub cache_dir: PathBuf,
    #[serde(default = "default_hf_cli_path")]
    pub cli_path: String,
    /// Fetch through the hub API instead of the CLI
    #[serde(default)]
    pub use_hub_api: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceObjectStoreConfig {
    pub root: PathBuf,
    #[serde(default)]
    pub path_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OllamaConfig {
    pub port: u16,
    #[serde(default = "default_ollama_binary_path")]
    pub binary_path: String,
    #[serde(default = "default_ollama_ready_timeout")]
    pub ready_timeout_secs: u64,
}

impl Config {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        if let Ok(port) = std::env::var("MODEL_MANAGER_API_PORT") {
            config.api_port = port
                .parse()
                .context("Invalid MODEL_MANAGER_API_PORT value")?;
        }
        if let Ok(url) = std::env::var("MODEL_MANAGER_DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(tenant_id) = std::env::var("MODEL_MANAGER_TENANT_ID") {
            config.loader.tenant_id = tenant_id;
        }
        if let Ok(work_dir) = std::env::var("MODEL_MANAGER_WORK_DIR") {
            config.loader.work_dir = PathBuf::from(work_dir);
        }

        Ok(config)
    }

    /// Validate the settings both commands need
    pub fn validate(&self) -> Result<()> {
        if self.api_port < 1024 {
            anyhow::bail!("API port must be >= 1024 (got {})", self.api_port);
        }
        if self.database_url.is_empty() {
            anyhow::bail!("database_url must be set");
        }
        if self.object_store.path_prefix.is_empty() {
            anyhow::bail!("object_store.path_prefix must be set");
        }
        if self.object_store.base_model_path_prefix.is_empty() {
            anyhow::bail!("object_store.base_model_path_prefix must be set");
        }
        Ok(())
    }

    /// Validate the loader section on top of [`Config::validate`]
    pub fn validate_loader(&self) -> Result<()> {
        self.validate()?;

        let loader = &self.loader;
        if loader.tenant_id.is_empty() {
            anyhow::bail!("loader.tenant_id must be set");
        }
        if !loader.run_once && loader.poll_interval_secs == 0 {
            anyhow::bail!("loader.poll_interval_secs must be > 0 unless run_once is set");
        }
        if loader.status_interval_secs == 0 {
            anyhow::bail!("loader.status_interval_secs must be > 0");
        }

        for model in &loader.models {
            if model.model.is_empty() {
                anyhow::bail!("loader.models entries need a model");
            }
            if model.base_model.is_empty() {
                anyhow::bail!("model {} needs a base_model", model.model);
            }
            model.adapter()?;
            model.quantization()?;
        }

        let downloader = &loader.downloader;
        if downloader.hugging_face.is_none()
            && downloader.object_store.is_none()
            && downloader.ollama.is_none()
        {
            anyhow::bail!("at least one loader.downloader must be configured");
        }
        if let Some(hf) = &downloader.hugging_face
            && hf.cache_dir.as_os_str().is_empty()
        {
            anyhow::bail!("loader.downloader.hugging_face.cache_dir must be set");
        }
        if let Some(ollama) = &downloader.ollama
            && ollama.port == 0
        {
            anyhow::bail!("loader.downloader.ollama.port must be set");
        }

        Ok(())
    }
}

// Default functions
fn default_api_port() -> u16 {
    8080
}
fn default_database_url() -> String {
    "sqlite://model-manager.db".to_string()
}
fn default_object_store_root() -> PathBuf {
    PathBuf::from("/data/object-store")
}
fn default_path_prefix() -> String {
    "models".to_string()
}
fn default_base_model_path_prefix() -> String {
    "base-models".to_string()
}
fn default_tenant_id() -> String {
    "default-tenant-id".to_string()
}
fn default_poll_interval() -> u64 {
    30
}
fn default_status_interval() -> u64 {
    10
}
fn default_hf_cli_path() -> String {
    "huggingface-cli".to_string()
}
fn default_ollama_binary_path() -> String {
    "ollama".to_string()
}
fn default_ollama_ready_timeout() -> u64 {
    30
}
