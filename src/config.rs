//! Engram configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main Engram configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngramConfig {
    /// Text-generation model configuration
    #[serde(default)]
    pub model: ModelConfig,

    /// Memory engine configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
}

impl EngramConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("invalid config file: {}", e)))
    }
}

/// Text-generation model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier passed to the generation API
    pub model_name: String,

    /// Environment variable the API key is read from
    pub api_key_env: String,

    /// Maximum output tokens per generation request
    pub max_output_tokens: u32,

    /// Deadline for a single collaborator call, in seconds
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name: "gemini-1.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            max_output_tokens: 8192,
            timeout_secs: 30,
        }
    }
}

/// Memory engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Character budget for memory injected into the generation context
    pub context_budget: usize,

    /// Horizon for "relevant now" time-based entries, in hours
    pub near_term_horizon_hours: i64,

    /// Run a compression pass after this many completed turns (0 = never)
    pub compress_every_turns: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            context_budget: 4096,
            near_term_horizon_hours: 48,
            compress_every_turns: 10,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Profile data directory (None = ~/.engram)
    pub data_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: None }
    }
}

impl StorageConfig {
    /// Resolve the profile directory, falling back to `~/.engram`
    pub fn resolve_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs_next::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".engram")
        })
    }
}
