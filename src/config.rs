use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::error::{BacktransError, Result};

// Defaults shared by the serde attributes and `Config::default`
fn default_timeout_secs() -> u64 {
    30
}

fn default_chunk_size() -> usize {
    50
}

fn default_embedding_batch_size() -> usize {
    32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub forward: ForwardConfig,
    pub back: BackConfig,
    pub retry: RetryConfig,
    pub backup: BackupConfig,
    pub evaluation: EvaluationConfig,
    pub languages: LanguagesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardConfig {
    /// DeepL API base URL; derived from the key type when unset
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding the DeepL auth key
    pub api_key_env: String,
    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackConfig {
    /// Google Translate v2 endpoint
    pub endpoint: String,
    /// Environment variable holding the Google API key
    pub api_key_env: String,
    /// Language code of the original text, i.e. the back-translation target
    pub source_language: String,
    /// Number of texts grouped into one back-translation request
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Extra attempts for transient provider failures
    pub max_retries: u32,
    /// Linear backoff step between attempts
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory holding one sub-directory per run
    pub root_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Ollama endpoint serving the sentence-embedding model
    pub endpoint: String,
    /// Embedding model name
    pub model: String,
    /// Texts per embedding request
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    /// Decimal places kept for semantic similarity
    pub round_digits: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguagesConfig {
    /// JSON map of language name to DeepL code
    pub deepl_map: PathBuf,
    /// JSON map of language name to Google code
    pub google_map: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            forward: ForwardConfig {
                endpoint: None,
                api_key_env: "DEEPL_API_KEY".to_string(),
                timeout_secs: default_timeout_secs(),
            },
            back: BackConfig {
                endpoint: "https://translation.googleapis.com/language/translate/v2".to_string(),
                api_key_env: "GOOGLE_API_KEY".to_string(),
                source_language: "en".to_string(),
                chunk_size: default_chunk_size(),
                timeout_secs: default_timeout_secs(),
            },
            retry: RetryConfig {
                max_retries: 2,
                backoff_ms: 500,
            },
            backup: BackupConfig {
                root_dir: PathBuf::from(".backtrans/backups"),
            },
            evaluation: EvaluationConfig {
                endpoint: "http://localhost:11434".to_string(),
                model: "all-minilm".to_string(),
                batch_size: default_embedding_batch_size(),
                round_digits: 4,
            },
            languages: LanguagesConfig {
                deepl_map: PathBuf::from("deepl_languages.json"),
                google_map: PathBuf::from("google_languages.json"),
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BacktransError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| BacktransError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| BacktransError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| BacktransError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.back.chunk_size == 0 {
            return Err(BacktransError::Config("back.chunk_size must be at least 1".to_string()));
        }
        if self.evaluation.batch_size == 0 {
            return Err(BacktransError::Config("evaluation.batch_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Read a provider secret from the environment variable named in config
pub fn api_key_from_env(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => Err(BacktransError::Config(format!(
            "Environment variable {} is not set", var
        ))),
    }
}
