//! Configuration parsing and validation.
//!
//! The assistant is configured by a single TOML file. Every table is optional;
//! missing keys fall back to the defaults below, so an empty file is valid.
//!
//! ```toml
//! [chat]
//! model = "gpt-4o-mini"
//! temperature = 0.7
//!
//! [index]
//! path = "./data/index"
//! top_k = 4
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub images: ImageConfig,
    #[serde(default)]
    pub functions: FunctionsConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_chat_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_function_calls")]
    pub max_function_calls: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: default_chat_model(),
            temperature: default_temperature(),
            timeout_secs: default_chat_timeout(),
            max_function_calls: default_max_function_calls(),
        }
    }
}

impl ChatConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_chat_timeout() -> u64 {
    60
}
fn default_max_function_calls() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_organization_env")]
    pub organization_env: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            organization_env: default_organization_env(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_organization_env() -> String {
    "OPENAI_API_ORG".to_string()
}

/// Retry bounds shared by every outbound call.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_min_wait_ms")]
    pub min_wait_ms: u64,
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// Upper bound on total time spent retrying. `0` disables the bound.
    #[serde(default = "default_max_elapsed_secs")]
    pub max_elapsed_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_wait_ms: default_min_wait_ms(),
            max_wait_ms: default_max_wait_ms(),
            max_elapsed_secs: default_max_elapsed_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_min_wait_ms() -> u64 {
    1000
}
fn default_max_wait_ms() -> u64 {
    20_000
}
fn default_max_elapsed_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    /// Base URL of the Ollama server; only read when `provider = "ollama"`.
    #[serde(default = "default_ollama_url")]
    pub url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout(),
            url: default_ollama_url(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout() -> u64 {
    20
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_chunk_tokens")]
    pub chunk_tokens: usize,
    #[serde(default = "default_loader_concurrency")]
    pub loader_concurrency: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            collection: default_collection(),
            top_k: default_top_k(),
            chunk_tokens: default_chunk_tokens(),
            loader_concurrency: default_loader_concurrency(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/index")
}
fn default_collection() -> String {
    "assistant".to_string()
}
fn default_top_k() -> usize {
    4
}
fn default_chunk_tokens() -> usize {
    250
}
fn default_loader_concurrency() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_web_timeout")]
    pub timeout_secs: u64,
    /// Pages whose URL contains any of these fragments are dropped after crawling.
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            timeout_secs: default_web_timeout(),
            exclude: default_exclude(),
        }
    }
}

fn default_max_depth() -> usize {
    2
}
fn default_web_timeout() -> u64 {
    20
}
fn default_exclude() -> Vec<String> {
    vec!["css".to_string(), "wp-json".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImageConfig {
    #[serde(default = "default_image_size")]
    pub size: String,
    #[serde(default = "default_image_encoding")]
    pub encoding: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            size: default_image_size(),
            encoding: default_image_encoding(),
        }
    }
}

fn default_image_size() -> String {
    "512x512".to_string()
}
fn default_image_encoding() -> String {
    "b64_json".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FunctionsConfig {
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
}

impl Default for FunctionsConfig {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
        }
    }
}

fn default_data_file() -> PathBuf {
    PathBuf::from("./demo/DemoData.txt")
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpeechConfig {
    #[serde(default = "default_speech_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            command: default_speech_command(),
            args: Vec::new(),
        }
    }
}

impl SpeechConfig {
    pub fn is_enabled(&self) -> bool {
        !self.command.trim().is_empty()
    }
}

fn default_speech_command() -> String {
    "espeak".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if !(0.0..=1.0).contains(&config.chat.temperature) {
        anyhow::bail!("chat.temperature must be in [0.0, 1.0]");
    }
    if config.chat.max_function_calls == 0 {
        anyhow::bail!("chat.max_function_calls must be >= 1");
    }

    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be >= 1");
    }
    if config.retry.min_wait_ms > config.retry.max_wait_ms {
        anyhow::bail!("retry.min_wait_ms must not exceed retry.max_wait_ms");
    }

    if config.index.top_k == 0 {
        anyhow::bail!("index.top_k must be >= 1");
    }
    if config.index.chunk_tokens == 0 {
        anyhow::bail!("index.chunk_tokens must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be >= 1");
    }

    match config.images.encoding.as_str() {
        "b64_json" | "url" => {}
        other => anyhow::bail!(
            "Unknown image encoding: '{}'. Must be b64_json or url.",
            other
        ),
    }

    Ok(())
}
