//! TOML configuration parsing and validation.
//!
//! Every section is optional. A missing file (when no `--config` path is
//! given explicitly) yields [`Config::default`], which reproduces the stock
//! setup: collection `factoids` under `./index`, answered by Groq's
//! `llama3-8b-8192`.
//!
//! The LLM credential is never part of the file. `[llm].api_key_env` names
//! the environment variable it is read from.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default location probed when `--config` is not passed.
pub const DEFAULT_CONFIG_PATH: &str = "./ichat.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            collection: default_collection(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("./index")
}
fn default_collection() -> String {
    "factoids".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Chunks handed to the model per turn.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// BM25 candidates fetched before normalization and truncation.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            candidate_k: default_candidate_k(),
        }
    }
}

fn default_top_k() -> usize {
    4
}
fn default_candidate_k() -> i64 {
    40
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Overrides the provider's default endpoint (everything before `/chat/completions`).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_llm_max_tokens(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_provider() -> String {
    "groq".to_string()
}
fn default_model() -> String {
    "llama3-8b-8192".to_string()
}
fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_llm_max_tokens() -> u32 {
    512
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}

impl LlmConfig {
    /// Endpoint root for the configured provider, honoring `base_url`.
    pub fn resolved_base_url(&self) -> Result<String> {
        if let Some(ref url) = self.base_url {
            return Ok(url.trim_end_matches('/').to_string());
        }
        match self.provider.as_str() {
            "groq" => Ok("https://api.groq.com/openai/v1".to_string()),
            "openai" => Ok("https://api.openai.com/v1".to_string()),
            "openai-compatible" => {
                bail!("llm.base_url is required when provider is 'openai-compatible'")
            }
            other => bail!("Unknown llm provider: '{}'", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    /// Messages kept in history (user and assistant turns both count).
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// `exit` ends the session on invalid input, `continue` reports and keeps reading.
    #[serde(default = "default_on_invalid_input")]
    pub on_invalid_input: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            system_prompt: default_system_prompt(),
            max_input_chars: default_max_input_chars(),
            history_limit: default_history_limit(),
            on_invalid_input: default_on_invalid_input(),
        }
    }
}

fn default_mode() -> String {
    "condense_plus_context".to_string()
}
fn default_system_prompt() -> String {
    "You are a helpful assistant. Answer using the provided context when it is relevant, \
     and say so plainly when the context does not contain the answer."
        .to_string()
}
fn default_max_input_chars() -> usize {
    4096
}
fn default_history_limit() -> usize {
    20
}
fn default_on_invalid_input() -> String {
    "exit".to_string()
}

/// Read and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` when given; otherwise fall back to [`DEFAULT_CONFIG_PATH`]
/// if it exists, or built-in defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => load_config(p),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                load_config(default_path)
            } else {
                Ok(Config::default())
            }
        }
    }
}

pub fn validate(config: &Config) -> Result<()> {
    let collection = &config.index.collection;
    if collection.trim().is_empty() {
        bail!("index.collection must not be empty");
    }
    if collection.contains(['/', '\\']) || collection == "." || collection == ".." {
        bail!("index.collection must be a plain name, got '{}'", collection);
    }

    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }

    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.candidate_k < config.retrieval.top_k as i64 {
        bail!("retrieval.candidate_k must be >= retrieval.top_k");
    }

    match config.llm.provider.as_str() {
        "groq" | "openai" | "openai-compatible" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be groq, openai, or openai-compatible.",
            other
        ),
    }
    config.llm.resolved_base_url()?;

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        bail!("llm.temperature must be in [0.0, 2.0]");
    }

    crate::chat::ChatMode::parse(&config.chat.mode)?;
    crate::repl::InvalidInputPolicy::parse(&config.chat.on_invalid_input)?;

    if config.chat.max_input_chars == 0 {
        bail!("chat.max_input_chars must be > 0");
    }

    Ok(())
}
