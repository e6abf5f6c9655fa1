//! TOML configuration.
//!
//! Everything the assistant needs (docs location, provider choice, API
//! credentials, retrieval knobs) is read once from a single file into an
//! explicit [`Config`] value and passed down at construction time.
//!
//! ```toml
//! [docs]
//! root = "./docs"
//! extensions = ["md"]
//!
//! [index]
//! dir = "./vectorstore"
//!
//! [embedding]
//! provider = "local"
//! model = "all-minilm-l6-v2"
//!
//! [completion]
//! provider = "openrouter"
//! model = "openai/gpt-oss-20b:free"
//! api_key_env = "API_KEY"
//!
//! [retrieval]
//! top_k = 4
//!
//! [server]
//! bind = "127.0.0.1:8501"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub docs: DocsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocsConfig {
    pub root: PathBuf,
    /// File extensions to index, without the leading dot.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_extensions() -> Vec<String> {
    vec!["md".to_string()]
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingMode {
    /// One chunk per document.
    Whole,
    /// Split on blank lines up to `max_tokens`.
    Paragraph,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunking_mode")]
    pub mode: ChunkingMode,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            mode: default_chunking_mode(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_chunking_mode() -> ChunkingMode {
    ChunkingMode::Whole
}
fn default_max_tokens() -> usize {
    700
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("vectorstore")
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama, OpenAI-compatible gateways).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            api_key: None,
            api_key_env: default_embedding_key_env(),
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_provider")]
    pub provider: String,
    #[serde(default = "default_completion_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Inline key. Prefer `api_key_env` so the key stays out of the file.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_completion_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_answer_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_completion_provider(),
            model: default_completion_model(),
            url: None,
            api_key: None,
            api_key_env: default_completion_key_env(),
            max_tokens: default_max_answer_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl CompletionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_completion_provider() -> String {
    "disabled".to_string()
}
fn default_completion_model() -> String {
    "openai/gpt-oss-20b:free".to_string()
}
fn default_completion_key_env() -> String {
    "API_KEY".to_string()
}
fn default_max_answer_tokens() -> u32 {
    750
}
fn default_temperature() -> f32 {
    0.1
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_top_k() -> usize {
    4
}
fn default_max_context_chars() -> usize {
    6000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8501".to_string()
}

/// Read, validate, and resolve credentials for a config file.
///
/// API keys missing from the file are looked up once here, from the env var
/// named by `api_key_env`, so nothing downstream touches the environment.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;
    resolve_api_keys(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Parse and validate config text without touching the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.docs.extensions.is_empty() {
        bail!("docs.extensions must list at least one extension");
    }

    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }

    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }

    if config.retrieval.max_context_chars == 0 {
        bail!("retrieval.max_context_chars must be > 0");
    }

    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    if config.embedding.timeout_secs == 0 {
        bail!("embedding.timeout_secs must be > 0");
    }

    if config.completion.timeout_secs == 0 {
        bail!("completion.timeout_secs must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        "hashing" => {
            if config.embedding.dims == Some(0) {
                bail!("embedding.dims must be > 0 for the hashing provider");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, local, or hashing.",
            other
        ),
    }

    if matches!(config.embedding.provider.as_str(), "openai" | "ollama")
        && config.embedding.model.is_none()
    {
        bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }

    match config.completion.provider.as_str() {
        "disabled" | "openrouter" | "openai" => {}
        other => bail!(
            "Unknown completion provider: '{}'. Must be disabled, openrouter, or openai.",
            other
        ),
    }

    if !(0.0..=2.0).contains(&config.completion.temperature) {
        bail!("completion.temperature must be in [0.0, 2.0]");
    }

    Ok(config)
}

fn resolve_api_keys(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if config.embedding.api_key.is_none() {
        config.embedding.api_key = lookup(&config.embedding.api_key_env);
    }
    if config.completion.api_key.is_none() {
        config.completion.api_key = lookup(&config.completion.api_key_env);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[docs]
root = "./docs"
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.docs.extensions, vec!["md".to_string()]);
        assert_eq!(cfg.chunking.mode, ChunkingMode::Whole);
        assert_eq!(cfg.retrieval.top_k, 4);
        assert_eq!(cfg.index.dir, PathBuf::from("vectorstore"));
        assert!(!cfg.embedding.is_enabled());
        assert!(!cfg.completion.is_enabled());
        assert_eq!(cfg.completion.max_tokens, 750);
    }

    #[test]
    fn test_rejects_unknown_embedding_provider() {
        let text = format!("{}\n[embedding]\nprovider = \"magic\"\n", MINIMAL);
        let err = parse_config(&text).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_openai_requires_model() {
        let text = format!("{}\n[embedding]\nprovider = \"openai\"\n", MINIMAL);
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn test_rejects_zero_timeouts() {
        let text = format!("{}\n[embedding]\ntimeout_secs = 0\n", MINIMAL);
        let err = parse_config(&text).unwrap_err();
        assert!(err.to_string().contains("embedding.timeout_secs"));

        let text = format!("{}\n[completion]\ntimeout_secs = 0\n", MINIMAL);
        let err = parse_config(&text).unwrap_err();
        assert!(err.to_string().contains("completion.timeout_secs"));
    }

    #[test]
    fn test_rejects_zero_top_k() {
        let text = format!("{}\n[retrieval]\ntop_k = 0\n", MINIMAL);
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn test_paragraph_mode_parses() {
        let text = format!("{}\n[chunking]\nmode = \"paragraph\"\nmax_tokens = 50\n", MINIMAL);
        let cfg = parse_config(&text).unwrap();
        assert_eq!(cfg.chunking.mode, ChunkingMode::Paragraph);
        assert_eq!(cfg.chunking.max_tokens, 50);
    }

    #[test]
    fn test_api_key_resolved_from_named_var() {
        let text = format!(
            "{}\n[completion]\nprovider = \"openrouter\"\napi_key_env = \"MY_KEY\"\n",
            MINIMAL
        );
        let mut cfg = parse_config(&text).unwrap();
        resolve_api_keys(&mut cfg, |name| {
            (name == "MY_KEY").then(|| "secret".to_string())
        });
        assert_eq!(cfg.completion.api_key.as_deref(), Some("secret"));
        assert!(cfg.embedding.api_key.is_none());
    }

    #[test]
    fn test_inline_api_key_wins() {
        let text = format!(
            "{}\n[completion]\nprovider = \"openai\"\napi_key = \"inline\"\n",
            MINIMAL
        );
        let mut cfg = parse_config(&text).unwrap();
        resolve_api_keys(&mut cfg, |_| Some("from-env".to_string()));
        assert_eq!(cfg.completion.api_key.as_deref(), Some("inline"));
    }
}
