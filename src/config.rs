use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use index_harness_core::importance::{ImportanceWeights, DEFAULT_WINDOW_DAYS};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub importance: ImportanceConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_product")]
    pub product: String,
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            product: default_product(),
            embed_batch_size: default_embed_batch_size(),
            workers: default_workers(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_product() -> String {
    "default".to_string()
}
fn default_embed_batch_size() -> usize {
    index_harness_core::embedding::DEFAULT_BATCH_SIZE
}
fn default_workers() -> usize {
    4
}
fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_lines: default_max_lines(),
        }
    }
}

fn default_max_lines() -> usize {
    80
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for Ollama.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

/// Bounded exponential backoff for network calls.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportanceConfig {
    #[serde(default = "default_reference_weight")]
    pub reference_weight: f64,
    #[serde(default = "default_centrality_weight")]
    pub centrality_weight: f64,
    #[serde(default = "default_edit_frequency_weight")]
    pub edit_frequency_weight: f64,
    #[serde(default = "default_window_days")]
    pub window_days: i64,
}

impl Default for ImportanceConfig {
    fn default() -> Self {
        Self {
            reference_weight: default_reference_weight(),
            centrality_weight: default_centrality_weight(),
            edit_frequency_weight: default_edit_frequency_weight(),
            window_days: default_window_days(),
        }
    }
}

impl ImportanceConfig {
    pub fn weights(&self) -> ImportanceWeights {
        ImportanceWeights {
            reference: self.reference_weight,
            centrality: self.centrality_weight,
            edit_frequency: self.edit_frequency_weight,
        }
    }
}

fn default_reference_weight() -> f64 {
    ImportanceWeights::default().reference
}
fn default_centrality_weight() -> f64 {
    ImportanceWeights::default().centrality
}
fn default_edit_frequency_weight() -> f64 {
    ImportanceWeights::default().edit_frequency
}
fn default_window_days() -> i64 {
    DEFAULT_WINDOW_DAYS
}

#[derive(Debug, Deserialize, Clone)]
pub struct LockConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    900
}
fn default_poll_interval_ms() -> u64 {
    200
}
fn default_acquire_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub git: GitSourceConfig,
    #[serde(default)]
    pub filesystem: FilesystemSourceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitSourceConfig {
    /// Where clones live. Defaults to `.git-cache` next to the database.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for GitSourceConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            branch: default_branch(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemSourceConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for FilesystemSourceConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_branch() -> String {
    "main".to_string()
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.db.path.as_os_str().is_empty() {
        anyhow::bail!("db.path must not be empty");
    }

    if config.indexing.embed_batch_size == 0 {
        anyhow::bail!("indexing.embed_batch_size must be > 0");
    }
    if config.indexing.workers == 0 {
        anyhow::bail!("indexing.workers must be > 0");
    }
    if config.chunking.max_lines == 0 {
        anyhow::bail!("chunking.max_lines must be > 0");
    }
    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be openai or ollama.",
            other
        ),
    }
    if config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }

    config
        .importance
        .weights()
        .validate()
        .context("invalid [importance] weights")?;
    if config.importance.window_days <= 0 {
        anyhow::bail!("importance.window_days must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/index.sqlite"

[embedding]
provider = "openai"
model = "text-embedding-3-small"
dims = 1536
"#;

    #[test]
    fn test_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.indexing.embed_batch_size, 100);
        assert_eq!(config.indexing.product, "default");
        assert_eq!(config.chunking.max_lines, 80);
        assert_eq!(config.importance.window_days, 90);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.sources.git.branch, "main");
        assert_eq!(config.importance.weights(), ImportanceWeights::default());
    }

    #[test]
    fn test_rejects_bad_weights() {
        let toml = format!(
            "{}\n[importance]\nreference_weight = 0.5\ncentrality_weight = 0.3\nedit_frequency_weight = 0.3\n",
            MINIMAL
        );
        let err = parse_config(&toml).unwrap_err();
        assert!(format!("{:#}", err).contains("sum to 1.0"));
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let toml = MINIMAL.replace("openai", "carrier-pigeon");
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let toml = format!("{}\n[indexing]\nembed_batch_size = 0\n", MINIMAL);
        assert!(parse_config(&toml).is_err());
    }
}
