use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub documents: Option<DocumentsConfig>,
    #[serde(default)]
    pub meetings: Option<MeetingsConfig>,
    #[serde(default)]
    pub topics: TopicsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Politeness delay between requests per worker, not a performance knob.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_crawl_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub use_sitemap: bool,
    #[serde(default = "default_true")]
    pub ingest_pdfs: bool,
    /// Regexes matched against candidate URLs; matches are skipped.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
    /// Number of ingestion workers running in parallel across source keys.
    #[serde(default = "default_ingest_workers")]
    pub ingest_workers: usize,
    /// Tombstone a page after this many consecutive failed fetch cycles.
    /// 0 disables the policy: unreachable pages are retried forever.
    #[serde(default)]
    pub tombstone_after_failures: u32,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            max_pages: default_max_pages(),
            max_depth: default_max_depth(),
            delay_ms: default_delay_ms(),
            concurrency: default_crawl_concurrency(),
            timeout_secs: default_timeout_secs(),
            use_sitemap: true,
            ingest_pdfs: true,
            exclude_patterns: Vec::new(),
            fetch_retries: default_fetch_retries(),
            ingest_workers: default_ingest_workers(),
            tombstone_after_failures: 0,
        }
    }
}

fn default_max_pages() -> usize {
    2000
}
fn default_max_depth() -> usize {
    10
}
fn default_delay_ms() -> u64 {
    300
}
fn default_crawl_concurrency() -> usize {
    10
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_fetch_retries() -> u32 {
    2
}
fn default_ingest_workers() -> usize {
    4
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Window size in words.
    #[serde(default = "default_window_words")]
    pub window_words: usize,
    /// Overlap carried into the next window, in words. Must be < window.
    #[serde(default = "default_overlap_words")]
    pub overlap_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_words: default_window_words(),
            overlap_words: default_overlap_words(),
        }
    }
}

fn default_window_words() -> usize {
    400
}
fn default_overlap_words() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Cosine distance at or beyond which a match carries zero retrieval
    /// confidence.
    #[serde(default = "default_max_useful_distance")]
    pub max_useful_distance: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_useful_distance: default_max_useful_distance(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_useful_distance() -> f64 {
    0.8
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnswerConfig {
    /// Weight of the model's self-reported confidence in the blend.
    #[serde(default = "default_self_weight")]
    pub self_weight: f64,
    /// Weight of the retrieval-distance confidence in the blend.
    #[serde(default = "default_retrieval_weight")]
    pub retrieval_weight: f64,
    /// Final scores below this trigger a human handoff.
    #[serde(default = "default_handoff_threshold")]
    pub handoff_threshold: f64,
    #[serde(default = "default_max_question_len")]
    pub max_question_len: usize,
    #[serde(default = "default_language")]
    pub default_language: String,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            self_weight: default_self_weight(),
            retrieval_weight: default_retrieval_weight(),
            handoff_threshold: default_handoff_threshold(),
            max_question_len: default_max_question_len(),
            default_language: default_language(),
        }
    }
}

fn default_self_weight() -> f64 {
    0.6
}
fn default_retrieval_weight() -> f64 {
    0.4
}
fn default_handoff_threshold() -> f64 {
    0.55
}
fn default_max_question_len() -> usize {
    2000
}
fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_cache_entries() -> usize {
    500
}
fn default_cache_ttl() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_embed_base_url")]
    pub base_url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            base_url: default_embed_base_url(),
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embed_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_embed_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_gen_base_url")]
    pub base_url: String,
    #[serde(default = "default_gen_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_gen_timeout")]
    pub timeout_secs: u64,
    /// Self-confidence assumed when the model omits the confidence marker.
    #[serde(default = "default_gen_confidence")]
    pub default_confidence: f64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            base_url: default_gen_base_url(),
            max_tokens: default_gen_max_tokens(),
            timeout_secs: default_gen_timeout(),
            default_confidence: default_gen_confidence(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_gen_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_gen_max_tokens() -> u32 {
    1024
}
fn default_gen_timeout() -> u64 {
    60
}
fn default_gen_confidence() -> f64 {
    0.5
}

/// Upload directory scanned by `sync-docs`.
#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    pub root: PathBuf,
    #[serde(default = "default_doc_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_doc_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
        "**/*.pdf".to_string(),
    ]
}

/// Directory of transcript JSON records delivered by the meeting pipeline.
#[derive(Debug, Deserialize, Clone)]
pub struct MeetingsConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TopicsConfig {
    /// Extra keyword regexes merged into the built-in lists, keyed by topic.
    #[serde(default)]
    pub extra_keywords: HashMap<String, Vec<String>>,
    /// Optional source-key prefix preferred per topic when distances tie.
    #[serde(default)]
    pub bias: HashMap<String, String>,
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
    "127.0.0.1:7410".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.window_words == 0 {
        anyhow::bail!("chunking.window_words must be > 0");
    }
    if config.chunking.overlap_words >= config.chunking.window_words {
        anyhow::bail!("chunking.overlap_words must be < chunking.window_words");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.max_useful_distance <= 0.0 {
        anyhow::bail!("retrieval.max_useful_distance must be > 0");
    }

    let weight_sum = config.answer.self_weight + config.answer.retrieval_weight;
    if !(0.999..=1.001).contains(&weight_sum) {
        anyhow::bail!("answer.self_weight + answer.retrieval_weight must sum to 1.0");
    }
    if !(0.0..=1.0).contains(&config.answer.handoff_threshold) {
        anyhow::bail!("answer.handoff_threshold must be in [0.0, 1.0]");
    }

    if config.cache.max_entries == 0 {
        anyhow::bail!("cache.max_entries must be >= 1");
    }

    if config.crawl.concurrency == 0 || config.crawl.ingest_workers == 0 {
        anyhow::bail!("crawl.concurrency and crawl.ingest_workers must be >= 1");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "mock" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or mock.",
            other
        ),
    }

    match config.generation.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("askbase.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let (_dir, path) = write_config("[db]\npath = \"data/askbase.sqlite\"\n");
        let config = load_config(&path).unwrap();
        assert_eq!(config.chunking.window_words, 400);
        assert_eq!(config.chunking.overlap_words, 50);
        assert_eq!(config.retrieval.top_k, 5);
        assert!((config.answer.self_weight - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.cache.max_entries, 500);
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_window() {
        let (_dir, path) = write_config(
            "[db]\npath = \"x.sqlite\"\n\n[chunking]\nwindow_words = 50\noverlap_words = 50\n",
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let (_dir, path) = write_config(
            "[db]\npath = \"x.sqlite\"\n\n[answer]\nself_weight = 0.9\nretrieval_weight = 0.4\n",
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_enabled_embedding_requires_model_and_dims() {
        let (_dir, path) =
            write_config("[db]\npath = \"x.sqlite\"\n\n[embedding]\nprovider = \"openai\"\n");
        assert!(load_config(&path).is_err());
    }
}
