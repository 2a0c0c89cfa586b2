//! Environment + YAML configuration for the pipeline.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use vsboard_core::KeywordSet;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub sources_path: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub request_delay: Duration,
    pub classify_delay: Duration,
    pub page_size: usize,
    pub batch_size: usize,
    pub lookback_days: i64,
    pub model: String,
    pub anthropic_api_key: Option<String>,
    pub price_input_per_mtok: f64,
    pub price_output_per_mtok: f64,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            sources_path: PathBuf::from("./sources.yaml"),
            user_agent: "vsboard/0.1 (discussion tracker)".to_string(),
            http_timeout_secs: 30,
            request_delay: Duration::from_millis(1000),
            classify_delay: Duration::from_millis(500),
            page_size: 100,
            batch_size: 100,
            lookback_days: 30,
            model: "claude-sonnet-4-5".to_string(),
            anthropic_api_key: None,
            price_input_per_mtok: 3.0,
            price_output_per_mtok: 15.0,
            scheduler_enabled: false,
            sync_cron: "0 0 6 * * *".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("VSBOARD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            sources_path: std::env::var("VSBOARD_SOURCES")
                .map(PathBuf::from)
                .unwrap_or(defaults.sources_path),
            user_agent: std::env::var("VSBOARD_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: env_parse("VSBOARD_HTTP_TIMEOUT_SECS")
                .unwrap_or(defaults.http_timeout_secs),
            request_delay: env_parse("VSBOARD_REQUEST_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_delay),
            classify_delay: env_parse("VSBOARD_CLASSIFY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.classify_delay),
            page_size: env_parse("VSBOARD_PAGE_SIZE").unwrap_or(defaults.page_size),
            batch_size: env_parse("VSBOARD_BATCH_SIZE").unwrap_or(defaults.batch_size),
            lookback_days: env_parse("VSBOARD_LOOKBACK_DAYS").unwrap_or(defaults.lookback_days),
            model: std::env::var("VSBOARD_MODEL").unwrap_or(defaults.model),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            price_input_per_mtok: env_parse("VSBOARD_PRICE_INPUT_PER_MTOK")
                .unwrap_or(defaults.price_input_per_mtok),
            price_output_per_mtok: env_parse("VSBOARD_PRICE_OUTPUT_PER_MTOK")
                .unwrap_or(defaults.price_output_per_mtok),
            scheduler_enabled: std::env::var("VSBOARD_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron: std::env::var("VSBOARD_SYNC_CRON").unwrap_or(defaults.sync_cron),
        }
    }

    pub fn paths(&self) -> DataPaths {
        DataPaths::new(&self.data_dir)
    }

    pub fn require_api_key(&self) -> Result<&str> {
        match self.anthropic_api_key.as_deref() {
            Some(key) => Ok(key),
            None => bail!("ANTHROPIC_API_KEY is not set; classification cannot start"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Store file locations inside the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub discovered: PathBuf,
    pub posts: PathBuf,
    pub analysis: PathBuf,
    pub analysis_runs: PathBuf,
    pub ignored: PathBuf,
}

impl DataPaths {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            discovered: data_dir.join("discovered.jsonl"),
            posts: data_dir.join("posts.jsonl"),
            analysis: data_dir.join("analysis.jsonl"),
            analysis_runs: data_dir.join("analysis_runs.jsonl"),
            ignored: data_dir.join("ignored.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub required_terms: Vec<String>,
    pub sources: Vec<SourceGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceGroup {
    pub subreddit: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Tag recorded on every reference this group discovers.
    #[serde(default = "default_query")]
    pub query: String,
}

fn default_enabled() -> bool {
    true
}

fn default_query() -> String {
    "new".to_string()
}

impl SourceRegistry {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let registry: SourceRegistry = serde_yaml::from_str(text).context("parsing source registry")?;
        if registry.required_terms.iter().all(|t| t.trim().is_empty()) {
            bail!("source registry must list at least one required term");
        }
        Ok(registry)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn keywords(&self) -> KeywordSet {
        KeywordSet::new(&self.required_terms)
    }

    pub fn enabled_groups(&self) -> Vec<SourceGroup> {
        self.sources.iter().filter(|s| s.enabled).cloned().collect()
    }
}
