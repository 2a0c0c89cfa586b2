//! Discovery -> scrape -> classify batch pipeline over the JSONL stores.

pub mod classify;
pub mod config;
pub mod context;
pub mod discovery;
pub mod export;
pub mod maintenance;
pub mod scrape;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use uuid::Uuid;
use vsboard_adapters::{AnthropicClassifier, Classifier, ListingSource, RedditSource, ThreadSource};
use vsboard_core::{ClassificationResult, DiscoveredReference, RunLog, ThreadRecord};
use vsboard_storage::{HttpClientConfig, HttpFetcher, JsonlStore};

pub use classify::{ClassifyOptions, ClassifyStores, ClassifySummary, Pricing};
pub use config::{DataPaths, PipelineConfig, SourceGroup, SourceRegistry};
pub use discovery::{DiscoveryOptions, DiscoverySummary};
pub use export::export_results_parquet;
pub use maintenance::{clean_dataset, CleanSummary};
pub use scrape::ScrapeSummary;

pub const CRATE_NAME: &str = "vsboard-sync";

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub discovery: DiscoverySummary,
    pub scrape: ScrapeSummary,
    pub classify: ClassifySummary,
}

fn reddit_source(config: &PipelineConfig) -> Result<RedditSource> {
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
        ..Default::default()
    })?;
    Ok(RedditSource::new(http).with_expand_delay(config.request_delay))
}

fn classifier(config: &PipelineConfig) -> Result<AnthropicClassifier> {
    let key = config.require_api_key()?;
    Ok(AnthropicClassifier::new(
        key,
        config.model.clone(),
        Duration::from_secs(config.http_timeout_secs),
    )?)
}

fn discovery_options(config: &PipelineConfig, registry: &SourceRegistry) -> DiscoveryOptions {
    DiscoveryOptions {
        groups: registry.enabled_groups(),
        keywords: registry.keywords(),
        lookback: chrono::Duration::days(config.lookback_days),
        page_size: config.page_size,
        request_delay: config.request_delay,
        now: Utc::now(),
    }
}

fn classify_options(config: &PipelineConfig, batch_size: Option<usize>) -> ClassifyOptions {
    ClassifyOptions {
        batch_size: batch_size.unwrap_or(config.batch_size),
        request_delay: config.classify_delay,
        pricing: Pricing {
            input_per_mtok: config.price_input_per_mtok,
            output_per_mtok: config.price_output_per_mtok,
        },
    }
}

pub async fn run_discovery_stage(config: &PipelineConfig) -> Result<DiscoverySummary> {
    let registry = SourceRegistry::load(&config.sources_path).await?;
    let source = reddit_source(config)?;
    let store: JsonlStore<DiscoveredReference> = JsonlStore::new(config.paths().discovered);
    discovery::run_discovery(&source, &store, &discovery_options(config, &registry)).await
}

pub async fn run_scrape_stage(config: &PipelineConfig) -> Result<ScrapeSummary> {
    let paths = config.paths();
    let source = reddit_source(config)?;
    let references: JsonlStore<DiscoveredReference> = JsonlStore::new(paths.discovered);
    let threads: JsonlStore<ThreadRecord> = JsonlStore::new(paths.posts);
    scrape::run_scrape(&source, &references, &threads, config.request_delay).await
}

pub async fn run_classify_stage(
    config: &PipelineConfig,
    batch_size: Option<usize>,
) -> Result<ClassifySummary> {
    let classifier = classifier(config)?;
    let registry = SourceRegistry::load(&config.sources_path).await?;
    let paths = config.paths();
    let threads: JsonlStore<ThreadRecord> = JsonlStore::new(paths.posts);
    let results: JsonlStore<ClassificationResult> = JsonlStore::new(paths.analysis);
    let runs: JsonlStore<RunLog> = JsonlStore::new(paths.analysis_runs);
    let stores = ClassifyStores {
        threads: &threads,
        results: &results,
        runs: &runs,
    };
    let opts = classify_options(config, batch_size);
    classify::run_classification(&classifier, stores, &registry.keywords(), &opts).await
}

/// All three stages in order. The API key is checked before any network work.
pub async fn run_pipeline_once(config: &PipelineConfig) -> Result<PipelineSummary> {
    let classifier = classifier(config)?;
    let source = reddit_source(config)?;
    run_pipeline_with(&source, &classifier, config).await
}

/// The chained run over explicit collaborators. An empty upstream store means
/// the later stages have nothing to do, not that a precondition failed.
pub async fn run_pipeline_with<S>(
    source: &S,
    classifier: &dyn Classifier,
    config: &PipelineConfig,
) -> Result<PipelineSummary>
where
    S: ListingSource + ThreadSource,
{
    let started_at = Utc::now();
    let run_id = Uuid::new_v4();
    info!(%run_id, data_dir = %config.data_dir.display(), "pipeline run starting");

    let registry = SourceRegistry::load(&config.sources_path).await?;
    let paths = config.paths();
    let references: JsonlStore<DiscoveredReference> = JsonlStore::new(paths.discovered);
    let threads: JsonlStore<ThreadRecord> = JsonlStore::new(paths.posts);
    let results: JsonlStore<ClassificationResult> = JsonlStore::new(paths.analysis);
    let runs: JsonlStore<RunLog> = JsonlStore::new(paths.analysis_runs);

    let discovery = discovery::run_discovery(source, &references, &discovery_options(config, &registry))
        .await
        .context("discovery stage")?;

    let scrape = if references.exists() {
        scrape::run_scrape(source, &references, &threads, config.request_delay)
            .await
            .context("scrape stage")?
    } else {
        info!("nothing discovered yet, skipping scrape");
        ScrapeSummary::default()
    };

    let classify = if threads.exists() {
        let stores = ClassifyStores {
            threads: &threads,
            results: &results,
            runs: &runs,
        };
        classify::run_classification(classifier, stores, &registry.keywords(), &classify_options(config, None))
            .await
            .context("classification stage")?
    } else {
        info!("no scraped threads yet, skipping classification");
        ClassifySummary::default()
    };

    Ok(PipelineSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        discovery,
        scrape,
        classify,
    })
}

pub async fn run_pipeline_once_from_env() -> Result<PipelineSummary> {
    run_pipeline_once(&PipelineConfig::from_env()).await
}

/// A scheduler that runs the full pipeline on `sync_cron`, or `None` when disabled.
pub async fn maybe_build_scheduler(config: &PipelineConfig) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let shared = Arc::new(config.clone());
    let job = Job::new_async(config.sync_cron.as_str(), move |_uuid, _l| {
        let config = Arc::clone(&shared);
        Box::pin(async move {
            match run_pipeline_once(&config).await {
                Ok(summary) => info!(
                    run_id = %summary.run_id,
                    discovered = summary.discovery.appended,
                    scraped = summary.scrape.scraped,
                    classified = summary.classify.analyzed,
                    "scheduled pipeline run finished"
                ),
                Err(err) => error!(error = %format!("{err:#}"), "scheduled pipeline run failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {}", config.sync_cron))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_scheduler_is_none() {
        let config = PipelineConfig::default();
        assert!(maybe_build_scheduler(&config).await.unwrap().is_none());
    }

    struct NeverCalled;

    #[async_trait::async_trait]
    impl Classifier for NeverCalled {
        fn model(&self) -> &str {
            "never"
        }

        async fn classify(
            &self,
            _system: &str,
            _prompt: &str,
        ) -> Result<vsboard_adapters::Completion, vsboard_adapters::ClassifierError> {
            panic!("classifier must not be called without threads");
        }
    }

    #[tokio::test]
    async fn fresh_data_dir_with_nothing_discovered_is_zero_work() {
        let dir = tempfile::tempdir().unwrap();
        let sources = dir.path().join("sources.yaml");
        std::fs::write(
            &sources,
            "required_terms: [claude code, codex]\nsources:\n  - subreddit: ClaudeAI\n",
        )
        .unwrap();
        let config = PipelineConfig {
            data_dir: dir.path().join("data"),
            sources_path: sources,
            request_delay: Duration::ZERO,
            ..Default::default()
        };
        let source = vsboard_adapters::FixtureSource::default();

        let summary = run_pipeline_with(&source, &NeverCalled, &config).await.unwrap();
        assert_eq!(summary.discovery.appended, 0);
        assert_eq!(summary.scrape, ScrapeSummary::default());
        assert_eq!(summary.classify, ClassifySummary::default());
        assert!(!config.paths().analysis_runs.exists());
        assert_eq!(source.calls(), vec!["page:ClaudeAI:-".to_string()]);
    }

    #[tokio::test]
    async fn pipeline_refuses_to_start_without_api_key() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let err = run_pipeline_once(&config).await.unwrap_err();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
        assert!(!config.paths().discovered.exists());
    }
}
