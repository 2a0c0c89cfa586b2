use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use vsboard_adapters::{Classifier, ClassifierError, Completion, FixtureSource};
use vsboard_core::{
    ClassificationResult, Comparison, DiscoveredReference, KeywordSet, RunLog, ThreadRecord,
};
use vsboard_storage::JsonlStore;
use vsboard_sync::classify::run_classification;
use vsboard_sync::discovery::run_discovery;
use vsboard_sync::scrape::run_scrape;
use vsboard_sync::{ClassifyOptions, ClassifyStores, DataPaths, DiscoveryOptions, Pricing, SourceGroup};

struct AlwaysCodex;

#[async_trait]
impl Classifier for AlwaysCodex {
    fn model(&self) -> &str {
        "fixture-model"
    }

    async fn classify(&self, _system: &str, _prompt: &str) -> Result<Completion, ClassifierError> {
        Ok(Completion {
            text: "```json\n{\"comparison\":\"codex_better\",\"claudeCodeSentiment\":\"neutral\",\
\"codexSentiment\":\"positive\",\"reasoning\":\"cheaper\",\"themes\":[\"cost\"],\
\"quoteWorthy\":false}\n```"
                .to_string(),
            input_tokens: None,
            output_tokens: None,
        })
    }
}

fn bundle_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/pipeline/bundle.json")
}

fn group(name: &str) -> SourceGroup {
    SourceGroup {
        subreddit: name.to_string(),
        enabled: true,
        query: "new".to_string(),
    }
}

#[tokio::test]
async fn fixture_bundle_flows_through_all_three_stages() {
    let dir = tempfile::tempdir().unwrap();
    let paths = DataPaths::new(dir.path());
    let source = FixtureSource::from_path(bundle_path()).unwrap();
    let keywords = KeywordSet::new(["claude code", "codex"]);

    let refs: JsonlStore<DiscoveredReference> = JsonlStore::new(&paths.discovered);
    let opts = DiscoveryOptions {
        groups: vec![group("ClaudeAI"), group("codex")],
        keywords: keywords.clone(),
        lookback: chrono::Duration::days(30),
        page_size: 100,
        request_delay: Duration::ZERO,
        now: Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 0).unwrap(),
    };
    let discovery = run_discovery(&source, &refs, &opts).await.unwrap();
    assert_eq!(discovery.pages_fetched, 3);
    assert_eq!(discovery.appended, 2);

    let threads: JsonlStore<ThreadRecord> = JsonlStore::new(&paths.posts);
    let scrape = run_scrape(&source, &refs, &threads, Duration::ZERO).await.unwrap();
    assert_eq!(scrape.scraped, 2);
    assert_eq!(scrape.replies, 3);

    let stored = threads.scan_all().await.unwrap();
    let t100 = stored.iter().find(|t| t.post_id == "t100").unwrap();
    let r2 = t100.reply("r2").unwrap();
    assert_eq!(r2.parent_id.as_deref(), Some("r1"));
    assert_eq!(r2.depth, 1);
    assert!(t100.reply("r3").is_none());

    let results: JsonlStore<ClassificationResult> = JsonlStore::new(&paths.analysis);
    let runs: JsonlStore<RunLog> = JsonlStore::new(&paths.analysis_runs);
    let classify_opts = ClassifyOptions {
        batch_size: 2,
        request_delay: Duration::ZERO,
        pricing: Pricing::default(),
    };
    let stores = || ClassifyStores {
        threads: &threads,
        results: &results,
        runs: &runs,
    };

    let first = run_classification(&AlwaysCodex, stores(), &keywords, &classify_opts)
        .await
        .unwrap();
    assert_eq!(first.eligible, 3);
    assert_eq!(first.analyzed, 2);
    assert!(first.input_tokens > 0);

    let second = run_classification(&AlwaysCodex, stores(), &keywords, &classify_opts)
        .await
        .unwrap();
    assert_eq!(second.eligible, 1);
    assert_eq!(second.analyzed, 1);

    let all = results.scan_all().await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|r| r.comparison == Comparison::CodexBetter));
    assert_eq!(runs.scan_all().await.unwrap().len(), 2);

    // Re-running discovery adds nothing.
    let again = run_discovery(&source, &refs, &opts).await.unwrap();
    assert_eq!(again.appended, 0);
}
