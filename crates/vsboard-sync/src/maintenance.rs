//! Offline cleanup of the discovery and thread stores.

use std::collections::HashSet;

use anyhow::Result;
use serde::Serialize;
use tracing::info;
use vsboard_adapters::thread_id_from_url;
use vsboard_core::{DiscoveredReference, ThreadRecord};
use vsboard_storage::{rewrite_atomically, JsonlStore};

use crate::config::DataPaths;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanSummary {
    pub references_removed: usize,
    pub references_kept: usize,
    pub threads_removed: usize,
    pub threads_kept: usize,
}

/// Drop every reference discovered under `excluded_query`, and every stored
/// thread that only those references pointed at. Classification results are
/// left alone.
pub async fn clean_dataset(paths: &DataPaths, excluded_query: &str) -> Result<CleanSummary> {
    let references: JsonlStore<DiscoveredReference> = JsonlStore::new(&paths.discovered);
    let threads: JsonlStore<ThreadRecord> = JsonlStore::new(&paths.posts);

    let (dropped, kept): (Vec<_>, Vec<_>) = references
        .scan_all()
        .await?
        .into_iter()
        .partition(|r| r.query == excluded_query);

    let kept_ids: HashSet<String> = kept.iter().filter_map(|r| thread_id_from_url(&r.url)).collect();
    let orphaned: HashSet<String> = dropped
        .iter()
        .filter_map(|r| thread_id_from_url(&r.url))
        .filter(|id| !kept_ids.contains(id))
        .collect();

    let mut summary = CleanSummary {
        references_removed: dropped.len(),
        references_kept: kept.len(),
        ..Default::default()
    };
    if !dropped.is_empty() {
        rewrite_atomically(references.path(), &kept).await?;
    }

    let stored = threads.scan_all().await?;
    let before = stored.len();
    let remaining: Vec<_> = stored
        .into_iter()
        .filter(|t| !orphaned.contains(&t.post_id))
        .collect();
    summary.threads_removed = before - remaining.len();
    summary.threads_kept = remaining.len();
    if summary.threads_removed > 0 {
        rewrite_atomically(threads.path(), &remaining).await?;
    }

    info!(
        query = excluded_query,
        references_removed = summary.references_removed,
        threads_removed = summary.threads_removed,
        "dataset cleaned"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reference(id: &str, query: &str) -> DiscoveredReference {
        DiscoveredReference {
            url: format!("https://www.reddit.com/r/x/comments/{id}/s/"),
            title: id.to_string(),
            snippet: String::new(),
            discovered_at: Utc::now(),
            query: query.to_string(),
            subreddit: Some("x".to_string()),
            score: None,
            created: None,
        }
    }

    fn thread(id: &str) -> ThreadRecord {
        ThreadRecord {
            post_id: id.to_string(),
            subreddit: "x".to_string(),
            title: id.to_string(),
            selftext: String::new(),
            score: 0,
            url: String::new(),
            permalink: format!("/r/x/comments/{id}/s/"),
            author: String::new(),
            created: 0.0,
            num_comments: 0,
            comments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn excluded_query_and_its_threads_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path());
        let refs = JsonlStore::new(&paths.discovered);
        let threads = JsonlStore::new(&paths.posts);
        refs.append(&reference("a", "new")).await.unwrap();
        refs.append(&reference("b", "search:codex")).await.unwrap();
        refs.append(&reference("a", "search:codex")).await.unwrap();
        for id in ["a", "b"] {
            threads.append(&thread(id)).await.unwrap();
        }

        let summary = clean_dataset(&paths, "search:codex").await.unwrap();
        assert_eq!(summary.references_removed, 2);
        assert_eq!(summary.threads_removed, 1);

        let left: Vec<DiscoveredReference> = refs.scan_all().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].query, "new");
        let left: Vec<ThreadRecord> = threads.scan_all().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].post_id, "a");
    }

    #[tokio::test]
    async fn nothing_to_remove_leaves_stores_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path());
        let summary = clean_dataset(&paths, "missing").await.unwrap();
        assert_eq!(summary, CleanSummary::default());
        assert!(!paths.discovered.exists());
    }
}
