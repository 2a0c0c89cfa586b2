//! Discovery: walk each group's newest-first listing back to the lookback
//! cutoff and record every post whose title + body carries all required terms.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use vsboard_adapters::{permalink_url, ListingItem, ListingSource};
use vsboard_core::{DiscoveredReference, KeywordSet};
use vsboard_storage::JsonlStore;

use crate::config::SourceGroup;

const SNIPPET_CHARS: usize = 300;

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub groups: Vec<SourceGroup>,
    pub keywords: KeywordSet,
    pub lookback: chrono::Duration,
    pub page_size: usize,
    pub request_delay: Duration,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoverySummary {
    pub groups: usize,
    pub pages_fetched: usize,
    pub items_seen: usize,
    pub keyword_matches: usize,
    pub already_known: usize,
    pub appended: usize,
    pub group_errors: usize,
}

pub async fn run_discovery(
    source: &dyn ListingSource,
    store: &JsonlStore<DiscoveredReference>,
    opts: &DiscoveryOptions,
) -> Result<DiscoverySummary> {
    let mut known = store.keys(|r| r.url.clone()).await?;
    let cutoff = (opts.now - opts.lookback).timestamp() as f64;
    let mut summary = DiscoverySummary {
        groups: opts.groups.len(),
        ..Default::default()
    };

    for group in &opts.groups {
        let mut cursor: Option<String> = None;
        loop {
            let page = match source
                .fetch_page(&group.subreddit, cursor.as_deref(), opts.page_size)
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    warn!(group = %group.subreddit, error = %err, "listing fetch failed; skipping rest of group");
                    summary.group_errors += 1;
                    break;
                }
            };
            summary.pages_fetched += 1;
            if !opts.request_delay.is_zero() {
                tokio::time::sleep(opts.request_delay).await;
            }

            let mut reached_cutoff = false;
            for item in &page.items {
                if item.created < cutoff {
                    reached_cutoff = true;
                    break;
                }
                summary.items_seen += 1;
                if !opts.keywords.matches(&format!("{} {}", item.title, item.body)) {
                    continue;
                }
                summary.keyword_matches += 1;

                let url = permalink_url(&item.permalink);
                if !known.insert(url.clone()) {
                    summary.already_known += 1;
                    continue;
                }
                let reference = reference_for(item, url, group, opts.now);
                store.append(&reference).await?;
                summary.appended += 1;
                debug!(url = %reference.url, "discovered thread");
            }

            if reached_cutoff || page.items.is_empty() {
                break;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
    }

    info!(
        groups = summary.groups,
        pages = summary.pages_fetched,
        appended = summary.appended,
        known = summary.already_known,
        "discovery finished"
    );
    Ok(summary)
}

fn reference_for(
    item: &ListingItem,
    url: String,
    group: &SourceGroup,
    now: DateTime<Utc>,
) -> DiscoveredReference {
    DiscoveredReference {
        url,
        title: item.title.clone(),
        snippet: item.body.chars().take(SNIPPET_CHARS).collect(),
        discovered_at: now,
        query: group.query.clone(),
        subreddit: Some(if item.subreddit.is_empty() {
            group.subreddit.clone()
        } else {
            item.subreddit.clone()
        }),
        score: Some(item.score),
        created: Some(item.created),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vsboard_adapters::{FixtureSource, ListingPage};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 0).unwrap()
    }

    fn item(id: &str, title: &str, body: &str, days_ago: i64) -> ListingItem {
        ListingItem {
            id: id.to_string(),
            subreddit: "ClaudeAI".to_string(),
            title: title.to_string(),
            body: body.to_string(),
            created: (now() - chrono::Duration::days(days_ago)).timestamp() as f64,
            permalink: format!("/r/ClaudeAI/comments/{id}/slug/"),
            score: 10,
            url: String::new(),
            num_comments: 3,
        }
    }

    fn options(groups: &[&str]) -> DiscoveryOptions {
        DiscoveryOptions {
            groups: groups
                .iter()
                .map(|g| SourceGroup {
                    subreddit: g.to_string(),
                    enabled: true,
                    query: "new".to_string(),
                })
                .collect(),
            keywords: KeywordSet::new(["claude code", "codex"]),
            lookback: chrono::Duration::days(30),
            page_size: 100,
            request_delay: Duration::ZERO,
            now: now(),
        }
    }

    fn store(dir: &tempfile::TempDir) -> JsonlStore<DiscoveredReference> {
        JsonlStore::new(dir.path().join("discovered.jsonl"))
    }

    #[tokio::test]
    async fn matching_post_is_recorded_once_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let source = FixtureSource::default().with_pages(
            "ClaudeAI",
            vec![ListingPage {
                items: vec![
                    item("a1", "Claude Code vs Codex thoughts", "", 1),
                    item("a2", "Codex only", "nothing else here", 2),
                ],
                next_cursor: None,
            }],
        );

        let first = run_discovery(&source, &store, &options(&["ClaudeAI"])).await.unwrap();
        assert_eq!(first.appended, 1);
        let refs = store.scan_all().await.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].url, "https://www.reddit.com/r/ClaudeAI/comments/a1/slug/");
        assert_eq!(refs[0].query, "new");

        let second = run_discovery(&source, &store, &options(&["ClaudeAI"])).await.unwrap();
        assert_eq!(second.appended, 0);
        assert_eq!(second.already_known, 1);
        assert_eq!(store.scan_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pagination_stops_at_lookback_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let source = FixtureSource::default().with_pages(
            "ClaudeAI",
            vec![
                ListingPage {
                    items: vec![item("p1", "claude code and codex", "", 3)],
                    next_cursor: Some("1".to_string()),
                },
                ListingPage {
                    items: vec![
                        item("p2", "codex beats claude code?", "", 10),
                        item("p3", "claude code codex, ancient", "", 45),
                        item("p4", "claude code codex, never seen", "", 1),
                    ],
                    next_cursor: Some("2".to_string()),
                },
                ListingPage {
                    items: vec![item("p5", "claude code codex", "", 60)],
                    next_cursor: None,
                },
            ],
        );

        let summary = run_discovery(&source, &store, &options(&["ClaudeAI"])).await.unwrap();
        assert_eq!(summary.pages_fetched, 2);
        assert_eq!(summary.appended, 2);
        assert_eq!(source.calls(), vec!["page:ClaudeAI:-", "page:ClaudeAI:1"]);
    }

    #[tokio::test]
    async fn failing_group_does_not_abort_other_groups() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let source = FixtureSource::default()
            .with_pages(
                "codex",
                vec![ListingPage {
                    items: vec![item("c1", "Codex", "compared with Claude Code today", 0)],
                    next_cursor: None,
                }],
            )
            .failing_group("ClaudeAI");

        let summary = run_discovery(&source, &store, &options(&["ClaudeAI", "codex"]))
            .await
            .unwrap();
        assert_eq!(summary.group_errors, 1);
        assert_eq!(summary.appended, 1);
    }

    #[tokio::test]
    async fn same_post_in_two_groups_is_appended_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let page = ListingPage {
            items: vec![item("x1", "claude code / codex", "", 0)],
            next_cursor: None,
        };
        let source = FixtureSource::default()
            .with_pages("ClaudeAI", vec![page.clone()])
            .with_pages("OpenAI", vec![page]);

        let summary = run_discovery(&source, &store, &options(&["ClaudeAI", "OpenAI"]))
            .await
            .unwrap();
        assert_eq!(summary.appended, 1);
        assert_eq!(summary.already_known, 1);
    }
}
