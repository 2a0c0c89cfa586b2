//! Scraping: fetch every discovered thread not yet stored and persist it with
//! its reply tree flattened into pre-order [`ReplyRecord`]s.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::{debug, info, warn};
use vsboard_adapters::{thread_id_from_url, RawReply, RawThread, ThreadSource};
use vsboard_core::{DiscoveredReference, ReplyRecord, ThreadRecord};
use vsboard_storage::JsonlStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScrapeSummary {
    pub references: usize,
    pub unparseable: usize,
    pub already_scraped: usize,
    pub scraped: usize,
    pub replies: usize,
    pub errors: usize,
}

pub async fn run_scrape(
    source: &dyn ThreadSource,
    references: &JsonlStore<DiscoveredReference>,
    threads: &JsonlStore<ThreadRecord>,
    request_delay: Duration,
) -> Result<ScrapeSummary> {
    if !references.exists() {
        bail!(
            "no discovered references at {}; run discovery first",
            references.path().display()
        );
    }

    let refs = references.scan_all().await?;
    let mut scraped = threads.keys(|t| t.post_id.clone()).await?;
    let mut summary = ScrapeSummary {
        references: refs.len(),
        ..Default::default()
    };

    for reference in &refs {
        let Some(thread_id) = thread_id_from_url(&reference.url) else {
            warn!(url = %reference.url, "reference has no thread id");
            summary.unparseable += 1;
            continue;
        };
        if scraped.contains(&thread_id) {
            summary.already_scraped += 1;
            continue;
        }

        let fetched = source.fetch_thread(&thread_id).await;
        if !request_delay.is_zero() {
            tokio::time::sleep(request_delay).await;
        }
        let raw = match fetched {
            Ok(raw) => raw,
            Err(err) => {
                warn!(thread_id = %thread_id, error = %err, "thread fetch failed");
                summary.errors += 1;
                continue;
            }
        };

        let record = thread_record(raw);
        summary.replies += record.comments.len();
        threads.append(&record).await?;
        debug!(thread_id = %record.post_id, replies = record.comments.len(), "stored thread");
        scraped.insert(thread_id);
        summary.scraped += 1;
    }

    info!(
        scraped = summary.scraped,
        skipped = summary.already_scraped,
        errors = summary.errors,
        "scrape finished"
    );
    Ok(summary)
}

pub fn thread_record(raw: RawThread) -> ThreadRecord {
    let comments = flatten_replies(&raw.post.id, &raw.replies);
    let post = raw.post;
    ThreadRecord {
        post_id: post.id,
        subreddit: post.subreddit,
        title: post.title,
        selftext: post.selftext,
        score: post.score,
        url: post.url,
        permalink: post.permalink,
        author: post.author,
        created: post.created,
        num_comments: post.num_comments,
        comments,
    }
}

/// Flatten nested replies in pre-order. Top-level replies get depth 0 and no
/// parent. Removed bodies are dropped and their children are re-parented onto
/// the nearest kept ancestor, so `depth` always equals the kept-ancestor count.
pub fn flatten_replies(post_id: &str, replies: &[RawReply]) -> Vec<ReplyRecord> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut stack: Vec<(&RawReply, u32, Option<&str>)> =
        replies.iter().rev().map(|r| (r, 0, None)).collect();

    while let Some((reply, depth, parent)) = stack.pop() {
        let keep = !is_removed(&reply.body) && seen.insert(reply.id.as_str());
        let (child_depth, child_parent) = if keep {
            (depth + 1, Some(reply.id.as_str()))
        } else {
            (depth, parent)
        };
        for child in reply.replies.iter().rev() {
            stack.push((child, child_depth, child_parent));
        }
        if !keep {
            continue;
        }
        out.push(ReplyRecord {
            id: reply.id.clone(),
            parent_id: parent.map(str::to_string),
            post_id: post_id.to_string(),
            depth,
            text: reply.body.clone(),
            score: reply.score,
            author: reply.author.clone(),
            created: reply.created,
        });
    }
    out
}

pub fn is_removed(body: &str) -> bool {
    matches!(body.trim(), "" | "[deleted]" | "[removed]")
}
