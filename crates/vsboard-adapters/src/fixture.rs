//! Fixture-backed sources. Pages and threads come from a JSON bundle on disk
//! or are registered in code, so every stage can run without the network.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ListingPage, ListingSource, RawThread, SourceError, ThreadSource};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureBundle {
    pub fixture_id: String,
    /// Pages per source group. The cursor of page `n` is `"n"`.
    #[serde(default)]
    pub pages: BTreeMap<String, Vec<ListingPage>>,
    #[serde(default)]
    pub threads: Vec<RawThread>,
}

pub fn load_fixture_bundle(path: impl AsRef<Path>) -> Result<FixtureBundle> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

#[derive(Debug, Default)]
pub struct FixtureSource {
    bundle: FixtureBundle,
    failing_groups: HashSet<String>,
    failing_threads: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FixtureSource {
    pub fn new(bundle: FixtureBundle) -> Self {
        Self {
            bundle,
            ..Default::default()
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load_fixture_bundle(path)?))
    }

    pub fn with_pages(mut self, group: &str, pages: Vec<ListingPage>) -> Self {
        self.bundle.pages.insert(group.to_string(), pages);
        self
    }

    pub fn with_thread(mut self, thread: RawThread) -> Self {
        self.bundle.threads.push(thread);
        self
    }

    pub fn failing_group(mut self, group: &str) -> Self {
        self.failing_groups.insert(group.to_string());
        self
    }

    pub fn failing_thread(mut self, thread_id: &str) -> Self {
        self.failing_threads.insert(thread_id.to_string());
        self
    }

    /// Every request served so far, as `page:<group>:<cursor>` or `thread:<id>`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl ListingSource for FixtureSource {
    fn source_id(&self) -> &str {
        "fixture"
    }

    async fn fetch_page(
        &self,
        group: &str,
        cursor: Option<&str>,
        _page_size: usize,
    ) -> Result<ListingPage, SourceError> {
        self.record(format!("page:{group}:{}", cursor.unwrap_or("-")));
        if self.failing_groups.contains(group) {
            return Err(SourceError::Message(format!("fixture failure for group {group}")));
        }
        let index = match cursor {
            None => 0,
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| SourceError::Message(format!("bad fixture cursor {c}")))?,
        };
        let Some(pages) = self.bundle.pages.get(group) else {
            return Ok(ListingPage::default());
        };
        let Some(page) = pages.get(index) else {
            return Ok(ListingPage::default());
        };
        let next_cursor = (index + 1 < pages.len()).then(|| (index + 1).to_string());
        Ok(ListingPage {
            items: page.items.clone(),
            next_cursor,
        })
    }
}

#[async_trait]
impl ThreadSource for FixtureSource {
    fn source_id(&self) -> &str {
        "fixture"
    }

    async fn fetch_thread(&self, thread_id: &str) -> Result<RawThread, SourceError> {
        self.record(format!("thread:{thread_id}"));
        if self.failing_threads.contains(thread_id) {
            return Err(SourceError::Message(format!("fixture failure for thread {thread_id}")));
        }
        self.bundle
            .threads
            .iter()
            .find(|t| t.post.id == thread_id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(thread_id.to_string()))
    }
}
