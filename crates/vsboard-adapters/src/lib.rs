//! External collaborator contracts: the source listing, the thread-detail API,
//! and the text classifier. The pipeline only talks to these traits.

mod classifier;
mod fixture;
pub mod reddit;

pub use classifier::{AnthropicClassifier, Classifier, ClassifierError, Completion};
pub use fixture::{load_fixture_bundle, FixtureBundle, FixtureSource};
pub use reddit::{permalink_url, thread_id_from_url, RedditSource};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vsboard_storage::FetchError;

pub const CRATE_NAME: &str = "vsboard-adapters";

/// One post as exposed by a listing page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingItem {
    pub id: String,
    pub subreddit: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub created: f64,
    pub permalink: String,
    pub score: i64,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub num_comments: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListingPage {
    pub items: Vec<ListingItem>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPost {
    pub id: String,
    pub subreddit: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    pub score: i64,
    #[serde(default)]
    pub url: String,
    pub permalink: String,
    #[serde(default)]
    pub author: String,
    pub created: f64,
    #[serde(default)]
    pub num_comments: u64,
}

/// Reply as delivered by the source, children nested. `parent_ref` is the
/// source's raw parent pointer (`t3_<post>` for top-level, `t1_<reply>` otherwise).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReply {
    pub id: String,
    pub parent_ref: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub created: f64,
    #[serde(default)]
    pub replies: Vec<RawReply>,
}

/// A thread with every paginated reply already expanded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawThread {
    pub post: RawPost,
    #[serde(default)]
    pub replies: Vec<RawReply>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unexpected payload from {url}: {message}")]
    Payload { url: String, message: String },
    #[error("thread {0} not found")]
    NotFound(String),
    #[error("{0}")]
    Message(String),
}

#[async_trait]
pub trait ListingSource: Send + Sync {
    fn source_id(&self) -> &str;

    /// Fetch one page of the group's listing, newest first.
    async fn fetch_page(
        &self,
        group: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<ListingPage, SourceError>;
}

#[async_trait]
pub trait ThreadSource: Send + Sync {
    fn source_id(&self) -> &str;

    async fn fetch_thread(&self, thread_id: &str) -> Result<RawThread, SourceError>;
}
