//! Reddit public JSON endpoints: `/r/{sub}/new.json`, `/comments/{id}.json`
//! and `/api/morechildren.json`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use vsboard_storage::HttpFetcher;

use crate::{ListingItem, ListingPage, ListingSource, RawPost, RawReply, RawThread, SourceError, ThreadSource};

const DEFAULT_BASE_URL: &str = "https://www.reddit.com";
const MORECHILDREN_CHUNK: usize = 100;
const SOURCE_ID: &str = "reddit";

pub struct RedditSource {
    http: HttpFetcher,
    base_url: String,
    expand_delay: Duration,
}

impl RedditSource {
    pub fn new(http: HttpFetcher) -> Self {
        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            expand_delay: Duration::from_secs(1),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_expand_delay(mut self, delay: Duration) -> Self {
        self.expand_delay = delay;
        self
    }

    pub fn listing_url(&self, group: &str, cursor: Option<&str>, page_size: usize) -> String {
        let mut url = format!(
            "{}/r/{}/new.json?limit={}&raw_json=1",
            self.base_url,
            group.trim_start_matches("r/"),
            page_size.clamp(1, 100)
        );
        if let Some(after) = cursor {
            url.push_str("&after=");
            url.push_str(after);
        }
        url
    }

    fn thread_url(&self, thread_id: &str) -> String {
        format!("{}/comments/{}.json?limit=500&raw_json=1", self.base_url, thread_id)
    }

    fn subthread_url(&self, thread_id: &str, comment_id: &str) -> String {
        format!(
            "{}/comments/{}/_/{}.json?limit=500&raw_json=1",
            self.base_url, thread_id, comment_id
        )
    }

    fn morechildren_url(&self, thread_id: &str, ids: &[String]) -> String {
        format!(
            "{}/api/morechildren.json?api_type=json&raw_json=1&link_id=t3_{}&children={}",
            self.base_url,
            thread_id,
            ids.join(",")
        )
    }

    async fn pause(&self) {
        if !self.expand_delay.is_zero() {
            tokio::time::sleep(self.expand_delay).await;
        }
    }
}

#[async_trait]
impl ListingSource for RedditSource {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    async fn fetch_page(
        &self,
        group: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<ListingPage, SourceError> {
        let url = self.listing_url(group, cursor, page_size);
        let listing: RawListing = self.http.get_json(SOURCE_ID, &url).await?;
        Ok(parse_listing_page(listing))
    }
}

#[async_trait]
impl ThreadSource for RedditSource {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    async fn fetch_thread(&self, thread_id: &str) -> Result<RawThread, SourceError> {
        let url = self.thread_url(thread_id);
        let listings: Vec<RawListing> = self.http.get_json(SOURCE_ID, &url).await?;
        let (post, mut tree) = parse_thread_listings(listings, &url)?;

        while let Some(stub) = tree.pending.pop() {
            self.pause().await;
            match stub {
                MoreStub::Children(ids) => {
                    for chunk in ids.chunks(MORECHILDREN_CHUNK) {
                        let url = self.morechildren_url(&post.id, chunk);
                        let resp: MoreChildrenResponse = self.http.get_json(SOURCE_ID, &url).await?;
                        debug!(thread_id, count = resp.json.data.things.len(), "expanded more-children stub");
                        tree.ingest(resp.json.data.things, None);
                    }
                }
                MoreStub::Continue(parent_id) => {
                    let url = self.subthread_url(&post.id, &parent_id);
                    let listings: Vec<RawListing> = self.http.get_json(SOURCE_ID, &url).await?;
                    tree.ingest_continuation(listings, &parent_id);
                }
            }
        }

        Ok(RawThread {
            post,
            replies: tree.into_nested(),
        })
    }
}

/// Pull the thread id out of a Reddit URL (`.../comments/<id>/...` or `redd.it/<id>`).
pub fn thread_id_from_url(url: &str) -> Option<String> {
    if let Some(pos) = url.find("/comments/") {
        let rest = &url[pos + "/comments/".len()..];
        let id = rest.split(['/', '?', '#']).next().unwrap_or_default();
        return (!id.is_empty()).then(|| id.to_string());
    }
    if let Some(pos) = url.find("redd.it/") {
        let rest = &url[pos + "redd.it/".len()..];
        let id = rest.split(['/', '?', '#']).next().unwrap_or_default();
        return (!id.is_empty()).then(|| id.to_string());
    }
    None
}

/// Absolute URL for a listing permalink (`/r/x/comments/id/slug/`).
pub fn permalink_url(permalink: &str) -> String {
    if permalink.starts_with("http://") || permalink.starts_with("https://") {
        permalink.to_string()
    } else {
        format!("{}/{}", DEFAULT_BASE_URL, permalink.trim_start_matches('/'))
    }
}

// Wire shapes ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RawListing {
    pub data: RawListingData,
}

#[derive(Debug, Deserialize)]
pub struct RawListingData {
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub children: Vec<RawThing>,
}

#[derive(Debug, Deserialize)]
pub struct RawThing {
    pub kind: String,
    #[serde(default)]
    pub data: JsonValue,
}

#[derive(Debug, Deserialize)]
struct PostData {
    id: String,
    #[serde(default)]
    subreddit: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    url: String,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    created_utc: f64,
    #[serde(default)]
    num_comments: u64,
}

#[derive(Debug, Deserialize)]
struct CommentData {
    id: String,
    #[serde(default)]
    parent_id: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    author: String,
    #[serde(default)]
    created_utc: f64,
    #[serde(default)]
    replies: RepliesField,
}

/// `replies` is either a nested listing or an empty string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RepliesField {
    Listing(RawListing),
    Other(JsonValue),
}

impl Default for RepliesField {
    fn default() -> Self {
        RepliesField::Other(JsonValue::Null)
    }
}

impl RepliesField {
    fn into_children(self) -> Vec<RawThing> {
        match self {
            RepliesField::Listing(listing) => listing.data.children,
            RepliesField::Other(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MoreData {
    #[serde(default)]
    parent_id: String,
    #[serde(default)]
    children: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MoreChildrenResponse {
    json: MoreChildrenJson,
}

#[derive(Debug, Deserialize)]
struct MoreChildrenJson {
    data: MoreChildrenData,
}

#[derive(Debug, Deserialize, Default)]
struct MoreChildrenData {
    #[serde(default)]
    things: Vec<RawThing>,
}

impl From<PostData> for RawPost {
    fn from(d: PostData) -> Self {
        RawPost {
            id: d.id,
            subreddit: d.subreddit,
            title: d.title,
            selftext: d.selftext,
            score: d.score,
            url: d.url,
            permalink: d.permalink,
            author: d.author,
            created: d.created_utc,
            num_comments: d.num_comments,
        }
    }
}

pub fn parse_listing_page(listing: RawListing) -> ListingPage {
    let items = listing
        .data
        .children
        .into_iter()
        .filter(|thing| thing.kind == "t3")
        .filter_map(|thing| match serde_json::from_value::<PostData>(thing.data) {
            Ok(post) => Some(post),
            Err(err) => {
                warn!(error = %err, "skipping malformed listing entry");
                None
            }
        })
        .map(|post| ListingItem {
            id: post.id,
            subreddit: post.subreddit,
            title: post.title,
            body: post.selftext,
            created: post.created_utc,
            permalink: post.permalink,
            score: post.score,
            url: post.url,
            num_comments: post.num_comments,
        })
        .collect();
    ListingPage {
        items,
        next_cursor: listing.data.after.filter(|a| !a.is_empty()),
    }
}

/// Parse the `[post_listing, comment_listing]` pair returned by the thread endpoint.
pub fn parse_thread_listings(
    listings: Vec<RawListing>,
    url: &str,
) -> Result<(RawPost, ReplyArena), SourceError> {
    let mut listings = listings.into_iter();
    let post_listing = listings.next().ok_or_else(|| SourceError::Payload {
        url: url.to_string(),
        message: "empty thread response".into(),
    })?;
    let post_thing = post_listing
        .data
        .children
        .into_iter()
        .find(|thing| thing.kind == "t3")
        .ok_or_else(|| SourceError::Payload {
            url: url.to_string(),
            message: "thread response has no t3 entry".into(),
        })?;
    let post: PostData =
        serde_json::from_value(post_thing.data).map_err(|err| SourceError::Payload {
            url: url.to_string(),
            message: err.to_string(),
        })?;

    let mut arena = ReplyArena::default();
    if let Some(comments) = listings.next() {
        arena.ingest(comments.data.children, None);
    }
    Ok((post.into(), arena))
}

// Reply arena ----------------------------------------------------------------

#[derive(Debug)]
pub enum MoreStub {
    Children(Vec<String>),
    /// "continue this thread": the sub-tree under this comment must be fetched on its own.
    Continue(String),
}

#[derive(Debug)]
struct ArenaNode {
    reply: RawReply,
    children: Vec<usize>,
}

/// Flat storage for a reply tree that is assembled incrementally as stubs expand.
#[derive(Debug, Default)]
pub struct ReplyArena {
    nodes: Vec<ArenaNode>,
    roots: Vec<usize>,
    index: HashMap<String, usize>,
    pub pending: Vec<MoreStub>,
}

impl ReplyArena {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a batch of things. Nested `replies` go under their comment; top-level
    /// entries go under `parent` if given, otherwise under whatever their raw
    /// `parent_id` points at.
    pub fn ingest(&mut self, things: Vec<RawThing>, parent: Option<usize>) {
        let mut stack: Vec<(Option<usize>, RawThing)> =
            things.into_iter().rev().map(|t| (parent, t)).collect();
        let mut created: Vec<(usize, Option<usize>)> = Vec::new();

        while let Some((parent, thing)) = stack.pop() {
            match thing.kind.as_str() {
                "t1" => {
                    let data: CommentData = match serde_json::from_value(thing.data) {
                        Ok(data) => data,
                        Err(err) => {
                            warn!(error = %err, "skipping malformed comment");
                            continue;
                        }
                    };
                    if self.index.contains_key(&data.id) {
                        continue;
                    }
                    let children = data.replies.into_children();
                    let idx = self.nodes.len();
                    self.index.insert(data.id.clone(), idx);
                    self.nodes.push(ArenaNode {
                        reply: RawReply {
                            id: data.id,
                            parent_ref: data.parent_id,
                            body: data.body,
                            score: data.score,
                            author: data.author,
                            created: data.created_utc,
                            replies: Vec::new(),
                        },
                        children: Vec::new(),
                    });
                    created.push((idx, parent));
                    for child in children.into_iter().rev() {
                        stack.push((Some(idx), child));
                    }
                }
                "more" => {
                    let Ok(more) = serde_json::from_value::<MoreData>(thing.data) else {
                        continue;
                    };
                    if more.children.is_empty() {
                        if let Some(comment_id) = more.parent_id.strip_prefix("t1_") {
                            self.pending.push(MoreStub::Continue(comment_id.to_string()));
                        }
                    } else {
                        self.pending.push(MoreStub::Children(more.children));
                    }
                }
                _ => {}
            }
        }

        for (idx, parent) in created {
            let parent = parent.or_else(|| self.resolve_parent(&self.nodes[idx].reply.parent_ref));
            match parent {
                Some(p) if p != idx => self.nodes[p].children.push(idx),
                _ => self.roots.push(idx),
            }
        }
    }

    /// Graft the replies of `comment_id` from a sub-thread response.
    pub fn ingest_continuation(&mut self, listings: Vec<RawListing>, comment_id: &str) {
        let Some(&anchor) = self.index.get(comment_id) else {
            warn!(comment_id, "continuation anchor missing, dropping sub-thread");
            return;
        };
        let Some(comments) = listings.into_iter().nth(1) else {
            return;
        };
        for thing in comments.data.children {
            if thing.kind != "t1" {
                continue;
            }
            let Ok(data) = serde_json::from_value::<CommentData>(thing.data) else {
                continue;
            };
            if data.id == comment_id {
                self.ingest(data.replies.into_children(), Some(anchor));
            }
        }
    }

    fn resolve_parent(&self, parent_ref: &str) -> Option<usize> {
        parent_ref
            .strip_prefix("t1_")
            .and_then(|id| self.index.get(id).copied())
    }

    /// Rebuild the nested tree. Children are assembled bottom-up without recursion.
    pub fn into_nested(self) -> Vec<RawReply> {
        let ReplyArena { nodes, roots, .. } = self;
        let child_lists: Vec<Vec<usize>> = nodes.iter().map(|n| n.children.clone()).collect();
        let mut built: Vec<Option<RawReply>> = nodes.into_iter().map(|n| Some(n.reply)).collect();

        let mut order = Vec::with_capacity(built.len());
        let mut stack = roots.clone();
        while let Some(idx) = stack.pop() {
            order.push(idx);
            stack.extend(child_lists[idx].iter().copied());
        }

        for &idx in order.iter().rev() {
            let kids: Vec<RawReply> = child_lists[idx]
                .iter()
                .filter_map(|&c| built[c].take())
                .collect();
            if let Some(reply) = built[idx].as_mut() {
                reply.replies = kids;
            }
        }

        roots.into_iter().filter_map(|r| built[r].take()).collect()
    }
}
