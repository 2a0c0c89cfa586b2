//! Conversation context for one reply: the thread header plus the chain of
//! ancestors from the top-level reply down to the target.

use std::collections::HashMap;
use std::fmt::Write as _;

use vsboard_core::{KeywordSet, ReplyRecord, ThreadRecord};

/// Id -> reply lookup for one thread, built once and shared by every context walk.
pub struct ReplyIndex<'a> {
    by_id: HashMap<&'a str, &'a ReplyRecord>,
}

impl<'a> ReplyIndex<'a> {
    pub fn new(thread: &'a ThreadRecord) -> Self {
        Self {
            by_id: thread.comments.iter().map(|c| (c.id.as_str(), c)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&'a ReplyRecord> {
        self.by_id.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ThreadContext<'a> {
    pub thread: &'a ThreadRecord,
    /// Root-most known ancestor first, target last.
    pub chain: Vec<&'a ReplyRecord>,
}

impl<'a> ThreadContext<'a> {
    pub fn build(thread: &'a ThreadRecord, index: &ReplyIndex<'a>, target: &'a ReplyRecord) -> Self {
        let mut chain = vec![target];
        let mut current = target;
        // Bounded by the thread size so a malformed parent cycle cannot spin.
        while chain.len() <= index.len() {
            let Some(parent) = current.parent_id.as_deref().and_then(|id| index.get(id)) else {
                break;
            };
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        Self { thread, chain }
    }

    pub fn target(&self) -> &'a ReplyRecord {
        self.chain[self.chain.len() - 1]
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Post title: {}", self.thread.title.trim());
        let body = self.thread.selftext.trim();
        if !body.is_empty() {
            let _ = writeln!(out, "Post body: {body}");
        }
        out.push('\n');
        for reply in &self.chain {
            let _ = writeln!(
                out,
                "[depth {} | score {}] {}",
                reply.depth,
                reply.score,
                reply.text.trim()
            );
        }
        out
    }

    /// Post title, post body and chain texts, without the render labels.
    pub fn searchable_text(&self) -> String {
        let mut parts = vec![self.thread.title.as_str(), self.thread.selftext.as_str()];
        parts.extend(self.chain.iter().map(|r| r.text.as_str()));
        parts.join("\n")
    }

    pub fn is_eligible(&self, keywords: &KeywordSet) -> bool {
        keywords.matches(&self.searchable_text())
    }
}
