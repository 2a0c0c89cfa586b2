//! Core record model for the Claude Code vs Codex discussion pipeline.
//!
//! Every stage persists one of these records as a single JSON line. Field names
//! on the wire are camelCase and must stay stable across releases, since the
//! stores are append-only and older lines are read back by newer binaries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "vsboard-core";

/// A thread found by discovery. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredReference {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    pub discovered_at: DateTime<Utc>,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subreddit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<f64>,
}

/// A scraped thread with its flattened reply tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadRecord {
    pub post_id: String,
    pub subreddit: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    pub score: i64,
    pub url: String,
    pub permalink: String,
    #[serde(default)]
    pub author: String,
    pub created: f64,
    pub num_comments: u64,
    #[serde(default)]
    pub comments: Vec<ReplyRecord>,
}

impl ThreadRecord {
    pub fn reply(&self, id: &str) -> Option<&ReplyRecord> {
        self.comments.iter().find(|c| c.id == id)
    }
}

/// One reply inside a thread. `parent_id == None` means a direct child of the post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRecord {
    pub id: String,
    pub parent_id: Option<String>,
    pub post_id: String,
    pub depth: u32,
    pub text: String,
    pub score: i64,
    #[serde(default)]
    pub author: String,
    pub created: f64,
}

/// Classifier verdict for one reply. At most one exists per `comment_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub comment_id: String,
    pub post_id: String,
    pub subreddit: String,
    pub permalink: String,
    pub comparison: Comparison,
    pub claude_code_sentiment: Sentiment,
    pub codex_sentiment: Sentiment,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub quote_worthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    pub score: i64,
    pub model: String,
    pub analyzed_at: DateTime<Utc>,
}

/// Audit line written once per classification invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLog {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub total_candidates: usize,
    pub already_analyzed: usize,
    pub analyzed_this_run: usize,
    pub errors: usize,
    pub time_seconds: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost: f64,
    pub batch_size: usize,
}

#[derive(Debug, Error)]
#[error("unknown {kind} value `{value}`")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Closed vocabulary for how a reply compares the two tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = "codex_better", alias = "toolB_better")]
    CodexBetter,
    #[serde(rename = "claude_code_better", alias = "toolA_better")]
    ClaudeCodeBetter,
    #[serde(rename = "equal")]
    Equal,
    #[serde(rename = "claude_code_only_positive", alias = "toolA_only_positive")]
    ClaudeCodeOnlyPositive,
    #[serde(rename = "claude_code_only_negative", alias = "toolA_only_negative")]
    ClaudeCodeOnlyNegative,
    #[serde(rename = "codex_only_positive", alias = "toolB_only_positive")]
    CodexOnlyPositive,
    #[serde(rename = "codex_only_negative", alias = "toolB_only_negative")]
    CodexOnlyNegative,
    #[serde(rename = "neither")]
    Neither,
    #[serde(rename = "off_topic")]
    OffTopic,
}

impl Comparison {
    pub const ALL: [Comparison; 9] = [
        Comparison::CodexBetter,
        Comparison::ClaudeCodeBetter,
        Comparison::Equal,
        Comparison::ClaudeCodeOnlyPositive,
        Comparison::ClaudeCodeOnlyNegative,
        Comparison::CodexOnlyPositive,
        Comparison::CodexOnlyNegative,
        Comparison::Neither,
        Comparison::OffTopic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Comparison::CodexBetter => "codex_better",
            Comparison::ClaudeCodeBetter => "claude_code_better",
            Comparison::Equal => "equal",
            Comparison::ClaudeCodeOnlyPositive => "claude_code_only_positive",
            Comparison::ClaudeCodeOnlyNegative => "claude_code_only_negative",
            Comparison::CodexOnlyPositive => "codex_only_positive",
            Comparison::CodexOnlyNegative => "codex_only_negative",
            Comparison::Neither => "neither",
            Comparison::OffTopic => "off_topic",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Comparison::CodexBetter => "Codex better",
            Comparison::ClaudeCodeBetter => "Claude Code better",
            Comparison::Equal => "About equal",
            Comparison::ClaudeCodeOnlyPositive => "Claude Code only (positive)",
            Comparison::ClaudeCodeOnlyNegative => "Claude Code only (negative)",
            Comparison::CodexOnlyPositive => "Codex only (positive)",
            Comparison::CodexOnlyNegative => "Codex only (negative)",
            Comparison::Neither => "Neither",
            Comparison::OffTopic => "Off topic",
        }
    }

    pub fn group(self) -> PreferenceGroup {
        match self {
            Comparison::ClaudeCodeBetter
            | Comparison::ClaudeCodeOnlyPositive
            | Comparison::ClaudeCodeOnlyNegative => PreferenceGroup::ClaudeCode,
            Comparison::CodexBetter
            | Comparison::CodexOnlyPositive
            | Comparison::CodexOnlyNegative => PreferenceGroup::Codex,
            Comparison::Equal => PreferenceGroup::Neutral,
            Comparison::Neither | Comparison::OffTopic => PreferenceGroup::Unclear,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Comparison {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Comparison::ALL
            .into_iter()
            .find(|c| c.as_str() == needle)
            .or(match needle {
                "toolA_better" => Some(Comparison::ClaudeCodeBetter),
                "toolB_better" => Some(Comparison::CodexBetter),
                "toolA_only_positive" => Some(Comparison::ClaudeCodeOnlyPositive),
                "toolA_only_negative" => Some(Comparison::ClaudeCodeOnlyNegative),
                "toolB_only_positive" => Some(Comparison::CodexOnlyPositive),
                "toolB_only_negative" => Some(Comparison::CodexOnlyNegative),
                _ => None,
            })
            .ok_or_else(|| UnknownVariant {
                kind: "comparison",
                value: s.to_string(),
            })
    }
}

/// Coarse buckets used by the clear-preference view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PreferenceGroup {
    #[serde(rename = "claude_code_preferred")]
    ClaudeCode,
    #[serde(rename = "codex_preferred")]
    Codex,
    #[serde(rename = "neutral")]
    Neutral,
    #[serde(rename = "unclear")]
    Unclear,
}

impl PreferenceGroup {
    pub const ALL: [PreferenceGroup; 4] = [
        PreferenceGroup::ClaudeCode,
        PreferenceGroup::Codex,
        PreferenceGroup::Neutral,
        PreferenceGroup::Unclear,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PreferenceGroup::ClaudeCode => "claude_code_preferred",
            PreferenceGroup::Codex => "codex_preferred",
            PreferenceGroup::Neutral => "neutral",
            PreferenceGroup::Unclear => "unclear",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PreferenceGroup::ClaudeCode => "Prefers Claude Code",
            PreferenceGroup::Codex => "Prefers Codex",
            PreferenceGroup::Neutral => "Neutral",
            PreferenceGroup::Unclear => "Unclear",
        }
    }

    pub fn members(self) -> impl Iterator<Item = Comparison> {
        Comparison::ALL.into_iter().filter(move |c| c.group() == self)
    }
}

impl FromStr for PreferenceGroup {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PreferenceGroup::ALL
            .into_iter()
            .find(|g| g.as_str() == s.trim())
            .ok_or_else(|| UnknownVariant {
                kind: "preference group",
                value: s.to_string(),
            })
    }
}

/// Per-tool sentiment expressed by a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sentiment {
    #[serde(rename = "positive")]
    Positive,
    #[serde(rename = "negative")]
    Negative,
    #[serde(rename = "neutral")]
    Neutral,
    #[serde(rename = "not_applicable", alias = "not-applicable", alias = "n/a")]
    NotApplicable,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
            Sentiment::NotApplicable => "not_applicable",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Required search terms. A text matches only when every term occurs in it,
/// compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeywordSet {
    terms: Vec<String>,
}

impl KeywordSet {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for term in terms {
            let term = term.as_ref().trim().to_lowercase();
            if !term.is_empty() && !out.contains(&term) {
                out.push(term);
            }
        }
        Self { terms: out }
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn matches(&self, text: &str) -> bool {
        let haystack = text.to_lowercase();
        self.terms.iter().all(|t| haystack.contains(t.as_str()))
    }
}
