//! Classification: pick eligible unclassified replies, ask the classifier for a
//! closed-vocabulary verdict, persist each verdict immediately, and log the run.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use vsboard_adapters::{Classifier, ClassifierError, Completion};
use vsboard_core::{
    ClassificationResult, Comparison, KeywordSet, ReplyRecord, RunLog, Sentiment, ThreadRecord,
};
use vsboard_storage::JsonlStore;

use crate::context::{ReplyIndex, ThreadContext};

pub const SYSTEM_PROMPT: &str = "You analyse Reddit comments that compare two AI coding \
assistants: Claude Code (Anthropic) and Codex (OpenAI). You answer with a single JSON object \
and nothing else.";

/// Dollars per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            input_per_mtok: 3.0,
            output_per_mtok: 15.0,
        }
    }
}

impl Pricing {
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_per_mtok + output_tokens as f64 * self.output_per_mtok)
            / 1_000_000.0
    }
}

#[derive(Debug, Clone)]
pub struct ClassifyOptions {
    pub batch_size: usize,
    pub request_delay: Duration,
    pub pricing: Pricing,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassifySummary {
    pub eligible: usize,
    pub already_analyzed: usize,
    pub attempted: usize,
    pub analyzed: usize,
    pub errors: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost: f64,
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classifier response contains no JSON object")]
    NoJsonObject,
    #[error("classifier response does not match the verdict schema: {0}")]
    Schema(#[from] serde_json::Error),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
}

/// The structured part of a classifier response. Enum fields decode strictly,
/// so an out-of-vocabulary value is a schema error.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub comparison: Comparison,
    #[serde(alias = "claude_code_sentiment")]
    pub claude_code_sentiment: Sentiment,
    #[serde(alias = "codex_sentiment")]
    pub codex_sentiment: Sentiment,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default, alias = "quote_worthy")]
    pub quote_worthy: bool,
    #[serde(default)]
    pub quote: Option<String>,
}

/// One reply selected for classification.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub thread: &'a ThreadRecord,
    pub reply: &'a ReplyRecord,
    pub context: String,
}

/// Every eligible reply not in `done`, in thread order then reply order.
pub fn select_candidates<'a>(
    threads: &'a [ThreadRecord],
    done: &HashSet<String>,
    keywords: &KeywordSet,
) -> Vec<Candidate<'a>> {
    let mut out = Vec::new();
    let mut queued: HashSet<&str> = HashSet::new();
    for thread in threads {
        let index = ReplyIndex::new(thread);
        for reply in &thread.comments {
            if done.contains(&reply.id) || !queued.insert(reply.id.as_str()) {
                continue;
            }
            let ctx = ThreadContext::build(thread, &index, reply);
            if ctx.is_eligible(keywords) {
                out.push(Candidate {
                    thread,
                    reply,
                    context: ctx.render(),
                });
            }
        }
    }
    out
}

pub fn build_prompt(context: &str) -> String {
    let categories = Comparison::ALL
        .iter()
        .map(|c| format!("- {}: {}", c.as_str(), c.label()))
        .collect::<Vec<_>>()
        .join("\n");
    let sentiments = [
        Sentiment::Positive,
        Sentiment::Negative,
        Sentiment::Neutral,
        Sentiment::NotApplicable,
    ]
    .iter()
    .map(|s| s.as_str())
    .collect::<Vec<_>>()
    .join(", ");

    format!(
        "Below is a Reddit post and the chain of comments leading to the comment under review. \
Classify ONLY the last comment in the chain; earlier comments are context.\n\n\
{context}\n\
Pick exactly one comparison value:\n{categories}\n\n\
Sentiment values (one per tool): {sentiments}\n\n\
Respond with JSON only:\n\
{{\"comparison\": \"...\", \"claudeCodeSentiment\": \"...\", \"codexSentiment\": \"...\", \
\"reasoning\": \"one sentence\", \"themes\": [\"short lowercase tags\"], \
\"quoteWorthy\": false, \"quote\": null}}"
    )
}

/// Substring from the first `{` to the last `}`, tolerating prose or code fences around it.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

pub fn parse_verdict(text: &str) -> Result<Verdict, ClassifyError> {
    let json = extract_json_object(text).ok_or(ClassifyError::NoJsonObject)?;
    let mut verdict: Verdict = serde_json::from_str(json)?;
    verdict.themes = normalize_themes(&verdict.themes);
    verdict.quote = verdict
        .quote
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty());
    Ok(verdict)
}

fn normalize_themes(themes: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for theme in themes {
        let theme = theme.trim().to_lowercase();
        if !theme.is_empty() && !out.contains(&theme) {
            out.push(theme);
        }
    }
    out
}

fn estimate_tokens(text_len: usize) -> u64 {
    (text_len as u64).div_ceil(4)
}

pub struct ClassifyStores<'a> {
    pub threads: &'a JsonlStore<ThreadRecord>,
    pub results: &'a JsonlStore<ClassificationResult>,
    pub runs: &'a JsonlStore<RunLog>,
}

pub async fn run_classification(
    classifier: &dyn Classifier,
    stores: ClassifyStores<'_>,
    keywords: &KeywordSet,
    opts: &ClassifyOptions,
) -> Result<ClassifySummary> {
    if !stores.threads.exists() {
        bail!(
            "no scraped threads at {}; run scrape first",
            stores.threads.path().display()
        );
    }
    let started = Instant::now();
    let threads = stores.threads.scan_all().await?;
    let done = stores.results.keys(|r| r.comment_id.clone()).await?;
    let candidates = select_candidates(&threads, &done, keywords);
    let batch: Vec<_> = candidates.iter().take(opts.batch_size).collect();
    info!(
        eligible = candidates.len(),
        already = done.len(),
        batch = batch.len(),
        model = classifier.model(),
        "classification starting"
    );

    let mut summary = ClassifySummary {
        eligible: candidates.len(),
        already_analyzed: done.len(),
        attempted: batch.len(),
        analyzed: 0,
        errors: 0,
        input_tokens: 0,
        output_tokens: 0,
        estimated_cost: 0.0,
    };

    for (i, candidate) in batch.iter().enumerate() {
        if i > 0 && !opts.request_delay.is_zero() {
            tokio::time::sleep(opts.request_delay).await;
        }
        let prompt = build_prompt(&candidate.context);
        let outcome = match classifier.classify(SYSTEM_PROMPT, &prompt).await {
            Ok(completion) => {
                // Billed whether or not the verdict parses.
                let (input, output) = token_counts(&prompt, &completion);
                summary.input_tokens += input;
                summary.output_tokens += output;
                parse_verdict(&completion.text)
            }
            Err(err) => Err(err.into()),
        };
        match outcome {
            Ok(verdict) => {
                let result = result_for(candidate, verdict, classifier.model());
                stores.results.append(&result).await?;
                summary.analyzed += 1;
                debug!(comment_id = %result.comment_id, comparison = %result.comparison, "classified");
            }
            Err(err) => {
                summary.errors += 1;
                let rate_limited =
                    matches!(&err, ClassifyError::Classifier(e) if e.is_rate_limited());
                warn!(comment_id = %candidate.reply.id, rate_limited, error = %err, "classification failed");
            }
        }
    }

    summary.estimated_cost = opts.pricing.cost(summary.input_tokens, summary.output_tokens);
    let run = RunLog {
        timestamp: Utc::now(),
        model: classifier.model().to_string(),
        total_candidates: summary.eligible,
        already_analyzed: summary.already_analyzed,
        analyzed_this_run: summary.analyzed,
        errors: summary.errors,
        time_seconds: started.elapsed().as_secs_f64(),
        input_tokens: summary.input_tokens,
        output_tokens: summary.output_tokens,
        estimated_cost: summary.estimated_cost,
        batch_size: opts.batch_size,
    };
    stores.runs.append(&run).await?;

    info!(
        analyzed = summary.analyzed,
        errors = summary.errors,
        remaining = summary.eligible.saturating_sub(summary.analyzed),
        cost = %format!("{:.4}", summary.estimated_cost),
        "classification finished"
    );
    Ok(summary)
}

fn token_counts(prompt: &str, completion: &Completion) -> (u64, u64) {
    let input = completion
        .input_tokens
        .unwrap_or_else(|| estimate_tokens(SYSTEM_PROMPT.len() + prompt.len()));
    let output = completion
        .output_tokens
        .unwrap_or_else(|| estimate_tokens(completion.text.len()));
    (input, output)
}

fn result_for(candidate: &Candidate<'_>, verdict: Verdict, model: &str) -> ClassificationResult {
    ClassificationResult {
        comment_id: candidate.reply.id.clone(),
        post_id: candidate.thread.post_id.clone(),
        subreddit: candidate.thread.subreddit.clone(),
        permalink: format!(
            "{}/{}/",
            candidate.thread.permalink.trim_end_matches('/'),
            candidate.reply.id
        ),
        comparison: verdict.comparison,
        claude_code_sentiment: verdict.claude_code_sentiment,
        codex_sentiment: verdict.codex_sentiment,
        reasoning: verdict.reasoning,
        themes: verdict.themes,
        quote_worthy: verdict.quote_worthy,
        quote: verdict.quote,
        score: candidate.reply.score,
        model: model.to_string(),
        analyzed_at: Utc::now(),
    }
}
