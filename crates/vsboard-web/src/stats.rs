//! In-memory aggregation over classification results.
//!
//! Everything here is a pure function of the loaded results, the ignore set and
//! a [`FilterState`]; nothing is cached between calls.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use vsboard_core::{ClassificationResult, Comparison, PreferenceGroup, UnknownVariant};

use crate::ignore::IgnoreSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CategoryFilter {
    #[default]
    All,
    Category(Comparison),
    Group(PreferenceGroup),
}

impl CategoryFilter {
    pub fn matches(self, comparison: Comparison) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Category(c) => c == comparison,
            CategoryFilter::Group(g) => comparison.group() == g,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CategoryFilter::All => "all",
            CategoryFilter::Category(c) => c.as_str(),
            CategoryFilter::Group(g) => g.as_str(),
        }
    }
}

impl FromStr for CategoryFilter {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(CategoryFilter::All);
        }
        if let Ok(c) = s.parse::<Comparison>() {
            return Ok(CategoryFilter::Category(c));
        }
        s.parse::<PreferenceGroup>()
            .map(CategoryFilter::Group)
            .map_err(|_| UnknownVariant {
                kind: "category filter",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    #[default]
    Count,
    Score,
}

impl Weighting {
    /// Popularity weight never drops below 1, so a category with results
    /// always has a nonzero total under either weighting.
    pub fn weight(self, result: &ClassificationResult) -> u64 {
        match self {
            Weighting::Count => 1,
            Weighting::Score => result.score.max(1) as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Recency,
    Popularity,
}

impl FromStr for SortKey {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "recency" | "recent" => Ok(SortKey::Recency),
            "popularity" | "score" => Ok(SortKey::Popularity),
            other => Err(UnknownVariant {
                kind: "sort key",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
    /// `None` means every subgroup.
    pub subgroup: Option<String>,
    /// `None` means every topic tag.
    pub topic: Option<String>,
    pub category: CategoryFilter,
    pub weighting: Weighting,
    pub sort: SortKey,
    pub include_ignored: bool,
}

pub fn active_set<'a>(
    all: &'a [ClassificationResult],
    ignores: &IgnoreSet,
    include_ignored: bool,
) -> Vec<&'a ClassificationResult> {
    all.iter()
        .filter(|r| include_ignored || !ignores.is_ignored(r))
        .collect()
}

pub fn filter_by_subgroup<'a>(
    set: &[&'a ClassificationResult],
    subgroup: Option<&str>,
) -> Vec<&'a ClassificationResult> {
    match subgroup {
        None => set.to_vec(),
        Some(s) => set
            .iter()
            .copied()
            .filter(|r| r.subreddit.eq_ignore_ascii_case(s))
            .collect(),
    }
}

pub fn filter_by_topic_tag<'a>(
    set: &[&'a ClassificationResult],
    topic: Option<&str>,
) -> Vec<&'a ClassificationResult> {
    match topic {
        None => set.to_vec(),
        Some(t) => set
            .iter()
            .copied()
            .filter(|r| r.themes.iter().any(|theme| theme.eq_ignore_ascii_case(t)))
            .collect(),
    }
}

pub fn filter_by_category<'a>(
    set: &[&'a ClassificationResult],
    category: CategoryFilter,
) -> Vec<&'a ClassificationResult> {
    set.iter()
        .copied()
        .filter(|r| category.matches(r.comparison))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryCount {
    pub comparison: Comparison,
    pub label: &'static str,
    pub count: usize,
    pub score: i64,
    /// Count or summed weight, depending on the weighting in effect.
    pub value: u64,
    pub percentage: f64,
}

/// One entry per category, in canonical order, including empty ones.
pub fn counts_by_category(set: &[&ClassificationResult], weighting: Weighting) -> Vec<CategoryCount> {
    let total: u64 = set.iter().map(|r| weighting.weight(r)).sum();
    Comparison::ALL
        .iter()
        .map(|&comparison| {
            let members = set.iter().filter(|r| r.comparison == comparison);
            let mut count = 0;
            let mut score = 0;
            let mut value = 0;
            for r in members {
                count += 1;
                score += r.score;
                value += weighting.weight(r);
            }
            CategoryCount {
                comparison,
                label: comparison.label(),
                count,
                score,
                value,
                percentage: percentage(value, total),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupTotal {
    pub group: PreferenceGroup,
    pub label: &'static str,
    pub value: u64,
    pub percentage: f64,
}

pub fn group_totals(counts: &[CategoryCount]) -> Vec<GroupTotal> {
    let total: u64 = counts.iter().map(|c| c.value).sum();
    PreferenceGroup::ALL
        .iter()
        .map(|&group| {
            let value = counts
                .iter()
                .filter(|c| c.comparison.group() == group)
                .map(|c| c.value)
                .sum();
            GroupTotal {
                group,
                label: group.label(),
                value,
                percentage: percentage(value, total),
            }
        })
        .collect()
}

/// Share of Claude Code preference among replies with a clear preference, in percent.
pub fn clear_preference_pct(groups: &[GroupTotal]) -> f64 {
    let value_of = |g: PreferenceGroup| {
        groups
            .iter()
            .find(|t| t.group == g)
            .map(|t| t.value)
            .unwrap_or(0)
    };
    let claude = value_of(PreferenceGroup::ClaudeCode);
    let codex = value_of(PreferenceGroup::Codex);
    percentage(claude, claude + codex)
}

fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetCount {
    pub name: String,
    pub count: usize,
    pub value: u64,
}

fn facet_counts<'a, F, I>(set: &[&'a ClassificationResult], weighting: Weighting, keys: F) -> Vec<FacetCount>
where
    F: Fn(&'a ClassificationResult) -> I,
    I: IntoIterator<Item = String>,
{
    let mut counts: BTreeMap<String, (usize, u64)> = BTreeMap::new();
    for &r in set {
        for key in keys(r) {
            let entry = counts.entry(key).or_default();
            entry.0 += 1;
            entry.1 += weighting.weight(r);
        }
    }
    let mut out: Vec<_> = counts
        .into_iter()
        .map(|(name, (count, value))| FacetCount { name, count, value })
        .collect();
    out.sort_by(|a, b| b.value.cmp(&a.value));
    out
}

pub fn topic_counts(set: &[&ClassificationResult], weighting: Weighting) -> Vec<FacetCount> {
    facet_counts(set, weighting, |r| {
        let mut themes: Vec<String> = r.themes.iter().map(|t| t.to_lowercase()).collect();
        themes.sort();
        themes.dedup();
        themes
    })
}

pub fn subgroup_counts(set: &[&ClassificationResult], weighting: Weighting) -> Vec<FacetCount> {
    facet_counts(set, weighting, |r| [r.subreddit.clone()])
}

/// Stable, descending.
pub fn sort_view(set: &mut [&ClassificationResult], by: SortKey) {
    match by {
        SortKey::Recency => set.sort_by(|a, b| b.analyzed_at.cmp(&a.analyzed_at)),
        SortKey::Popularity => set.sort_by(|a, b| b.score.cmp(&a.score)),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub weighting: Weighting,
    pub total: usize,
    pub total_value: u64,
    pub ignored: usize,
    pub categories: Vec<CategoryCount>,
    pub groups: Vec<GroupTotal>,
    pub clear_preference_pct: f64,
    pub topics: Vec<FacetCount>,
    pub subgroups: Vec<FacetCount>,
}

/// Subgroup facets come from the active set and topic facets from the
/// subgroup-filtered set, so selecting one never hides its siblings.
pub fn summarize(all: &[ClassificationResult], ignores: &IgnoreSet, state: &FilterState) -> Summary {
    let active = active_set(all, ignores, state.include_ignored);
    let by_subgroup = filter_by_subgroup(&active, state.subgroup.as_deref());
    let by_topic = filter_by_topic_tag(&by_subgroup, state.topic.as_deref());
    let filtered = filter_by_category(&by_topic, state.category);

    let categories = counts_by_category(&filtered, state.weighting);
    let groups = group_totals(&categories);
    Summary {
        weighting: state.weighting,
        total: filtered.len(),
        total_value: categories.iter().map(|c| c.value).sum(),
        ignored: all.len() - active.len(),
        clear_preference_pct: clear_preference_pct(&groups),
        categories,
        groups,
        topics: topic_counts(&by_subgroup, state.weighting),
        subgroups: subgroup_counts(&active, state.weighting),
    }
}

/// The filtered rows behind a [`Summary`], sorted for display.
pub fn filtered_view<'a>(
    all: &'a [ClassificationResult],
    ignores: &IgnoreSet,
    state: &FilterState,
) -> Vec<&'a ClassificationResult> {
    let active = active_set(all, ignores, state.include_ignored);
    let by_subgroup = filter_by_subgroup(&active, state.subgroup.as_deref());
    let by_topic = filter_by_topic_tag(&by_subgroup, state.topic.as_deref());
    let mut rows = filter_by_category(&by_topic, state.category);
    sort_view(&mut rows, state.sort);
    rows
}
