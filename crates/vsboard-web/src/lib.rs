//! Axum + Askama browsing UI over the classification store.

pub mod ignore;
pub mod stats;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use askama::Template;
use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;
use vsboard_adapters::permalink_url;
use vsboard_core::{ClassificationResult, PreferenceGroup, RunLog};
use vsboard_storage::JsonlStore;
use vsboard_sync::{DataPaths, PipelineConfig};

use crate::ignore::{IgnoreSet, JsonFileStore, KeyValueStore};
use crate::stats::{CategoryFilter, FilterState, SortKey, Weighting};

pub const CRATE_NAME: &str = "vsboard-web";

const APP_CSS: &str = include_str!("../assets/app.css");
const MAX_COMMENT_ROWS: usize = 500;

#[derive(Clone)]
pub struct AppState {
    pub paths: DataPaths,
    /// Enables the ignore toggles. Decided once at startup.
    pub admin_mode: bool,
    ignores: Arc<Mutex<IgnoreSet>>,
    ignore_store: Arc<dyn KeyValueStore>,
}

impl AppState {
    pub fn new(data_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let data_dir: PathBuf = data_dir.into();
        let paths = DataPaths::new(&data_dir);
        let store = Arc::new(JsonFileStore::new(paths.ignored.clone()));
        Self::with_store(paths, store)
    }

    pub fn with_store(paths: DataPaths, store: Arc<dyn KeyValueStore>) -> anyhow::Result<Self> {
        let ignores = IgnoreSet::load(store.as_ref())?;
        Ok(Self {
            paths,
            admin_mode: false,
            ignores: Arc::new(Mutex::new(ignores)),
            ignore_store: store,
        })
    }

    pub fn with_admin(mut self, admin_mode: bool) -> Self {
        self.admin_mode = admin_mode;
        self
    }

    fn ignore_snapshot(&self) -> anyhow::Result<IgnoreSet> {
        self.ignores
            .lock()
            .map(|set| set.clone())
            .map_err(|_| anyhow!("ignore set lock poisoned"))
    }
}

/// Raw query string. Every field is optional; `all` or empty means no filter.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BoardQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subreddit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weighted: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_ignored: Option<String>,
}

impl BoardQuery {
    pub fn filter_state(&self) -> Result<FilterState, vsboard_core::UnknownVariant> {
        Ok(FilterState {
            subgroup: selection(&self.subreddit),
            topic: selection(&self.theme).map(|t| t.to_lowercase()),
            category: self.category.as_deref().unwrap_or("all").parse()?,
            weighting: if flag(&self.weighted) {
                Weighting::Score
            } else {
                Weighting::Count
            },
            sort: self.sort.as_deref().unwrap_or("").parse()?,
            include_ignored: flag(&self.include_ignored),
        })
    }

    pub fn from_state(state: &FilterState) -> Self {
        Self {
            subreddit: state.subgroup.clone(),
            theme: state.topic.clone(),
            category: (state.category != CategoryFilter::All).then(|| state.category.as_str().to_string()),
            weighted: (state.weighting == Weighting::Score).then(|| "true".to_string()),
            sort: (state.sort == SortKey::Popularity).then(|| "popularity".to_string()),
            include_ignored: state.include_ignored.then(|| "true".to_string()),
        }
    }
}

fn selection(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
        .map(str::to_string)
}

fn flag(value: &Option<String>) -> bool {
    matches!(value.as_deref().map(str::trim), Some("true" | "1" | "on" | "yes"))
}

fn href(path: &str, state: &FilterState) -> String {
    let qs = serde_urlencoded::to_string(BoardQuery::from_state(state)).unwrap_or_default();
    if qs.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{qs}")
    }
}

#[derive(Debug, Clone)]
struct FacetLink {
    name: String,
    count: usize,
    value: u64,
    href: String,
    selected: bool,
}

#[derive(Debug, Clone)]
struct CategoryRow {
    label: &'static str,
    key: &'static str,
    count: usize,
    score: i64,
    value: u64,
    percentage: f64,
    href: String,
    selected: bool,
}

#[derive(Debug, Clone)]
struct GroupRow {
    label: &'static str,
    value: u64,
    percentage: f64,
    href: String,
    selected: bool,
}

#[derive(Debug, Clone)]
struct ToggleLinks {
    weighted: bool,
    weight_href: String,
    include_ignored: bool,
    ignored_href: String,
    popularity: bool,
    sort_href: String,
    reset_href: &'static str,
}

impl ToggleLinks {
    fn new(path: &str, state: &FilterState) -> Self {
        let flip_weight = FilterState {
            weighting: match state.weighting {
                Weighting::Count => Weighting::Score,
                Weighting::Score => Weighting::Count,
            },
            ..state.clone()
        };
        let flip_ignored = FilterState {
            include_ignored: !state.include_ignored,
            ..state.clone()
        };
        let flip_sort = FilterState {
            sort: match state.sort {
                SortKey::Recency => SortKey::Popularity,
                SortKey::Popularity => SortKey::Recency,
            },
            ..state.clone()
        };
        Self {
            weighted: state.weighting == Weighting::Score,
            weight_href: href(path, &flip_weight),
            include_ignored: state.include_ignored,
            ignored_href: href(path, &flip_ignored),
            popularity: state.sort == SortKey::Popularity,
            sort_href: href(path, &flip_sort),
            reset_href: if path == "/" { "/" } else { "/comments" },
        }
    }
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    admin_mode: bool,
    total: usize,
    total_value: u64,
    ignored: usize,
    clear_pct: f64,
    codex_pct: f64,
    has_preferences: bool,
    categories: Vec<CategoryRow>,
    groups: Vec<GroupRow>,
    subgroups: Vec<FacetLink>,
    topics: Vec<FacetLink>,
    toggles: ToggleLinks,
    comments_href: String,
}

#[derive(Debug, Clone)]
struct CommentRow {
    comment_id: String,
    post_id: String,
    subreddit: String,
    url: String,
    comparison: &'static str,
    claude_code_sentiment: &'static str,
    codex_sentiment: &'static str,
    reasoning: String,
    themes: String,
    quote: String,
    score: i64,
    analyzed_at: String,
    comment_ignored: bool,
    thread_ignored: bool,
}

#[derive(Template)]
#[template(path = "comments.html")]
struct CommentsTemplate {
    admin_mode: bool,
    total: usize,
    shown: usize,
    rows: Vec<CommentRow>,
    toggles: ToggleLinks,
    back_href: String,
    dashboard_href: String,
}

#[derive(Debug, Clone)]
struct RunRow {
    timestamp: String,
    model: String,
    total_candidates: usize,
    already_analyzed: usize,
    analyzed_this_run: usize,
    errors: usize,
    time_seconds: String,
    tokens: String,
    estimated_cost: String,
    batch_size: usize,
}

#[derive(Template)]
#[template(path = "runs.html")]
struct RunsTemplate {
    admin_mode: bool,
    runs: Vec<RunRow>,
    total_cost: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/comments", get(comments_handler))
        .route("/runs", get(runs_handler))
        .route("/api/stats", get(api_stats_handler))
        .route("/ignore/comment/{id}", post(ignore_comment_handler))
        .route("/ignore/thread/{id}", post(ignore_thread_handler))
        .route("/assets/app.css", get(app_css_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, admin = state.admin_mode, "serving board");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub async fn serve_from_env(admin_override: bool) -> anyhow::Result<()> {
    let config = PipelineConfig::from_env();
    let port: u16 = std::env::var("VSBOARD_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let admin = admin_override || flag(&std::env::var("VSBOARD_ADMIN").ok());
    let state = AppState::new(config.data_dir)?.with_admin(admin);
    serve(state, port).await
}

type Loaded = (Vec<ClassificationResult>, IgnoreSet, FilterState);

async fn load_board(state: &AppState, query: &BoardQuery) -> Result<Loaded, Response> {
    let filters = query.filter_state().map_err(bad_request)?;
    let results: Vec<ClassificationResult> = JsonlStore::new(&state.paths.analysis)
        .scan_all()
        .await
        .map_err(server_error)?;
    let ignores = state.ignore_snapshot().map_err(server_error)?;
    Ok((results, ignores, filters))
}

async fn index_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BoardQuery>,
) -> Response {
    let (results, ignores, filters) = match load_board(&state, &query).await {
        Ok(loaded) => loaded,
        Err(resp) => return resp,
    };
    let summary = stats::summarize(&results, &ignores, &filters);

    let categories = summary
        .categories
        .iter()
        .map(|c| {
            let target = CategoryFilter::Category(c.comparison);
            CategoryRow {
                label: c.label,
                key: c.comparison.as_str(),
                count: c.count,
                score: c.score,
                value: c.value,
                percentage: c.percentage,
                href: href("/comments", &FilterState { category: target, ..filters.clone() }),
                selected: filters.category == target,
            }
        })
        .collect();
    let groups = summary
        .groups
        .iter()
        .map(|g| {
            let target = CategoryFilter::Group(g.group);
            GroupRow {
                label: g.label,
                value: g.value,
                percentage: g.percentage,
                href: href("/", &FilterState { category: target, ..filters.clone() }),
                selected: filters.category == target,
            }
        })
        .collect();
    let subgroups = summary
        .subgroups
        .iter()
        .map(|f| {
            let selected = filters
                .subgroup
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case(&f.name));
            let next = FilterState {
                subgroup: (!selected).then(|| f.name.clone()),
                topic: None,
                ..filters.clone()
            };
            FacetLink {
                name: f.name.clone(),
                count: f.count,
                value: f.value,
                href: href("/", &next),
                selected,
            }
        })
        .collect();
    let topics = summary
        .topics
        .iter()
        .map(|f| {
            let selected = filters.topic.as_deref() == Some(f.name.as_str());
            let next = FilterState {
                topic: (!selected).then(|| f.name.clone()),
                ..filters.clone()
            };
            FacetLink {
                name: f.name.clone(),
                count: f.count,
                value: f.value,
                href: href("/", &next),
                selected,
            }
        })
        .collect();

    let value_of = |g: PreferenceGroup| {
        summary
            .groups
            .iter()
            .find(|t| t.group == g)
            .map(|t| t.value)
            .unwrap_or(0)
    };
    let has_preferences = value_of(PreferenceGroup::ClaudeCode) + value_of(PreferenceGroup::Codex) > 0;

    render_html(IndexTemplate {
        admin_mode: state.admin_mode,
        total: summary.total,
        total_value: summary.total_value,
        ignored: summary.ignored,
        clear_pct: summary.clear_preference_pct,
        codex_pct: if has_preferences {
            100.0 - summary.clear_preference_pct
        } else {
            0.0
        },
        has_preferences,
        categories,
        groups,
        subgroups,
        topics,
        toggles: ToggleLinks::new("/", &filters),
        comments_href: href("/comments", &filters),
    })
}

async fn comments_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BoardQuery>,
) -> Response {
    let (results, ignores, filters) = match load_board(&state, &query).await {
        Ok(loaded) => loaded,
        Err(resp) => return resp,
    };
    let view = stats::filtered_view(&results, &ignores, &filters);
    let back_href = href("/comments", &filters);
    let rows = view
        .iter()
        .take(MAX_COMMENT_ROWS)
        .map(|r| CommentRow {
            comment_id: r.comment_id.clone(),
            post_id: r.post_id.clone(),
            subreddit: r.subreddit.clone(),
            url: permalink_url(&r.permalink),
            comparison: r.comparison.label(),
            claude_code_sentiment: r.claude_code_sentiment.as_str(),
            codex_sentiment: r.codex_sentiment.as_str(),
            reasoning: r.reasoning.clone(),
            themes: r.themes.join(", "),
            quote: r.quote.clone().unwrap_or_default(),
            score: r.score,
            analyzed_at: r.analyzed_at.format("%Y-%m-%d %H:%M").to_string(),
            comment_ignored: ignores.contains_comment(&r.comment_id),
            thread_ignored: ignores.contains_thread(&r.post_id),
        })
        .collect::<Vec<_>>();

    render_html(CommentsTemplate {
        admin_mode: state.admin_mode,
        total: view.len(),
        shown: rows.len(),
        rows,
        toggles: ToggleLinks::new("/comments", &filters),
        back_href,
        dashboard_href: href("/", &filters),
    })
}

async fn runs_handler(State(state): State<Arc<AppState>>) -> Response {
    let runs: Vec<RunLog> = match JsonlStore::new(&state.paths.analysis_runs).scan_all().await {
        Ok(runs) => runs,
        Err(err) => return server_error(err),
    };
    let total_cost: f64 = runs.iter().map(|r| r.estimated_cost).sum();
    let rows = runs
        .iter()
        .rev()
        .map(|r| RunRow {
            timestamp: r.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            model: r.model.clone(),
            total_candidates: r.total_candidates,
            already_analyzed: r.already_analyzed,
            analyzed_this_run: r.analyzed_this_run,
            errors: r.errors,
            time_seconds: format!("{:.1}", r.time_seconds),
            tokens: format!("{} / {}", r.input_tokens, r.output_tokens),
            estimated_cost: format!("${:.4}", r.estimated_cost),
            batch_size: r.batch_size,
        })
        .collect();
    render_html(RunsTemplate {
        admin_mode: state.admin_mode,
        runs: rows,
        total_cost: format!("${total_cost:.2}"),
    })
}

async fn api_stats_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BoardQuery>,
) -> Response {
    match load_board(&state, &query).await {
        Ok((results, ignores, filters)) => {
            Json(stats::summarize(&results, &ignores, &filters)).into_response()
        }
        Err(resp) => resp,
    }
}

#[derive(Debug, Default, Deserialize)]
struct IgnoreParams {
    next: Option<String>,
}

#[derive(Debug, Serialize)]
struct IgnoreResponse {
    id: String,
    ignored: bool,
}

#[derive(Clone, Copy)]
enum IgnoreTarget {
    Comment,
    Thread,
}

fn toggle_ignore(state: &AppState, target: IgnoreTarget, id: &str) -> anyhow::Result<bool> {
    let mut set = state
        .ignores
        .lock()
        .map_err(|_| anyhow!("ignore set lock poisoned"))?;
    match target {
        IgnoreTarget::Comment => set.toggle_comment(id, state.ignore_store.as_ref()),
        IgnoreTarget::Thread => set.toggle_thread(id, state.ignore_store.as_ref()),
    }
}

fn ignore_response(state: &AppState, target: IgnoreTarget, id: String, params: IgnoreParams) -> Response {
    if !state.admin_mode {
        return (StatusCode::NOT_FOUND, Html("Not found".to_string())).into_response();
    }
    match toggle_ignore(state, target, &id) {
        Ok(ignored) => match params.next.filter(|n| n.starts_with('/') && !n.starts_with("//")) {
            Some(next) => Redirect::to(&next).into_response(),
            None => Json(IgnoreResponse { id, ignored }).into_response(),
        },
        Err(err) => server_error(err),
    }
}

async fn ignore_comment_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
    Query(params): Query<IgnoreParams>,
) -> Response {
    ignore_response(&state, IgnoreTarget::Comment, id, params)
}

async fn ignore_thread_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
    Query(params): Query<IgnoreParams>,
) -> Response {
    ignore_response(&state, IgnoreTarget::Thread, id, params)
}

async fn app_css_handler() -> Response {
    ([(header::CONTENT_TYPE, "text/css; charset=utf-8")], APP_CSS).into_response()
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {err}")),
    )
        .into_response()
}

fn bad_request(err: vsboard_core::UnknownVariant) -> Response {
    (StatusCode::BAD_REQUEST, Html(format!("Bad request: {err}"))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use chrono::{TimeZone, Utc};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use vsboard_core::{Comparison, Sentiment};

    use crate::ignore::MemoryStore;

    fn result(id: &str, post: &str, comparison: Comparison, score: i64) -> ClassificationResult {
        ClassificationResult {
            comment_id: id.to_string(),
            post_id: post.to_string(),
            subreddit: "ClaudeAI".to_string(),
            permalink: format!("/r/ClaudeAI/comments/{post}/x/{id}/"),
            comparison,
            claude_code_sentiment: Sentiment::Positive,
            codex_sentiment: Sentiment::Negative,
            reasoning: "because".to_string(),
            themes: vec!["planning".to_string()],
            quote_worthy: true,
            quote: Some("it just plans".to_string()),
            score,
            model: "m".to_string(),
            analyzed_at: Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap(),
        }
    }

    async fn seeded(admin: bool) -> (tempfile::TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path());
        let store = JsonlStore::new(&paths.analysis);
        store.append(&result("c1", "p1", Comparison::ClaudeCodeBetter, 30)).await.unwrap();
        store.append(&result("c2", "p1", Comparison::CodexBetter, 3)).await.unwrap();
        store.append(&result("c3", "p2", Comparison::Equal, 1)).await.unwrap();
        let state = AppState::with_store(paths, Arc::new(MemoryStore::default()))
            .unwrap()
            .with_admin(admin);
        (dir, app(state))
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, String) {
        let resp = app
            .clone()
            .oneshot(axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn post(app: &Router, uri: &str) -> StatusCode {
        app.clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
            .status()
    }

    async fn stats(app: &Router, uri: &str) -> serde_json::Value {
        let (status, body) = get(app, uri).await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_str(&body).unwrap()
    }

    #[tokio::test]
    async fn handler_smoke_pages() {
        let (_dir, app) = seeded(false).await;
        let (status, body) = get(&app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Claude Code vs Codex"));
        assert!(body.contains("Preference groups"));

        let (status, body) = get(&app, "/comments?sort=popularity").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("it just plans"));
        assert!(!body.contains("Ignore thread"));

        let (status, _) = get(&app, "/runs").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn handler_smoke_css() {
        let (_dir, app) = seeded(false).await;
        let resp = app
            .oneshot(axum::http::Request::builder().uri("/assets/app.css").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            "text/css; charset=utf-8"
        );
    }

    #[tokio::test]
    async fn api_stats_applies_filters_and_weighting() {
        let (_dir, app) = seeded(false).await;
        let all = stats(&app, "/api/stats").await;
        assert_eq!(all["total"], 3);
        assert_eq!(all["clear_preference_pct"], 50.0);

        let weighted = stats(&app, "/api/stats?weighted=true").await;
        assert_eq!(weighted["total_value"], 34);
        assert_eq!(weighted["weighting"], "score");

        let codex = stats(&app, "/api/stats?category=codex_preferred").await;
        assert_eq!(codex["total"], 1);
    }

    #[tokio::test]
    async fn unknown_category_is_bad_request() {
        let (_dir, app) = seeded(false).await;
        let (status, _) = get(&app, "/api/stats?category=nope").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ignore_routes_are_hidden_outside_admin_mode() {
        let (_dir, app) = seeded(false).await;
        assert_eq!(post(&app, "/ignore/thread/p1").await, StatusCode::NOT_FOUND);
        assert_eq!(stats(&app, "/api/stats").await["total"], 3);
    }

    #[tokio::test]
    async fn ignoring_a_thread_takes_effect_on_next_request() {
        let (_dir, app) = seeded(true).await;
        assert_eq!(post(&app, "/ignore/thread/p1").await, StatusCode::OK);
        let after = stats(&app, "/api/stats").await;
        assert_eq!(after["total"], 1);
        assert_eq!(after["ignored"], 2);
        assert_eq!(stats(&app, "/api/stats?include_ignored=true").await["total"], 3);

        assert_eq!(post(&app, "/ignore/thread/p1").await, StatusCode::OK);
        assert_eq!(stats(&app, "/api/stats").await["total"], 3);
    }

    #[tokio::test]
    async fn ignore_with_next_redirects_back() {
        let (_dir, app) = seeded(true).await;
        assert_eq!(
            post(&app, "/ignore/comment/c1?next=%2Fcomments").await,
            StatusCode::SEE_OTHER
        );
        assert_eq!(stats(&app, "/api/stats").await["total"], 2);
    }
}
