//! `RedditSource::fetch_thread` against a local stand-in for the Reddit JSON API:
//! more-children stubs, continue-this-thread stubs, and a failing expansion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use vsboard_adapters::{RedditSource, SourceError, ThreadSource};
use vsboard_storage::{BackoffPolicy, FetchError, HttpClientConfig, HttpFetcher};

type Chunks = Arc<Mutex<Vec<usize>>>;

fn comment(id: &str, parent: &str, replies: Value) -> Value {
    json!({
        "kind": "t1",
        "data": {
            "id": id,
            "parent_id": parent,
            "body": format!("body of {id}"),
            "score": 2,
            "author": "someone",
            "created_utc": 1_756_000_000.0,
            "replies": replies
        }
    })
}

fn listing(children: Vec<Value>) -> Value {
    json!({"kind": "Listing", "data": {"after": null, "children": children}})
}

fn post(id: &str) -> Value {
    listing(vec![json!({
        "kind": "t3",
        "data": {"id": id, "subreddit": "ClaudeAI", "title": "Claude Code vs Codex", "permalink": format!("/r/ClaudeAI/comments/{id}/x/")}
    })])
}

fn hidden_ids() -> Vec<String> {
    (0..150).map(|i| format!("m{i}")).collect()
}

async fn thread(Path(file): Path<String>) -> Response {
    match file.as_str() {
        "p1.json" => Json(json!([
            post("p1"),
            listing(vec![comment(
                "a",
                "t3_p1",
                listing(vec![
                    comment(
                        "b",
                        "t1_a",
                        listing(vec![json!({"kind": "more", "data": {"parent_id": "t1_b", "children": []}})]),
                    ),
                    json!({"kind": "more", "data": {"parent_id": "t1_a", "children": hidden_ids()}}),
                ]),
            )]),
        ]))
        .into_response(),
        "p2.json" => Json(json!([
            post("p2"),
            listing(vec![comment(
                "c",
                "t3_p2",
                listing(vec![json!({"kind": "more", "data": {"parent_id": "t1_c", "children": []}})]),
            )]),
        ]))
        .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn subthread(Path((thread_id, file)): Path<(String, String)>) -> Response {
    if thread_id == "p1" && file == "b.json" {
        Json(json!([
            post("p1"),
            listing(vec![comment("b", "t1_a", listing(vec![comment("z", "t1_b", json!(""))]))]),
        ]))
        .into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn more_children(
    State(chunks): State<Chunks>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let ids: Vec<&str> = params
        .get("children")
        .map(|c| c.split(',').collect())
        .unwrap_or_default();
    chunks.lock().unwrap().push(ids.len());
    let things: Vec<Value> = ids.iter().map(|id| comment(id, "t1_a", json!(""))).collect();
    Json(json!({"json": {"errors": [], "data": {"things": things}}}))
}

async fn source() -> (RedditSource, Chunks) {
    let chunks: Chunks = Arc::default();
    let app = Router::new()
        .route("/comments/{file}", get(thread))
        .route("/comments/{thread}/_/{file}", get(subthread))
        .route("/api/morechildren.json", get(more_children))
        .with_state(Arc::clone(&chunks));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let http = HttpFetcher::new(HttpClientConfig {
        backoff: BackoffPolicy::none(),
        ..Default::default()
    })
    .unwrap();
    let source = RedditSource::new(http)
        .with_base_url(format!("http://{addr}"))
        .with_expand_delay(Duration::ZERO);
    (source, chunks)
}

#[tokio::test]
async fn stubs_expand_until_the_tree_is_complete() {
    let (source, chunks) = source().await;
    let thread = source.fetch_thread("p1").await.unwrap();

    assert_eq!(thread.post.id, "p1");
    assert_eq!(thread.replies.len(), 1);
    let a = &thread.replies[0];
    assert_eq!(a.id, "a");
    assert_eq!(a.replies.len(), 151);
    assert_eq!(a.replies[0].id, "b");
    assert_eq!(a.replies[1].id, "m0");
    assert_eq!(a.replies[150].id, "m149");

    let b = &a.replies[0];
    assert_eq!(b.replies.len(), 1);
    assert_eq!(b.replies[0].id, "z");
    assert_eq!(b.replies[0].parent_ref, "t1_b");

    assert_eq!(*chunks.lock().unwrap(), vec![100, 50]);
}

#[tokio::test]
async fn failed_expansion_fails_the_thread() {
    let (source, _) = source().await;
    let err = source.fetch_thread("p2").await.unwrap_err();
    assert!(matches!(
        err,
        SourceError::Fetch(FetchError::HttpStatus { status: 404, .. })
    ));
}
