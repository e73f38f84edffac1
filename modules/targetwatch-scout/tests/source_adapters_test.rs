//! Source adapters against local stand-ins for their upstream APIs.
//!
//! One axum app serves every fake provider under its own path prefix and
//! records the requests it sees, so tests can assert on what went over the
//! wire as well as on what the adapter returned.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use ai_client::Claude;
use targetwatch_common::{ScanMode, WatchTarget};
use targetwatch_scout::infra::retry::RetryPolicy;
use targetwatch_scout::sources::{
    ClinicalTrialsSource, NewsApiSource, PubMedSource, WebResearchSource,
};
use targetwatch_scout::testing::target;
use targetwatch_scout::{SourceAdapter, SourceContext};

struct Seen {
    path: &'static str,
    query: HashMap<String, String>,
    headers: HeaderMap,
}

#[derive(Default)]
struct Upstream {
    seen: Mutex<Vec<Seen>>,
}

impl Upstream {
    fn record(&self, path: &'static str, query: HashMap<String, String>, headers: HeaderMap) -> usize {
        let mut seen = self.seen.lock().unwrap();
        seen.push(Seen {
            path,
            query,
            headers,
        });
        seen.iter().filter(|s| s.path == path).count() - 1
    }

    fn requests(&self, path: &str) -> Vec<HashMap<String, String>> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.path == path)
            .map(|s| s.query.clone())
            .collect()
    }

    fn header(&self, path: &str, name: &str) -> Option<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.path == path)
            .and_then(|s| s.headers.get(name))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

type Shared = Arc<Upstream>;
type Params = Query<HashMap<String, String>>;

// ---------------------------------------------------------------------------
// Fake providers
// ---------------------------------------------------------------------------

/// Finds two papers for sotorasib and is overloaded for everything else.
async fn esearch(State(up): State<Shared>, Query(q): Params, headers: HeaderMap) -> Response {
    let term = q.get("term").cloned().unwrap_or_default();
    up.record("esearch", q, headers);
    if !term.contains("sotorasib") {
        return (StatusCode::SERVICE_UNAVAILABLE, "try later").into_response();
    }
    Json(json!({ "esearchresult": { "idlist": ["101", "102"] } })).into_response()
}

async fn esummary(State(up): State<Shared>, Query(q): Params, headers: HeaderMap) -> Response {
    let ids: Vec<String> = q
        .get("id")
        .map(|ids| ids.split(',').map(str::to_string).collect())
        .unwrap_or_default();
    up.record("esummary", q, headers);

    let mut result = serde_json::Map::new();
    result.insert("uids".into(), json!(ids));
    for id in &ids {
        result.insert(
            id.clone(),
            json!({ "title": format!("Sotorasib paper {id}"), "sortpubdate": "2026/09/01 00:00" }),
        );
    }
    Json(json!({ "result": result })).into_response()
}

/// Serves a full first page and fails on the second.
async fn everything(State(up): State<Shared>, Query(q): Params, headers: HeaderMap) -> Response {
    let page = q.get("page").cloned().unwrap_or_default();
    let page_size: usize = q.get("pageSize").and_then(|s| s.parse().ok()).unwrap_or(0);
    up.record("news", q, headers);
    if page != "1" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response();
    }
    let articles: Vec<Value> = (0..page_size)
        .map(|i| {
            json!({
                "source": { "name": "Wire" },
                "title": format!("Sotorasib update {i}"),
                "description": "KRAS G12C news.",
                "url": format!("https://news.example/{i}"),
                "publishedAt": "2026-10-01T08:00:00Z"
            })
        })
        .collect();
    Json(json!({ "status": "ok", "articles": articles })).into_response()
}

async fn studies(State(up): State<Shared>, Query(q): Params, headers: HeaderMap) -> Response {
    let term = q.get("query.term").cloned().unwrap_or_default();
    let n = up.record("ctgov", q, headers);
    Json(json!({
        "studies": [{
            "protocolSection": {
                "identificationModule": {
                    "nctId": format!("NCT0000000{n}"),
                    "briefTitle": format!("A study of {term}")
                }
            }
        }]
    }))
    .into_response()
}

/// A model that never stops searching.
async fn messages(State(up): State<Shared>, headers: HeaderMap, Json(_): Json<Value>) -> Response {
    let n = up.record("messages", HashMap::new(), headers);
    Json(json!({
        "content": [{
            "type": "tool_use",
            "id": format!("tu_{n}"),
            "name": "web_search",
            "input": { "query": format!("sotorasib news {n}") }
        }],
        "stop_reason": "tool_use",
        "usage": { "input_tokens": 20, "output_tokens": 8 }
    }))
    .into_response()
}

async fn tavily(State(up): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let query = body["query"].as_str().unwrap_or_default().to_string();
    let n = up.record("tavily", HashMap::from([("query".to_string(), query)]), headers);
    Json(json!({
        "results": [{
            "title": format!("Sotorasib result {n}"),
            "url": format!("https://web.example/{n}?utm_source=feed"),
            "content": "Lumakras label update.",
            "published_date": "2026-10-02"
        }]
    }))
    .into_response()
}

async fn serve(up: &Shared) -> String {
    let app = Router::new()
        .route("/eutils/esearch.fcgi", get(esearch))
        .route("/eutils/esummary.fcgi", get(esummary))
        .route("/news", get(everything))
        .route("/ctgov", get(studies))
        .route("/anthropic/messages", post(messages))
        .route("/tavily", post(tavily))
        .with_state(up.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_throttle_retries: 1,
        max_server_error_retries: 1,
        initial_delay: Duration::from_millis(5),
        max_retry_after: Duration::from_millis(50),
    }
}

fn ctx(targets: Vec<WatchTarget>, mode: ScanMode) -> SourceContext {
    SourceContext {
        mission: "Track KRAS inhibitors".into(),
        targets,
        mode,
        existing_external_ids: Default::default(),
    }
}

// ---------------------------------------------------------------------------
// PubMed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pubmed_keeps_results_when_one_target_search_fails() {
    let up = Shared::default();
    let base = serve(&up).await;
    let source = PubMedSource::new(reqwest::Client::new(), fast_retry(), None)
        .with_base_url(format!("{base}/eutils"));

    let sotorasib = target("sotorasib");
    let mut scan = ctx(vec![sotorasib.clone(), target("adagrasib")], ScanMode::Latest);
    scan.existing_external_ids.insert("102".into());
    let out = source.run(&scan).await;

    assert_eq!(out.items.len(), 1);
    assert_eq!(out.items[0].external_id, "101");
    assert_eq!(out.items[0].target_id, sotorasib.id);
    assert_eq!(out.items[0].title, "Sotorasib paper 101");

    let error = out.error.expect("partial failure is reported");
    assert!(error.contains("503"), "{error}");
    assert!(error.contains("adagrasib"), "{error}");

    // Known PMIDs are never summarized.
    let summaries = up.requests("esummary");
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0]["id"], "101");
    // 503 is retried once before the target is given up on.
    assert_eq!(up.requests("esearch").len(), 3);
}

#[tokio::test]
async fn pubmed_search_window_follows_scan_mode() {
    let up = Shared::default();
    let base = serve(&up).await;
    let source = PubMedSource::new(reqwest::Client::new(), fast_retry(), Some("ncbi-key".into()))
        .with_base_url(format!("{base}/eutils"));

    source.run(&ctx(vec![target("sotorasib")], ScanMode::Latest)).await;
    source.run(&ctx(vec![target("sotorasib")], ScanMode::Comprehensive)).await;

    let searches = up.requests("esearch");
    assert_eq!(searches.len(), 2);
    assert_eq!(searches[0]["retmax"], "10");
    assert_eq!(searches[0]["reldate"], "30");
    assert_eq!(searches[1]["retmax"], "40");
    assert!(!searches[1].contains_key("reldate"));
    assert!(searches.iter().all(|q| q["api_key"] == "ncbi-key"));
}

// ---------------------------------------------------------------------------
// NewsAPI
// ---------------------------------------------------------------------------

#[tokio::test]
async fn news_keeps_first_page_when_second_page_fails() {
    let up = Shared::default();
    let base = serve(&up).await;
    let source = NewsApiSource::new(reqwest::Client::new(), fast_retry(), "news-key".into())
        .with_base_url(format!("{base}/news"));

    let out = source
        .run(&ctx(vec![target("sotorasib")], ScanMode::Comprehensive))
        .await;

    assert_eq!(out.items.len(), 50);
    let error = out.error.expect("second page failure is reported");
    assert!(error.starts_with("page 2:"), "{error}");
    assert!(error.contains("500"), "{error}");

    let pages = up.requests("news");
    assert_eq!(pages[0]["pageSize"], "50");
    assert_eq!(pages[0]["page"], "1");
    assert!(pages[1..].iter().all(|q| q["page"] == "2"));
    assert_eq!(up.header("news", "x-api-key").as_deref(), Some("news-key"));
}

#[tokio::test]
async fn news_latest_scan_reads_a_single_smaller_page() {
    let up = Shared::default();
    let base = serve(&up).await;
    let source = NewsApiSource::new(reqwest::Client::new(), fast_retry(), "news-key".into())
        .with_base_url(format!("{base}/news"));

    let out = source.run(&ctx(vec![target("sotorasib")], ScanMode::Latest)).await;

    assert_eq!(out.items.len(), 20);
    assert!(out.error.is_none());
    let pages = up.requests("news");
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0]["pageSize"], "20");
    assert_eq!(pages[0]["q"], r#""sotorasib""#);
}

// ---------------------------------------------------------------------------
// ClinicalTrials.gov
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clinical_trials_comprehensive_scan_searches_aliases_with_larger_pages() {
    let up = Shared::default();
    let base = serve(&up).await;
    let source = ClinicalTrialsSource::new(reqwest::Client::new(), fast_retry())
        .with_base_url(format!("{base}/ctgov"));

    let mut t = target("sotorasib");
    t.display_name = Some("Lumakras".into());
    t.aliases = vec!["AMG 510".into()];

    let latest = source.run(&ctx(vec![t.clone()], ScanMode::Latest)).await;
    let full = source.run(&ctx(vec![t], ScanMode::Comprehensive)).await;

    assert_eq!(latest.items.len(), 1);
    assert_eq!(full.items.len(), 3);

    let searches = up.requests("ctgov");
    let terms: Vec<&str> = searches.iter().map(|q| q["query.term"].as_str()).collect();
    assert_eq!(terms, vec!["sotorasib", "sotorasib", "Lumakras", "AMG 510"]);
    assert_eq!(searches[0]["pageSize"], "10");
    assert!(searches[1..].iter().all(|q| q["pageSize"] == "50"));
}

// ---------------------------------------------------------------------------
// Web research
// ---------------------------------------------------------------------------

#[tokio::test]
async fn web_research_stops_at_step_budget_and_keeps_every_hit() {
    let up = Shared::default();
    let base = serve(&up).await;
    let claude = Claude::new("sk-ant-test", "claude-test")
        .with_base_url(format!("{base}/anthropic"))
        .with_retry(fast_retry());
    let source = WebResearchSource::new(
        Some(claude),
        reqwest::Client::new(),
        fast_retry(),
        "tvly-key".into(),
    )
    .with_tavily_url(format!("{base}/tavily"));
    assert!(source.is_configured());

    let sotorasib = target("sotorasib");
    let out = source
        .run(&ctx(vec![target("adagrasib"), sotorasib.clone()], ScanMode::Latest))
        .await;

    // The model never answers, so the loop runs its four latest-mode steps.
    assert_eq!(up.requests("messages").len(), 4);
    let searches = up.requests("tavily");
    assert_eq!(searches.len(), 4);
    assert_eq!(searches[3]["query"], "sotorasib news 3");
    assert_eq!(up.header("tavily", "authorization").as_deref(), Some("Bearer tvly-key"));

    assert!(out.error.is_none());
    assert_eq!(out.items.len(), 4);
    assert!(out.items.iter().all(|i| i.target_id == sotorasib.id));
    assert_eq!(out.items[0].external_id, "https://web.example/0");
    assert_eq!(out.items[0].metadata["found_via"], "web_research");
}
