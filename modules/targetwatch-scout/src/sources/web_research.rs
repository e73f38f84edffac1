//! Agentic web research: Claude drives a `web_search` tool backed by Tavily
//! for a bounded number of steps. Every hit the tool returns becomes a
//! candidate, so the output looks exactly like a single-shot adapter's.

use std::sync::{Arc, Mutex};

use ai_client::{Claude, DynTool, StructuredOutput, Tool, ToolDefinition, ToolWrapper};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use targetwatch_common::{truncate, ScanMode, WatchTarget};

use super::{drop_known, resolve_target, CandidateItem, SourceAdapter, SourceContext, SourceOutput};
use crate::infra::retry::{send_with_retry, RetryPolicy};
use crate::infra::util::{non_blank, parse_loose_date, sanitize_url};

const TAVILY_URL: &str = "https://api.tavily.com/search";

const RESEARCH_SYSTEM: &str = "\
You are a research analyst monitoring drugs, biological targets and companies.\n\
Use the web_search tool to find recent, concrete developments that serve the \
mission below: trial starts, readouts, halts, regulatory decisions, safety \
signals, deals and notable publications.\n\
Prefer primary sources (press releases, regulators, registries, journals).\n\
Issue focused queries that name the target. Do not repeat a query.\n\
When you have searched enough, reply with one short sentence and stop.";

// --- Tavily-backed search tool ---

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WebSearchArgs {
    /// Search query; name the drug, target or company explicitly.
    pub query: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub published_date: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("search provider returned HTTP {0}")]
    Status(u16),
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    max_results: u32,
    search_depth: &'static str,
    topic: &'static str,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    published_date: Option<String>,
}

pub struct WebSearchTool {
    http: reqwest::Client,
    retry: RetryPolicy,
    api_key: String,
    endpoint: String,
    max_results: u32,
    /// Every hit returned to the model, in call order.
    hits: Arc<Mutex<Vec<SearchHit>>>,
}

#[async_trait]
impl Tool for WebSearchTool {
    const NAME: &'static str = "web_search";
    type Error = SearchError;
    type Args = WebSearchArgs;
    type Output = Vec<SearchHit>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Search the web. Returns titles, URLs and short snippets.".to_string(),
            parameters: WebSearchArgs::input_schema(),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let body = TavilyRequest {
            query: &args.query,
            max_results: self.max_results,
            search_depth: "basic",
            topic: "news",
        };
        let request = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body);

        let response = send_with_retry(request, &self.retry).await?;
        if !response.status().is_success() {
            return Err(SearchError::Status(response.status().as_u16()));
        }
        let parsed: TavilyResponse = response.json().await?;

        let hits: Vec<SearchHit> = parsed
            .results
            .into_iter()
            .map(|r| SearchHit {
                title: r.title,
                url: r.url,
                snippet: truncate(r.content.trim(), 600),
                published_date: r.published_date,
            })
            .collect();

        if let Ok(mut all) = self.hits.lock() {
            all.extend(hits.iter().cloned());
        }
        Ok(hits)
    }
}

// --- Adapter ---

pub struct WebResearchSource {
    claude: Option<Claude>,
    http: reqwest::Client,
    retry: RetryPolicy,
    tavily_api_key: String,
    tavily_url: String,
}

impl WebResearchSource {
    pub fn new(
        claude: Option<Claude>,
        http: reqwest::Client,
        retry: RetryPolicy,
        tavily_api_key: String,
    ) -> Self {
        Self {
            claude,
            http,
            retry,
            tavily_api_key,
            tavily_url: TAVILY_URL.to_string(),
        }
    }

    pub fn with_tavily_url(mut self, url: impl Into<String>) -> Self {
        self.tavily_url = url.into();
        self
    }

    fn step_budget(mode: ScanMode) -> usize {
        match mode {
            ScanMode::Latest => 4,
            ScanMode::Comprehensive => 8,
        }
    }

    fn results_per_search(mode: ScanMode) -> u32 {
        match mode {
            ScanMode::Latest => 5,
            ScanMode::Comprehensive => 8,
        }
    }

    fn prompt(ctx: &SourceContext) -> String {
        let targets = ctx
            .targets
            .iter()
            .map(|t| {
                let aliases = if t.aliases.is_empty() {
                    String::new()
                } else {
                    format!(" (also: {})", t.aliases.join(", "))
                };
                format!("- {} [{}]{aliases}", t.label(), t.kind)
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!("{}\n\nTargets:\n{targets}", ctx.mission)
    }
}

fn hits_to_candidates(hits: Vec<SearchHit>, targets: &[WatchTarget]) -> Vec<CandidateItem> {
    hits.into_iter()
        .filter_map(|hit| {
            let title = non_blank(Some(hit.title))?;
            let url = sanitize_url(&non_blank(Some(hit.url))?);
            let target_id = resolve_target(&format!("{title} {}", hit.snippet), targets)?;
            Some(CandidateItem {
                target_id,
                external_id: url.clone(),
                url,
                title,
                abstract_text: non_blank(Some(hit.snippet)),
                full_text: None,
                published_at: hit.published_date.as_deref().and_then(parse_loose_date),
                metadata: serde_json::json!({ "found_via": "web_research", "affiliation": "heuristic" }),
            })
        })
        .collect()
}

#[async_trait]
impl SourceAdapter for WebResearchSource {
    fn id(&self) -> &'static str {
        "web_research"
    }

    fn is_configured(&self) -> bool {
        self.claude.is_some() && !self.tavily_api_key.is_empty()
    }

    async fn run(&self, ctx: &SourceContext) -> SourceOutput {
        let Some(claude) = self.claude.as_ref().filter(|_| self.is_configured()) else {
            return SourceOutput::empty();
        };
        if ctx.targets.is_empty() {
            return SourceOutput::empty();
        }

        let hits = Arc::new(Mutex::new(Vec::new()));
        let tool = WebSearchTool {
            http: self.http.clone(),
            retry: self.retry.clone(),
            api_key: self.tavily_api_key.clone(),
            endpoint: self.tavily_url.clone(),
            max_results: Self::results_per_search(ctx.mode),
            hits: hits.clone(),
        };
        let tools: Vec<Arc<dyn DynTool>> = vec![Arc::new(ToolWrapper(tool))];

        let mut errors = Vec::new();
        match claude
            .run_tools(RESEARCH_SYSTEM, Self::prompt(ctx), &tools, Self::step_budget(ctx.mode))
            .await
        {
            Ok(transcript) => {
                let failed = transcript.tool_calls.iter().filter(|c| !c.ok).count();
                info!(
                    steps = transcript.steps,
                    tool_calls = transcript.tool_calls.len(),
                    failed_calls = failed,
                    exhausted = transcript.exhausted,
                    "Web research finished"
                );
                if failed > 0 && failed == transcript.tool_calls.len() {
                    errors.push(format!("all {failed} searches failed"));
                }
            }
            Err(e) => {
                warn!(error = %e, transient = e.is_transient(), "Web research agent failed");
                errors.push(e.to_string());
            }
        }

        let collected = hits.lock().map(|h| h.clone()).unwrap_or_default();
        let items = drop_known(hits_to_candidates(collected, &ctx.targets), ctx);
        SourceOutput::from_parts(items, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::target;

    #[test]
    fn search_hits_become_candidates() {
        let a = target("sotorasib");
        let b = target("adagrasib");
        let hits = vec![
            SearchHit {
                title: "Adagrasib gets EU nod".into(),
                url: "https://example.com/a?utm_source=x".into(),
                snippet: "Approval in CRC.".into(),
                published_date: Some("2026-03-01".into()),
            },
            SearchHit {
                title: " ".into(),
                url: "https://example.com/b".into(),
                snippet: String::new(),
                published_date: None,
            },
        ];

        let items = hits_to_candidates(hits, &[a, b.clone()]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].target_id, b.id);
        assert_eq!(items[0].external_id, "https://example.com/a");
        assert!(items[0].published_at.is_some());
    }

    #[test]
    fn comprehensive_mode_gets_larger_budget() {
        assert!(
            WebResearchSource::step_budget(ScanMode::Comprehensive)
                > WebResearchSource::step_budget(ScanMode::Latest)
        );
    }

    #[test]
    fn tool_schema_requires_query() {
        let schema = WebSearchArgs::input_schema();
        assert_eq!(schema["required"], serde_json::json!(["query"]));
    }

    #[tokio::test]
    async fn unconfigured_source_is_a_no_op() {
        let source = WebResearchSource::new(
            None,
            reqwest::Client::new(),
            RetryPolicy::default(),
            "tvly-key".into(),
        );
        assert!(!source.is_configured());
        let ctx = SourceContext {
            mission: "m".into(),
            targets: vec![target("x")],
            mode: ScanMode::Latest,
            existing_external_ids: Default::default(),
        };
        let out = source.run(&ctx).await;
        assert!(out.items.is_empty() && out.error.is_none());
    }
}
