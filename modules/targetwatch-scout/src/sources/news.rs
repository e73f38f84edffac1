//! NewsAPI `everything` search. One OR-query spans every target, so target
//! affiliation is resolved heuristically from the article text.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use targetwatch_common::{ScanMode, WatchTarget};

use super::{drop_known, resolve_target, CandidateItem, SourceAdapter, SourceContext, SourceOutput};
use crate::infra::retry::{send_with_retry, RetryPolicy};
use crate::infra::util::{non_blank, parse_loose_date, sanitize_url, strip_html};

const EVERYTHING_URL: &str = "https://newsapi.org/v2/everything";
/// NewsAPI rejects longer `q` values.
const MAX_QUERY_CHARS: usize = 500;

pub struct NewsApiSource {
    http: reqwest::Client,
    retry: RetryPolicy,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EverythingResponse {
    #[serde(default)]
    articles: Vec<Article>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Article {
    source: ArticleSource,
    author: Option<String>,
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    published_at: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ArticleSource {
    name: Option<String>,
}

struct Paging {
    page_size: u32,
    pages: u32,
    lookback_days: i64,
}

impl NewsApiSource {
    pub fn new(http: reqwest::Client, retry: RetryPolicy, api_key: String) -> Self {
        Self {
            http,
            retry,
            api_key,
            base_url: EVERYTHING_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn paging(mode: ScanMode) -> Paging {
        match mode {
            ScanMode::Latest => Paging {
                page_size: 20,
                pages: 1,
                lookback_days: 7,
            },
            ScanMode::Comprehensive => Paging {
                page_size: 50,
                pages: 2,
                lookback_days: 28,
            },
        }
    }

    /// `"a" OR "b" OR ...` over every target's match terms, within NewsAPI's
    /// limit. Also returns how many targets ended up with no term in the query.
    fn query(targets: &[WatchTarget], mode: ScanMode) -> (String, usize) {
        // clause -> indices of the targets it covers
        let mut clauses: Vec<(String, Vec<usize>)> = Vec::new();
        for (idx, target) in targets.iter().enumerate() {
            let terms = match mode {
                ScanMode::Comprehensive => target.match_terms(),
                ScanMode::Latest => vec![target.label().trim().to_lowercase()],
            };
            for term in terms {
                let clause = format!("\"{}\"", term.replace('"', ""));
                match clauses.iter_mut().find(|(c, _)| *c == clause) {
                    Some((_, owners)) => owners.push(idx),
                    None => clauses.push((clause, vec![idx])),
                }
            }
        }

        let mut query = String::new();
        let mut covered: HashSet<usize> = HashSet::new();
        for (clause, owners) in clauses {
            let sep = if query.is_empty() { "" } else { " OR " };
            if query.len() + sep.len() + clause.len() > MAX_QUERY_CHARS {
                break;
            }
            query.push_str(sep);
            query.push_str(&clause);
            covered.extend(owners);
        }
        (query, targets.len() - covered.len())
    }

    async fn fetch_page(&self, query: &str, paging: &Paging, page: u32) -> Result<Vec<Article>, String> {
        let from = (Utc::now() - Duration::days(paging.lookback_days))
            .format("%Y-%m-%d")
            .to_string();
        let page_size = paging.page_size.to_string();
        let page = page.to_string();

        let request = self
            .http
            .get(&self.base_url)
            .header("X-Api-Key", &self.api_key)
            .query(&[
                ("q", query),
                ("language", "en"),
                ("sortBy", "publishedAt"),
                ("searchIn", "title,description"),
                ("from", from.as_str()),
                ("pageSize", page_size.as_str()),
                ("page", page.as_str()),
            ]);

        let response = send_with_retry(request, &self.retry)
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!(
                "HTTP {}: {}",
                status.as_u16(),
                ai_client::truncate_to_char_boundary(&body, 200)
            ));
        }
        let parsed: EverythingResponse = response
            .json()
            .await
            .map_err(|e| format!("unreadable response: {e}"))?;
        Ok(parsed.articles)
    }
}

fn to_candidate(article: Article, targets: &[WatchTarget]) -> Option<CandidateItem> {
    let title = non_blank(article.title)?;
    if title == "[Removed]" {
        return None;
    }
    let url = sanitize_url(&non_blank(article.url)?);
    let description = non_blank(article.description.map(|d| strip_html(&d)));
    let content = non_blank(article.content.map(|c| strip_html(&c)));

    let haystack = format!("{title} {}", description.as_deref().unwrap_or(""));
    let target_id = resolve_target(&haystack, targets)?;

    Some(CandidateItem {
        target_id,
        external_id: url.clone(),
        url,
        title,
        abstract_text: description,
        full_text: content,
        published_at: article.published_at.as_deref().and_then(parse_loose_date),
        metadata: serde_json::json!({
            "outlet": article.source.name,
            "author": article.author,
            "affiliation": "heuristic",
        }),
    })
}

#[async_trait]
impl SourceAdapter for NewsApiSource {
    fn id(&self) -> &'static str {
        "newsapi"
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn run(&self, ctx: &SourceContext) -> SourceOutput {
        if !self.is_configured() || ctx.targets.is_empty() {
            return SourceOutput::empty();
        }

        let (query, left_out) = Self::query(&ctx.targets, ctx.mode);
        if left_out > 0 {
            warn!(
                left_out,
                targets = ctx.targets.len(),
                "NewsAPI query hit its length limit, some targets are not searched"
            );
        }
        let paging = Self::paging(ctx.mode);
        let mut items = Vec::new();
        let mut errors = Vec::new();

        for page in 1..=paging.pages {
            match self.fetch_page(&query, &paging, page).await {
                Ok(articles) => {
                    let full_page = articles.len() as u32 >= paging.page_size;
                    items.extend(articles.into_iter().filter_map(|a| to_candidate(a, &ctx.targets)));
                    if !full_page {
                        break;
                    }
                }
                Err(e) => {
                    warn!(page, error = %e, "NewsAPI search failed");
                    errors.push(format!("page {page}: {e}"));
                    break;
                }
            }
        }

        let items = drop_known(items, ctx);
        info!(items = items.len(), errors = errors.len(), "NewsAPI scan finished");
        SourceOutput::from_parts(items, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::target;

    #[test]
    fn query_spans_targets_without_repeats() {
        let mut a = target("pembrolizumab");
        a.display_name = Some("Keytruda".into());
        let mut b = target("nivolumab");
        b.aliases = vec!["Opdivo".into()];

        assert_eq!(
            NewsApiSource::query(&[a.clone(), b.clone()], ScanMode::Latest),
            (r#""keytruda" OR "nivolumab""#.to_string(), 0)
        );
        assert_eq!(
            NewsApiSource::query(&[a, b], ScanMode::Comprehensive),
            (
                r#""pembrolizumab" OR "keytruda" OR "nivolumab" OR "opdivo""#.to_string(),
                0
            )
        );
    }

    #[test]
    fn query_respects_length_limit_and_counts_left_out_targets() {
        let targets: Vec<_> = (0..100).map(|i| target(&format!("compound-{i:03}"))).collect();
        let (query, left_out) = NewsApiSource::query(&targets, ScanMode::Latest);

        assert!(query.len() <= MAX_QUERY_CHARS);
        // `"compound-000"` is 14 chars, 18 with the separator.
        let included = query.matches("compound-").count();
        assert_eq!(included, 28);
        assert_eq!(left_out, 100 - included);
    }

    #[test]
    fn shared_terms_cover_every_owner() {
        let a = target("kras g12c");
        let b = target("KRAS G12C");
        assert_eq!(NewsApiSource::query(&[a, b], ScanMode::Latest).1, 0);
    }

    #[test]
    fn articles_are_affiliated_by_text() {
        let a = target("pembrolizumab");
        let b = target("nivolumab");
        let article = Article {
            title: Some("Nivolumab combo misses endpoint".into()),
            url: Some("https://news.example.com/story?utm_source=feed".into()),
            description: Some("<p>Shares fell.</p>".into()),
            ..Default::default()
        };

        let item = to_candidate(article, &[a, b.clone()]).unwrap();
        assert_eq!(item.target_id, b.id);
        assert_eq!(item.external_id, "https://news.example.com/story");
        assert_eq!(item.abstract_text.as_deref(), Some("Shares fell."));
    }

    #[test]
    fn removed_articles_are_skipped() {
        let article = Article {
            title: Some("[Removed]".into()),
            url: Some("https://removed.com".into()),
            ..Default::default()
        };
        assert!(to_candidate(article, &[target("x")]).is_none());
    }

    #[tokio::test]
    async fn missing_key_yields_no_items() {
        let source = NewsApiSource::new(reqwest::Client::new(), RetryPolicy::default(), String::new());
        let ctx = SourceContext {
            mission: String::new(),
            targets: vec![target("x")],
            mode: ScanMode::Latest,
            existing_external_ids: Default::default(),
        };
        let out = source.run(&ctx).await;
        assert!(out.items.is_empty());
        assert!(out.error.is_none());
    }
}
