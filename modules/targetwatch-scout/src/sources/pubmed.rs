//! PubMed via NCBI E-utilities: esearch for PMIDs, then esummary for metadata.
//! An API key is optional; it only raises NCBI's rate limit.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use targetwatch_common::{ScanMode, WatchTarget};

use super::{drop_known, CandidateItem, SourceAdapter, SourceContext, SourceOutput};
use crate::infra::retry::{send_with_retry, RetryPolicy};
use crate::infra::util::{non_blank, parse_loose_date};

const EUTILS_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const LATEST_WINDOW_DAYS: u32 = 30;

pub struct PubMedSource {
    http: reqwest::Client,
    retry: RetryPolicy,
    api_key: Option<String>,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    esearchresult: SearchResult,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResult {
    #[serde(default)]
    idlist: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    result: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ArticleSummary {
    title: String,
    fulljournalname: Option<String>,
    pubdate: Option<String>,
    sortpubdate: Option<String>,
    authors: Vec<Author>,
    pubtype: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Author {
    name: String,
}

impl PubMedSource {
    pub fn new(http: reqwest::Client, retry: RetryPolicy, api_key: Option<String>) -> Self {
        Self {
            http,
            retry,
            api_key,
            base_url: EUTILS_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn retmax(mode: ScanMode) -> u32 {
        match mode {
            ScanMode::Latest => 10,
            ScanMode::Comprehensive => 40,
        }
    }

    /// `("a"[tiab] OR "b"[tiab])`; aliases only in comprehensive mode.
    fn term(target: &WatchTarget, mode: ScanMode) -> String {
        let terms = match mode {
            ScanMode::Comprehensive => target.match_terms(),
            ScanMode::Latest => {
                let mut t = vec![target.name.trim().to_lowercase()];
                if let Some(d) = target.display_name.as_deref().map(|d| d.trim().to_lowercase()) {
                    if !d.is_empty() && !t.contains(&d) {
                        t.push(d);
                    }
                }
                t
            }
        };
        let clauses: Vec<String> = terms
            .iter()
            .map(|t| format!("\"{}\"[tiab]", t.replace('"', "")))
            .collect();
        format!("({})", clauses.join(" OR "))
    }

    fn with_key(&self, mut params: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    async fn esearch(&self, target: &WatchTarget, mode: ScanMode) -> Result<Vec<String>, String> {
        let mut params = vec![
            ("db", "pubmed".to_string()),
            ("term", Self::term(target, mode)),
            ("retmax", Self::retmax(mode).to_string()),
            ("retmode", "json".to_string()),
            ("sort", "pub_date".to_string()),
        ];
        if mode == ScanMode::Latest {
            params.push(("datetype", "pdat".to_string()));
            params.push(("reldate", LATEST_WINDOW_DAYS.to_string()));
        }

        let request = self
            .http
            .get(format!("{}/esearch.fcgi", self.base_url))
            .query(&self.with_key(params));
        let response = send_with_retry(request, &self.retry)
            .await
            .map_err(|e| format!("esearch for {} failed: {e}", target.label()))?;
        if !response.status().is_success() {
            return Err(format!(
                "esearch HTTP {} for {}",
                response.status().as_u16(),
                target.label()
            ));
        }
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| format!("unreadable esearch response: {e}"))?;
        Ok(parsed.esearchresult.idlist)
    }

    async fn esummary(&self, pmids: &[String]) -> Result<Vec<(String, ArticleSummary)>, String> {
        let params = vec![
            ("db", "pubmed".to_string()),
            ("id", pmids.join(",")),
            ("retmode", "json".to_string()),
        ];
        let request = self
            .http
            .get(format!("{}/esummary.fcgi", self.base_url))
            .query(&self.with_key(params));
        let response = send_with_retry(request, &self.retry)
            .await
            .map_err(|e| format!("esummary failed: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("esummary HTTP {}", response.status().as_u16()));
        }
        let parsed: SummaryResponse = response
            .json()
            .await
            .map_err(|e| format!("unreadable esummary response: {e}"))?;
        Ok(summaries_in_order(parsed, pmids))
    }
}

/// Pull per-PMID summaries out of the `result` map, in request order.
fn summaries_in_order(parsed: SummaryResponse, pmids: &[String]) -> Vec<(String, ArticleSummary)> {
    let mut result = parsed.result;
    pmids
        .iter()
        .filter_map(|id| {
            let value = result.remove(id)?;
            serde_json::from_value::<ArticleSummary>(value)
                .ok()
                .map(|s| (id.clone(), s))
        })
        .collect()
}

fn to_candidate(pmid: String, summary: ArticleSummary, target: &WatchTarget) -> Option<CandidateItem> {
    let title = non_blank(Some(summary.title))?;
    let published_at = summary
        .sortpubdate
        .as_deref()
        .and_then(parse_loose_date)
        .or_else(|| summary.pubdate.as_deref().and_then(parse_loose_date));
    let authors: Vec<String> = summary.authors.into_iter().map(|a| a.name).take(6).collect();

    Some(CandidateItem {
        target_id: target.id,
        url: format!("https://pubmed.ncbi.nlm.nih.gov/{pmid}/"),
        title,
        abstract_text: None,
        full_text: None,
        published_at,
        metadata: serde_json::json!({
            "journal": summary.fulljournalname,
            "pubdate": summary.pubdate,
            "authors": authors,
            "publication_types": summary.pubtype,
        }),
        external_id: pmid,
    })
}

#[async_trait]
impl SourceAdapter for PubMedSource {
    fn id(&self) -> &'static str {
        "pubmed"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &SourceContext) -> SourceOutput {
        let mut items = Vec::new();
        let mut errors = Vec::new();

        for target in &ctx.targets {
            let pmids = match self.esearch(target, ctx.mode).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(target = target.label(), error = %e, "PubMed search failed");
                    errors.push(e);
                    continue;
                }
            };

            let unseen: Vec<String> = pmids.into_iter().filter(|id| !ctx.is_known(id)).collect();
            if unseen.is_empty() {
                continue;
            }

            match self.esummary(&unseen).await {
                Ok(summaries) => items.extend(
                    summaries
                        .into_iter()
                        .filter_map(|(id, s)| to_candidate(id, s, target)),
                ),
                Err(e) => {
                    warn!(target = target.label(), error = %e, "PubMed summary failed");
                    errors.push(e);
                }
            }
        }

        let items = drop_known(items, ctx);
        info!(items = items.len(), errors = errors.len(), "PubMed scan finished");
        SourceOutput::from_parts(items, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::target;

    #[test]
    fn latest_term_uses_name_and_display_name_only() {
        let mut t = target("sotorasib");
        t.display_name = Some("Lumakras".into());
        t.aliases = vec!["AMG 510".into()];

        assert_eq!(
            PubMedSource::term(&t, ScanMode::Latest),
            r#"("sotorasib"[tiab] OR "lumakras"[tiab])"#
        );
        assert_eq!(
            PubMedSource::term(&t, ScanMode::Comprehensive),
            r#"("sotorasib"[tiab] OR "lumakras"[tiab] OR "amg 510"[tiab])"#
        );
    }

    #[test]
    fn esummary_results_follow_request_order() {
        let parsed: SummaryResponse = serde_json::from_value(serde_json::json!({
            "result": {
                "uids": ["2", "1"],
                "1": {"title": "First", "sortpubdate": "2026/01/05 00:00"},
                "2": {"title": "Second", "authors": [{"name": "Doe J"}]}
            }
        }))
        .unwrap();

        let out = summaries_in_order(parsed, &["1".to_string(), "2".to_string(), "3".to_string()]);
        let ids: Vec<&str> = out.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);

        let t = target("x");
        let (id, summary) = out.into_iter().next().unwrap();
        let item = to_candidate(id, summary, &t).unwrap();
        assert_eq!(item.url, "https://pubmed.ncbi.nlm.nih.gov/1/");
        assert!(item.published_at.is_some());
        assert!(!item.has_text());
    }
}
