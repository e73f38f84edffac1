//! Source adapters: one implementation per upstream provider, looked up by id.
//!
//! The orchestrator only ever sees [`SourceAdapter`]; whether an adapter makes
//! one HTTP call or runs a multi-step agent is its own business.

pub mod clinical_trials;
pub mod news;
pub mod pubmed;
pub mod web_research;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ai_client::Claude;
use targetwatch_common::{mentions_any, Config, ScanMode, TargetWatchError, WatchTarget};

use crate::infra::retry::RetryPolicy;

pub use clinical_trials::ClinicalTrialsSource;
pub use news::NewsApiSource;
pub use pubmed::PubMedSource;
pub use web_research::WebResearchSource;

/// One piece of evidence returned by a source, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub target_id: Uuid,
    pub external_id: String,
    pub title: String,
    pub url: String,
    pub abstract_text: Option<String>,
    pub full_text: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

impl CandidateItem {
    pub fn has_text(&self) -> bool {
        [&self.abstract_text, &self.full_text]
            .iter()
            .any(|t| t.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }

    /// Abstract, else full text, else empty.
    pub fn snippet(&self) -> &str {
        self.abstract_text
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.full_text.as_deref())
            .unwrap_or("")
    }
}

/// Everything an adapter needs for one scan.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub mission: String,
    pub targets: Vec<WatchTarget>,
    pub mode: ScanMode,
    /// External ids this source has already stored.
    pub existing_external_ids: HashSet<String>,
}

impl SourceContext {
    pub fn is_known(&self, external_id: &str) -> bool {
        self.existing_external_ids.contains(external_id)
    }
}

/// Items collected plus an error when the source gave up part-way.
#[derive(Debug, Clone, Default)]
pub struct SourceOutput {
    pub items: Vec<CandidateItem>,
    pub error: Option<String>,
}

impl SourceOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_parts(items: Vec<CandidateItem>, errors: Vec<String>) -> Self {
        Self {
            items,
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable identifier stored on RawItem and SourceStatus rows.
    fn id(&self) -> &'static str;

    /// Whether the credentials this adapter needs are present.
    fn is_configured(&self) -> bool;

    /// Fetch candidates. Unconfigured adapters return nothing; failures after
    /// partial progress return the partial items with `error` set.
    async fn run(&self, ctx: &SourceContext) -> SourceOutput;
}

/// Pick the target a result belongs to when the provider doesn't say.
///
/// First target whose name, display name or alias appears in `text` wins;
/// otherwise the first target. Heuristic only.
pub fn resolve_target(text: &str, targets: &[WatchTarget]) -> Option<Uuid> {
    targets
        .iter()
        .find(|t| mentions_any(text, &t.match_terms()))
        .or_else(|| targets.first())
        .map(|t| t.id)
}

/// Drop already-stored and repeated external ids, keeping first occurrences.
pub fn drop_known(items: Vec<CandidateItem>, ctx: &SourceContext) -> Vec<CandidateItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|i| !ctx.is_known(&i.external_id) && seen.insert(i.external_id.clone()))
        .collect()
}

/// Adapters keyed by id.
#[derive(Default, Clone)]
pub struct SourceRegistry {
    adapters: BTreeMap<&'static str, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.id(), adapter);
    }

    /// All four production adapters, configured from env-driven settings.
    pub fn from_config(config: &Config, http: reqwest::Client) -> Self {
        let retry = RetryPolicy::default();
        let claude = (!config.anthropic_api_key.is_empty()).then(|| {
            Claude::new(&config.anthropic_api_key, &config.anthropic_model)
                .with_timeout(config.http_timeout() * 3)
        });

        Self::new()
            .with(Arc::new(ClinicalTrialsSource::new(http.clone(), retry.clone())))
            .with(Arc::new(PubMedSource::new(
                http.clone(),
                retry.clone(),
                Some(config.ncbi_api_key.clone()).filter(|k| !k.is_empty()),
            )))
            .with(Arc::new(NewsApiSource::new(
                http.clone(),
                retry.clone(),
                config.news_api_key.clone(),
            )))
            .with(Arc::new(WebResearchSource::new(
                claude,
                http,
                retry,
                config.tavily_api_key.clone(),
            )))
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.adapters.keys().copied().collect()
    }

    /// Adapters for `names`, or all of them when `names` is `None`.
    ///
    /// Unknown names are a validation error.
    pub fn select(
        &self,
        names: Option<&[String]>,
    ) -> Result<Vec<Arc<dyn SourceAdapter>>, TargetWatchError> {
        let Some(names) = names else {
            return Ok(self.adapters.values().cloned().collect());
        };

        let mut selected: Vec<Arc<dyn SourceAdapter>> = Vec::new();
        for name in names {
            let adapter = self.adapters.get(name.trim()).ok_or_else(|| {
                TargetWatchError::Validation(format!(
                    "unknown source {name:?}; expected one of {}",
                    self.ids().join(", ")
                ))
            })?;
            if !selected.iter().any(|a| a.id() == adapter.id()) {
                selected.push(adapter.clone());
            }
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{target, MockSource};

    #[test]
    fn resolve_target_prefers_first_matching_target() {
        let a = target("nivolumab");
        let mut b = target("pembrolizumab");
        b.aliases = vec!["Keytruda".into()];

        assert_eq!(
            resolve_target("Keytruda label expanded", &[a.clone(), b.clone()]),
            Some(b.id)
        );
        assert_eq!(resolve_target("unrelated", &[a.clone(), b]), Some(a.id));
        assert_eq!(resolve_target("anything", &[]), None);
    }

    #[test]
    fn drop_known_removes_stored_and_repeated_ids() {
        let t = target("sotorasib");
        let ctx = SourceContext {
            mission: String::new(),
            targets: vec![t.clone()],
            mode: ScanMode::Latest,
            existing_external_ids: ["1".to_string()].into_iter().collect(),
        };
        let items = ["1", "2", "2", "3"]
            .iter()
            .map(|id| crate::testing::candidate(t.id, id, "title"))
            .collect();

        let kept: Vec<String> = drop_known(items, &ctx)
            .into_iter()
            .map(|i| i.external_id)
            .collect();
        assert_eq!(kept, vec!["2", "3"]);
    }

    #[test]
    fn select_rejects_unknown_sources() {
        let registry = SourceRegistry::new()
            .with(Arc::new(MockSource::new("pubmed")))
            .with(Arc::new(MockSource::new("newsapi")));

        assert_eq!(registry.select(None).unwrap().len(), 2);
        let picked = registry
            .select(Some(&["pubmed".to_string(), "pubmed".to_string()]))
            .unwrap();
        assert_eq!(picked.len(), 1);

        let err = registry
            .select(Some(&["twitter".to_string()]))
            .err()
            .unwrap();
        assert!(matches!(err, TargetWatchError::Validation(_)));
    }
}
