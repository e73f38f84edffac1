//! Model-written digest: an executive summary plus grouped entries that point
//! back at the input items by index. Any failure, or a reply that references
//! no valid item, falls back to the deterministic strategy. Items the model
//! did not cite (including everything past the prompt cap) get a
//! deterministic entry each, so every new item lands in the digest.

use std::collections::{BTreeSet, HashMap};

use ai_client::Claude;
use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use targetwatch_common::{
    truncate, DigestCategory, RawItem, Significance, SourceReference, WatchTarget,
};

use super::deterministic::{entry_for, DeterministicStrategy};
use super::{DigestDraft, DigestStrategy, DraftEntry};

const EXCERPT_CHARS: usize = 500;
const MAX_ITEMS: usize = 80;

const DIGEST_SYSTEM: &str = "\
You write a competitive-intelligence digest for a life-sciences team.\n\
Input: numbered items (index in brackets) found for the monitored targets, and \
each target's monitoring goal.\n\
1. executive_summary: 2-3 sentences on what matters most in this period.\n\
2. entries: group items that report the same development into one entry. For each entry give \
a headline, a 1-3 sentence synthesis that adds information beyond the headline, a category \
(clinical, regulatory, research, commercial, news, other), a significance (critical, high, \
medium, low), an optional strategic_implication for the team, and item_indices listing the \
bracketed indices it draws on.\n\
Use only facts present in the items. Every entry must cite at least one index.";

#[derive(Debug, Deserialize, JsonSchema)]
struct DigestResponse {
    /// 2-3 sentence overview of the period.
    executive_summary: String,
    entries: Vec<EntryResponse>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct EntryResponse {
    headline: String,
    synthesis: String,
    /// clinical | regulatory | research | commercial | news | other
    category: String,
    /// critical | high | medium | low
    significance: String,
    /// What this means for the team, if anything.
    strategic_implication: Option<String>,
    /// Bracketed indices of the items this entry draws on.
    item_indices: Vec<i64>,
}

pub struct GenerativeStrategy {
    claude: Claude,
    fallback: DeterministicStrategy,
}

impl GenerativeStrategy {
    pub fn new(claude: Claude) -> Self {
        Self {
            claude,
            fallback: DeterministicStrategy,
        }
    }

    async fn generate(&self, items: &[RawItem], targets: &[WatchTarget]) -> Result<DigestDraft> {
        let response = self
            .claude
            .extract::<DigestResponse>(DIGEST_SYSTEM, build_prompt(items, targets))
            .await?;
        Ok(into_draft(response, items))
    }
}

fn build_prompt(items: &[RawItem], targets: &[WatchTarget]) -> String {
    let names: HashMap<Uuid, &str> = targets.iter().map(|t| (t.id, t.label())).collect();

    let goals = targets
        .iter()
        .map(|t| format!("- {}: {}", t.label(), t.monitoring_goal()))
        .collect::<Vec<_>>()
        .join("\n");

    let listed = items
        .iter()
        .take(MAX_ITEMS)
        .enumerate()
        .map(|(i, item)| {
            let target = names.get(&item.target_id).copied().unwrap_or("unknown");
            let excerpt = item.body().map(|b| truncate(b, EXCERPT_CHARS)).unwrap_or_default();
            format!("[{i}] ({}, {target}) {}\n{excerpt}", item.source, item.title)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!("Monitoring goals:\n{goals}\n\nItems:\n{listed}")
}

/// Map model entries onto raw items, dropping out-of-range and repeated indices
/// and any entry left without a valid index. When at least one entry survives,
/// uncited items are appended as deterministic entries.
fn into_draft(response: DigestResponse, items: &[RawItem]) -> DigestDraft {
    let visible = items.len().min(MAX_ITEMS);
    let mut entries = Vec::new();
    let mut cited_any: BTreeSet<usize> = BTreeSet::new();

    for entry in response.entries {
        let indices: BTreeSet<usize> = entry
            .item_indices
            .iter()
            .filter_map(|&i| usize::try_from(i).ok())
            .filter(|&i| i < visible)
            .collect();
        if indices.is_empty() {
            warn!(headline = %entry.headline, "Digest entry cites no valid item, dropping");
            continue;
        }

        cited_any.extend(indices.iter().copied());
        let cited: Vec<&RawItem> = indices.iter().map(|&i| &items[i]).collect();
        entries.push(DraftEntry {
            raw_item_ids: cited.iter().map(|r| r.id).collect(),
            category: DigestCategory::from_str_loose(&entry.category),
            significance: Significance::from_str_loose(&entry.significance),
            headline: entry.headline.trim().to_string(),
            synthesis: entry.synthesis.trim().to_string(),
            strategic_note: entry
                .strategic_implication
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            sources: cited
                .iter()
                .map(|r| SourceReference {
                    source: r.source.clone(),
                    title: r.title.clone(),
                    url: r.url.clone(),
                })
                .collect(),
        });
    }

    if !entries.is_empty() {
        let uncited: Vec<&RawItem> = items
            .iter()
            .enumerate()
            .filter(|(i, _)| !cited_any.contains(i))
            .map(|(_, item)| item)
            .collect();
        if !uncited.is_empty() {
            info!(uncited = uncited.len(), "Adding deterministic entries for uncited items");
            entries.extend(uncited.into_iter().map(entry_for));
        }
    }

    let summary = response.executive_summary.trim().to_string();
    DigestDraft {
        executive_summary: (!summary.is_empty()).then_some(summary),
        entries,
    }
}

#[async_trait]
impl DigestStrategy for GenerativeStrategy {
    async fn compose(&self, items: &[RawItem], targets: &[WatchTarget]) -> Result<DigestDraft> {
        if items.is_empty() {
            return Ok(self.fallback.draft(items));
        }

        match self.generate(items, targets).await {
            Ok(draft) if !draft.entries.is_empty() => {
                info!(entries = draft.entries.len(), items = items.len(), "Generated digest");
                Ok(draft)
            }
            Ok(_) => {
                warn!("Generated digest had no usable entries, using deterministic digest");
                Ok(self.fallback.draft(items))
            }
            Err(e) => {
                warn!(error = %e, "Digest generation failed, using deterministic digest");
                Ok(self.fallback.draft(items))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{raw_item, target};

    fn response(entries: Vec<EntryResponse>) -> DigestResponse {
        DigestResponse {
            executive_summary: " Two things happened. ".into(),
            entries,
        }
    }

    fn entry(indices: Vec<i64>) -> EntryResponse {
        EntryResponse {
            headline: "Headline".into(),
            synthesis: "Synthesis".into(),
            category: "Regulatory".into(),
            significance: "HIGH".into(),
            strategic_implication: Some(" ".into()),
            item_indices: indices,
        }
    }

    #[test]
    fn invalid_indices_are_dropped() {
        let run = Uuid::new_v4();
        let t = target("x");
        let items = vec![
            raw_item(run, t.id, "pubmed", "1", "a"),
            raw_item(run, t.id, "newsapi", "2", "b"),
        ];

        let draft = into_draft(
            response(vec![entry(vec![1, 7, -1, 1]), entry(vec![9]), entry(vec![0])]),
            &items,
        );

        assert_eq!(draft.executive_summary.as_deref(), Some("Two things happened."));
        assert_eq!(draft.entries.len(), 2);
        assert_eq!(draft.entries[0].raw_item_ids, vec![items[1].id]);
        assert_eq!(draft.entries[0].category, DigestCategory::Regulatory);
        assert_eq!(draft.entries[0].significance, Significance::High);
        assert!(draft.entries[0].strategic_note.is_none());
        assert_eq!(draft.entries[1].sources[0].source, "pubmed");
    }

    #[test]
    fn items_beyond_the_prompt_cap_still_reach_the_digest() {
        let run = Uuid::new_v4();
        let t = target("x");
        let items: Vec<RawItem> = (0..85)
            .map(|i| raw_item(run, t.id, "pubmed", &i.to_string(), &format!("Paper {i}")))
            .collect();

        let prompt = build_prompt(&items, &[t]);
        assert!(prompt.contains("[79] "));
        assert!(!prompt.contains("[80] "));

        let draft = into_draft(response(vec![entry((0..85).collect())]), &items);

        assert_eq!(draft.entries.len(), 6);
        assert_eq!(draft.entries[0].raw_item_ids.len(), 80);
        let contributing: BTreeSet<Uuid> = draft
            .entries
            .iter()
            .flat_map(|e| e.raw_item_ids.iter().copied())
            .collect();
        assert_eq!(contributing.len(), 85);
        assert_eq!(draft.entries[5].raw_item_ids, vec![items[84].id]);
        assert_eq!(draft.entries[5].significance, Significance::Medium);
    }

    #[test]
    fn uncited_visible_items_get_deterministic_entries() {
        let run = Uuid::new_v4();
        let t = target("x");
        let items = vec![
            raw_item(run, t.id, "pubmed", "1", "a"),
            raw_item(run, t.id, "newsapi", "2", "b"),
            raw_item(run, t.id, "clinicaltrials", "3", "c"),
        ];

        let draft = into_draft(response(vec![entry(vec![1])]), &items);

        assert_eq!(draft.entries.len(), 3);
        assert_eq!(draft.entries[1].raw_item_ids, vec![items[0].id]);
        assert_eq!(draft.entries[2].raw_item_ids, vec![items[2].id]);
        assert_eq!(draft.entries[2].category, DigestCategory::Clinical);
    }

    #[test]
    fn prompt_lists_goals_and_indexed_items() {
        let mut t = target("sotorasib");
        t.notes = Some("trial halts".into());
        let mut item = raw_item(Uuid::new_v4(), t.id, "pubmed", "1", "KRAS paper");
        item.abstract_text = Some("Abstract".into());

        let prompt = build_prompt(&[item], &[t]);
        assert!(prompt.contains("- sotorasib: trial halts"));
        assert!(prompt.contains("[0] (pubmed, sotorasib) KRAS paper\nAbstract"));
    }

    #[tokio::test]
    async fn unreachable_model_falls_back_to_deterministic() {
        let claude = Claude::new("sk-ant-test", "m")
            .with_base_url("http://127.0.0.1:9")
            .with_retry(ai_client::RetryPolicy {
                max_server_error_retries: 0,
                ..Default::default()
            });
        let strategy = GenerativeStrategy::new(claude);
        let t = target("x");
        let items = vec![raw_item(Uuid::new_v4(), t.id, "pubmed", "1", "Paper")];

        let draft = strategy.compose(&items, &[t]).await.unwrap();
        assert_eq!(draft.entries.len(), 1);
        assert!(draft.executive_summary.is_none());
        assert_eq!(draft.entries[0].significance, Significance::Medium);
    }
}
